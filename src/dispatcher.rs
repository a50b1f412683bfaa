//! Notification dispatcher collaborator. The core only renders messages
//! and reads back per-channel success/failure — actual transport (SMTP,
//! webhook HTTP, SMS gateway) lives entirely behind this trait, mirroring
//! `fleet::client::FleetClient`'s narrow upload contract.

use std::time::Duration;

use async_trait::async_trait;

use crate::notification::Notification;

#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub retryable: bool,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification, channel_ids: &[String]) -> Vec<DispatchResult>;
}

/// Delivers webhook-type channels over HTTP, posting the notification's
/// structured payload (falling back to the plain-text summary if none was
/// rendered). Channel ids are treated as full URLs; a real deployment
/// would resolve them through a channel directory first.
pub struct WebhookDispatcher {
    http: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build webhook HTTP client");
        Self { http }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn dispatch(&self, notification: &Notification, channel_ids: &[String]) -> Vec<DispatchResult> {
        let body = notification
            .structured
            .clone()
            .unwrap_or_else(|| serde_json::json!({ "summary": notification.summary }));

        let mut results = Vec::with_capacity(channel_ids.len());
        for channel_id in channel_ids {
            let result = match self.http.post(channel_id).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => DispatchResult {
                    channel_id: channel_id.clone(),
                    success: true,
                    error: None,
                    retryable: false,
                },
                Ok(resp) => DispatchResult {
                    channel_id: channel_id.clone(),
                    success: false,
                    error: Some(format!("webhook returned {}", resp.status())),
                    retryable: resp.status().is_server_error(),
                },
                Err(e) => DispatchResult {
                    channel_id: channel_id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    retryable: true,
                },
            };
            results.push(result);
        }
        results
    }
}

/// Test/demo dispatcher that always reports success without any transport.
#[derive(Debug, Default)]
pub struct NoopDispatcher;

#[async_trait]
impl Dispatcher for NoopDispatcher {
    async fn dispatch(&self, _notification: &Notification, channel_ids: &[String]) -> Vec<DispatchResult> {
        channel_ids
            .iter()
            .map(|id| DispatchResult {
                channel_id: id.clone(),
                success: true,
                error: None,
                retryable: false,
            })
            .collect()
    }
}

/// Dispatcher that always fails, used to exercise the "all dispatches
/// failed" path in digest and engine tests.
#[derive(Debug, Default)]
pub struct AlwaysFailDispatcher;

#[async_trait]
impl Dispatcher for AlwaysFailDispatcher {
    async fn dispatch(&self, _notification: &Notification, channel_ids: &[String]) -> Vec<DispatchResult> {
        channel_ids
            .iter()
            .map(|id| DispatchResult {
                channel_id: id.clone(),
                success: false,
                error: Some("simulated dispatch failure".to_string()),
                retryable: true,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::render_empty_digest_notice;

    #[tokio::test]
    async fn noop_dispatcher_reports_success_per_channel() {
        let dispatcher = NoopDispatcher;
        let notification = render_empty_digest_notice("chan-a");
        let results = dispatcher
            .dispatch(&notification, &["chan-a".to_string(), "chan-b".to_string()])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn always_fail_dispatcher_marks_every_channel_retryable() {
        let dispatcher = AlwaysFailDispatcher;
        let notification = render_empty_digest_notice("chan-a");
        let results = dispatcher.dispatch(&notification, &["chan-a".to_string()]).await;
        assert!(!results[0].success);
        assert!(results[0].retryable);
    }
}
