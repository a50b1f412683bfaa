//! Digest service — the primary suppression-to-delivery path for alerts
//! deferred by quiet hours. Persists one `DigestEntry` per queued alert and
//! compiles/delivers batches per channel on request (the scheduler in
//! `crate::scheduler` decides *when*; this module only knows *how*).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::dispatcher::Dispatcher;
use crate::error::{DigestError, StoreError};
use crate::model::{Alert, DigestEntry, Event, Severity};
use crate::notification::{render_digest, render_empty_digest_notice};
use crate::store::AlertStore;

/// One entry inside a compiled digest — the subset of `DigestEntry` fields
/// a rendering needs.
#[derive(Debug, Clone)]
pub struct CompiledDigestEntry {
    pub entry_id: String,
    pub alert_id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
}

/// The result of `compile_digest`: a fresh digest id, bucketed severity
/// counts, the oldest/newest queued timestamps, and the ordered entries.
#[derive(Debug, Clone)]
pub struct CompiledDigest {
    pub digest_id: String,
    pub severity_counts: Vec<(Severity, usize)>,
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
    pub entries: Vec<CompiledDigestEntry>,
}

pub struct DigestService {
    clock: Arc<dyn Clock>,
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<dyn Dispatcher>,
    bus: Arc<dyn EventBus>,
}

impl DigestService {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn AlertStore>,
        dispatcher: Arc<dyn Dispatcher>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            clock,
            store,
            dispatcher,
            bus,
        }
    }

    /// Persists a digest entry for `alert` on `channel_id` and publishes
    /// `alert.digest.queued`. `bypass_sent` is true when the alert was
    /// also dispatched immediately (the CRITICAL bypass path) and this
    /// entry only exists for historical record-keeping.
    pub async fn queue_alert(
        &self,
        alert: &Alert,
        channel_id: &str,
        channel_type: &str,
        bypass_sent: bool,
    ) -> Result<(), DigestError> {
        let now = self.clock.now();
        let entry = DigestEntry {
            id: Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
            channel_id: channel_id.to_string(),
            channel_type: channel_type.to_string(),
            severity: alert.severity,
            event_type: alert.event_type.clone(),
            title: alert.title.clone(),
            message: alert.message.clone(),
            data: Some(alert.event_data.clone()),
            bypass_sent,
            queued_at: now,
            delivered_at: None,
            digest_id: None,
        };

        self.store.save_digest_entry(&entry).await?;

        self.bus
            .publish(Event::new(
                "alert.digest.queued",
                "digest-service",
                serde_json::json!({
                    "entry_id": entry.id,
                    "alert_id": entry.alert_id,
                    "rule_id": entry.rule_id,
                    "channel_id": entry.channel_id,
                    "severity": entry.severity,
                    "bypass_sent": entry.bypass_sent,
                }),
            ))
            .await;

        Ok(())
    }

    /// Selects undelivered entries for `channel_id` queued at or after
    /// `since`, ordered by `queued_at`. Returns `None` if there are none.
    pub async fn compile_digest(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CompiledDigest>, StoreError> {
        let entries = self.store.pending_digest_entries(channel_id, since).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let oldest = entries.first().expect("non-empty").queued_at;
        let newest = entries.last().expect("non-empty").queued_at;
        let digest_id = Uuid::new_v4().to_string();

        let mut severity_counts: Vec<(Severity, usize)> = Vec::new();
        for entry in &entries {
            match severity_counts.iter_mut().find(|(s, _)| *s == entry.severity) {
                Some((_, count)) => *count += 1,
                None => severity_counts.push((entry.severity, 1)),
            }
        }
        severity_counts.sort_by_key(|(sev, _)| std::cmp::Reverse(*sev));

        let compiled_entries = entries
            .iter()
            .map(|e| CompiledDigestEntry {
                entry_id: e.id.clone(),
                alert_id: e.alert_id.clone(),
                rule_id: e.rule_id.clone(),
                severity: e.severity,
                title: e.title.clone(),
                message: e.message.clone(),
            })
            .collect();

        Ok(Some(CompiledDigest {
            digest_id,
            severity_counts,
            oldest,
            newest,
            entries: compiled_entries,
        }))
    }

    /// Compiles the last 24h of entries for `channel_id` and, if any
    /// exist, renders and dispatches them. Marks entries delivered only on
    /// at-least-one-channel success; otherwise leaves them pending for the
    /// next compile (at-least-once semantics).
    pub async fn deliver_digest(&self, channel_id: &str) -> Result<(), DigestError> {
        let now = self.clock.now();
        let compiled = self
            .compile_digest(channel_id, now - Duration::hours(24))
            .await
            .map_err(DigestError::Store)?;

        let Some(compiled) = compiled else {
            return Ok(());
        };

        let channel_type = self
            .store
            .pending_digest_entries(channel_id, now - Duration::hours(24))
            .await
            .map_err(DigestError::Store)?
            .first()
            .map(|e| e.channel_type.clone())
            .unwrap_or_else(|| "email".to_string());

        let notification = render_digest(&compiled, &channel_type);
        let results = self
            .dispatcher
            .dispatch(&notification, std::slice::from_ref(&channel_id.to_string()))
            .await;

        let any_success = results.iter().any(|r| r.success);
        if !any_success {
            warn!(channel_id, attempts = results.len(), "all digest dispatches failed");
            return Err(DigestError::AllDispatchesFailed(results.len(), channel_id.to_string()));
        }

        let ids: Vec<String> = compiled.entries.iter().map(|e| e.entry_id.clone()).collect();
        self.store
            .mark_delivered(&ids, now, &compiled.digest_id)
            .await
            .map_err(DigestError::Store)?;

        info!(channel_id, digest_id = %compiled.digest_id, alert_count = compiled.entries.len(), "digest delivered");

        self.bus
            .publish(Event::new(
                "alert.digest.delivered",
                "digest-service",
                serde_json::json!({
                    "digest_id": compiled.digest_id,
                    "channel_id": channel_id,
                    "alert_count": compiled.entries.len(),
                    "severity_counts": compiled.severity_counts.iter()
                        .map(|(s, n)| (s.to_string(), *n))
                        .collect::<std::collections::HashMap<_, _>>(),
                }),
            ))
            .await;

        Ok(())
    }

    /// Dispatches a boilerplate "all clear" notice when `send_empty` is
    /// set and there is nothing to deliver; otherwise a no-op.
    pub async fn handle_empty_digest(&self, channel_id: &str, send_empty: bool) {
        if !send_empty {
            return;
        }
        let notification = render_empty_digest_notice(channel_id);
        let results = self
            .dispatcher
            .dispatch(&notification, std::slice::from_ref(&channel_id.to_string()))
            .await;
        if !results.iter().any(|r| r.success) {
            warn!(channel_id, "empty-digest notice failed to dispatch on every channel");
        }
    }
}
