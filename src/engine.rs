//! Alert engine — the orchestrator that wires the rule cache, storm
//! detector, throttle manager, quiet-hours filter, and digest path
//! together behind a single event handler: a struct owning every
//! collaborator, a `new()` plus `with_*` builder methods for the
//! optional ones, and a `start`/`stop` pair that spawns and cancels its
//! own background tasks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, EventHandler};
use crate::cache::{RuleCache, RuleCacheRefreshHandler};
use crate::clock::Clock;
use crate::conditions;
use crate::digest::DigestService;
use crate::dispatcher::Dispatcher;
use crate::escalation::EscalationEngine;
use crate::model::{
    Alert, DigestConfig, Event, QueuedAlert, QuietHoursConfig, Rule, Severity, SuppressionTally,
    ThrottleConfig,
};
use crate::queue::AlertQueue;
use crate::quiet_hours;
use crate::scheduler::ChannelDirectory;
use crate::storm::{StormConfig, StormDetector};
use crate::store::AlertStore;
use crate::throttle::ThrottleManager;

const RULE_CHANGE_EVENTS: [&str; 3] = [
    "alert.rule.created",
    "alert.rule.updated",
    "alert.rule.deleted",
];

/// Engine-construction tunables. Distinct from `crate::config::EngineConfig`
/// (the process-global TOML-loaded form) so the engine can be built in
/// tests without going through the global loader.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub storm: StormConfig,
    pub throttle_summary_interval: Duration,
    pub digest_worker_tick: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            storm: StormConfig::default(),
            throttle_summary_interval: Duration::seconds(300),
            digest_worker_tick: Duration::seconds(60),
        }
    }
}

impl From<&crate::config::EngineConfig> for EngineSettings {
    fn from(config: &crate::config::EngineConfig) -> Self {
        Self {
            storm: config.storm.into(),
            throttle_summary_interval: Duration::seconds(
                config.throttle_summary_interval_secs as i64,
            ),
            digest_worker_tick: Duration::seconds(config.digest_worker_tick_secs as i64),
        }
    }
}

struct Workers {
    summary: Option<(CancellationToken, tokio::task::JoinHandle<()>)>,
    digest_fallback: Option<(CancellationToken, tokio::task::JoinHandle<()>)>,
}

pub struct AlertEngine {
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    bus: Arc<dyn EventBus>,
    store: Arc<dyn AlertStore>,
    dispatcher: Arc<dyn Dispatcher>,
    cache: Arc<RuleCache>,
    storm: Arc<StormDetector>,
    throttle: Arc<ThrottleManager>,
    tallies: AsyncMutex<HashMap<String, SuppressionTally>>,
    queue: Arc<AlertQueue>,
    digest: Option<Arc<DigestService>>,
    channel_directory: Option<Arc<dyn ChannelDirectory>>,
    escalation: Option<Arc<dyn EscalationEngine>>,
    workers: AsyncMutex<Workers>,
}

impl AlertEngine {
    pub fn new(
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
        bus: Arc<dyn EventBus>,
        store: Arc<dyn AlertStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            storm: Arc::new(StormDetector::new(settings.storm, clock.clone())),
            throttle: Arc::new(ThrottleManager::new(clock.clone())),
            cache: Arc::new(RuleCache::new()),
            queue: Arc::new(AlertQueue::new()),
            tallies: AsyncMutex::new(HashMap::new()),
            digest: None,
            channel_directory: None,
            escalation: None,
            workers: AsyncMutex::new(Workers {
                summary: None,
                digest_fallback: None,
            }),
            clock,
            settings,
            bus,
            store,
            dispatcher,
        }
    }

    /// Attaches a digest service and its channel directory. Once set, the
    /// in-memory fallback worker is never launched — the scheduler drives
    /// delivery instead.
    pub fn with_digest(
        mut self,
        digest: Arc<DigestService>,
        channel_directory: Arc<dyn ChannelDirectory>,
    ) -> Self {
        self.digest = Some(digest);
        self.channel_directory = Some(channel_directory);
        self
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn EscalationEngine>) -> Self {
        self.escalation = Some(escalation);
        self
    }

    /// `start(ctx)` step 1-6.
    pub async fn start(self: &Arc<Self>) {
        if let Err(e) = self.cache.refresh(self.store.as_ref()).await {
            warn!(error = %e, "initial rule cache load failed");
        }

        let engine_handler: Arc<dyn EventHandler> = self.clone();
        self.bus.subscribe_all(engine_handler).await;

        let refresh_handler: Arc<dyn EventHandler> =
            Arc::new(RuleCacheRefreshHandler::new(self.cache.clone(), self.store.clone()));
        for event_type in RULE_CHANGE_EVENTS {
            self.bus.subscribe(event_type, refresh_handler.clone()).await;
        }

        self.spawn_summary_worker().await;

        if let Some(escalation) = &self.escalation {
            escalation.start().await;
        }

        if self.digest.is_none() {
            self.spawn_digest_fallback_worker().await;
        }

        info!("alert engine started");
    }

    /// `stop(ctx)`: idempotent.
    pub async fn stop(&self) {
        let mut workers = self.workers.lock().await;
        if let Some((cancel, handle)) = workers.summary.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        if let Some((cancel, handle)) = workers.digest_fallback.take() {
            cancel.cancel();
            let _ = handle.await;
        }
        drop(workers);

        if let Some(escalation) = &self.escalation {
            escalation.stop().await;
        }

        info!("alert engine stopped");
    }

    async fn spawn_summary_worker(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let child = cancel.clone();
        let tick = self
            .settings
            .throttle_summary_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(300));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => return,
                    _ = tokio::time::sleep(tick) => {}
                }
                engine.run_summary_cycle().await;
            }
        });

        self.workers.lock().await.summary = Some((cancel, handle));
    }

    async fn run_summary_cycle(&self) {
        let active = self.cache.active_rule_ids().await;
        self.throttle.cleanup(&active);
        for summary in self.throttle.drain_summaries() {
            self.bus
                .publish(Event::new(
                    "throttle.summary",
                    "alert-engine",
                    serde_json::json!({
                        "rule_id": summary.rule_id,
                        "allowed_in_window": summary.allowed_in_window,
                        "suppressed": summary.suppressed,
                        "period_seconds": summary.period_seconds,
                        "groups": summary.groups.iter().map(|g| serde_json::json!({
                            "group_key": g.group_key,
                            "allowed_in_window": g.allowed_in_window,
                            "suppressed": g.suppressed,
                        })).collect::<Vec<_>>(),
                    }),
                ))
                .await;
        }
    }

    async fn spawn_digest_fallback_worker(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let child = cancel.clone();
        let tick = self
            .settings
            .digest_worker_tick
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(60));

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => return,
                    _ = tokio::time::sleep(tick) => {}
                }
                engine.run_digest_fallback_cycle().await;
            }
        });

        self.workers.lock().await.digest_fallback = Some((cancel, handle));
    }

    /// In-memory digest fallback worker.
    async fn run_digest_fallback_cycle(&self) {
        if self.queue.count() == 0 {
            return;
        }
        let buckets = self.queue.dequeue_all();
        let now = self.clock.now();

        for (device_id, alerts) in buckets {
            if alerts.is_empty() {
                continue;
            }

            // The first alert's rule decides whether the bucket is still
            // quiet-hours-suppressed. A device-level coarse approximation,
            // kept deliberately rather than replaced with a per-alert
            // check - see DESIGN.md.
            let first = &alerts[0];
            let still_suppressed = match self.store.rule_by_id(&first.rule_id).await {
                Ok(Some(rule)) => rule
                    .quiet_hours_config
                    .as_ref()
                    .and_then(|raw| QuietHoursConfig::parse(raw).ok())
                    .map(|cfg| quiet_hours::should_suppress(&cfg, first.severity, now).0)
                    .unwrap_or(false),
                Ok(None) => false,
                Err(e) => {
                    warn!(error = %e, rule_id = %first.rule_id, "digest fallback: rule lookup failed");
                    false
                }
            };

            if still_suppressed {
                for alert in alerts {
                    self.queue.enqueue(alert);
                }
                continue;
            }

            let severity = alerts
                .iter()
                .map(|a| a.severity)
                .max()
                .unwrap_or(Severity::Info);

            let alert = Alert {
                id: Uuid::new_v4().to_string(),
                rule_id: first.rule_id.clone(),
                event_type: "quiet_hours.digest".to_string(),
                severity,
                title: format!("{severity}: digest for device {device_id}"),
                message: format!("{} alert(s) deferred by quiet hours", alerts.len()),
                device_id: Some(device_id.clone()),
                event_data: serde_json::json!({ "alert_count": alerts.len() }),
                triggered_at: now,
                suppressed_count: Some(alerts.len() as u64),
                suppress_reason: Some("quiet_hours_digest".to_string()),
            };

            if let Err(e) = self.store.save_alert(&alert).await {
                warn!(error = %e, device_id = %device_id, "digest fallback: alert save failed");
                continue;
            }

            self.bus
                .publish(Event::new(
                    "alert.triggered",
                    "alert-engine",
                    serde_json::json!({
                        "alert_id": alert.id,
                        "rule_id": alert.rule_id,
                        "device_id": alert.device_id,
                        "severity": alert.severity,
                        "title": alert.title,
                        "message": alert.message,
                        "digest": true,
                        "alert_count": alerts.len(),
                    }),
                ))
                .await;
        }
    }

    async fn tally_reason(&self, rule_id: &str, reason: impl Into<String>) {
        let mut tallies = self.tallies.lock().await;
        tallies.entry(rule_id.to_string()).or_default().record(reason);
    }

    async fn take_tally(&self, rule_id: &str) -> (u64, Option<String>) {
        let mut tallies = self.tallies.lock().await;
        match tallies.get_mut(rule_id) {
            Some(tally) => tally.take(),
            None => (0, None),
        }
    }

    async fn queue_or_deliver(&self, alert: &Alert, rule: &Rule, channel_type_hint: Option<&str>) {
        for channel_id in &rule.channels {
            let channel_type = channel_type_hint
                .map(str::to_string)
                .or_else(|| {
                    self.channel_directory
                        .as_ref()
                        .and_then(|dir| dir.channel_type(channel_id))
                })
                .unwrap_or_else(|| "email".to_string());

            if let Some(digest) = &self.digest {
                let digest_config = self
                    .channel_directory
                    .as_ref()
                    .and_then(|dir| dir.digest_config(channel_id));
                if let Some(config) = &digest_config {
                    if !config.should_queue(alert.severity) {
                        debug!(channel_id = %channel_id, "channel digest config declined to batch this alert, skipping");
                        continue;
                    }
                }
                if let Err(e) = digest.queue_alert(alert, channel_id, &channel_type, false).await {
                    warn!(error = %e, channel_id = %channel_id, "queue_alert failed");
                }
            } else {
                self.queue.enqueue(QueuedAlert {
                    rule_id: rule.id.clone(),
                    event_type: alert.event_type.clone(),
                    payload: alert.event_data.clone(),
                    severity: alert.severity,
                    device_id: alert.device_id.clone(),
                    timestamp: alert.triggered_at,
                });
            }
        }
    }

    async fn process_rule(&self, rule: &Rule, event: &Event, data: &Value) {
        let conditions = match conditions::parse_conditions(&rule.conditions) {
            Ok(c) => c,
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "condition parse failed, skipping rule");
                return;
            }
        };

        if !conditions::evaluate(&conditions, data) {
            return;
        }

        if let Some(raw) = &rule.throttle_config {
            match ThrottleConfig::parse(raw) {
                Ok(config) => {
                    let (allowed, reason) = self.throttle.should_allow(&rule.id, data, &config);
                    if !allowed {
                        self.tally_reason(&rule.id, format!("throttled: {reason}")).await;
                        return;
                    }
                }
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "throttle config parse failed, treating as not configured");
                }
            }
        }

        let device_id = event.device_id();

        if let Some(raw) = &rule.quiet_hours_config {
            match QuietHoursConfig::parse(raw) {
                Ok(config) => {
                    let (suppress, _reason) =
                        quiet_hours::should_suppress(&config, rule.severity, self.clock.now());
                    if suppress {
                        let candidate = Alert {
                            id: Uuid::new_v4().to_string(),
                            rule_id: rule.id.clone(),
                            event_type: event.event_type.clone(),
                            severity: rule.severity,
                            title: rule.alert_title(),
                            message: rule.alert_message(),
                            device_id,
                            event_data: data.clone(),
                            triggered_at: self.clock.now(),
                            suppressed_count: None,
                            suppress_reason: None,
                        };
                        self.queue_or_deliver(&candidate, rule, None).await;
                        return;
                    }
                }
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "quiet-hours config parse failed, treating as not configured");
                }
            }
        }

        // Read-and-reset happens only once the alert is actually going to
        // fire: a tally built up across a run of throttled events must
        // survive a quiet-hours deferral of the next qualifying event, not
        // be consumed and dropped by it (spec's §3/§4.9d ordering).
        let (suppressed_count, suppress_reason) = self.take_tally(&rule.id).await;

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            event_type: event.event_type.clone(),
            severity: rule.severity,
            title: rule.alert_title(),
            message: rule.alert_message(),
            device_id,
            event_data: data.clone(),
            triggered_at: self.clock.now(),
            suppressed_count: if suppressed_count > 0 { Some(suppressed_count) } else { None },
            suppress_reason,
        };

        if let Err(e) = self.store.save_alert(&alert).await {
            warn!(rule_id = %rule.id, error = %e, "alert save failed, skipping publish");
            return;
        }

        debug!(rule_id = %rule.id, alert_id = %alert.id, "alert created");

        self.bus
            .publish(Event::new(
                "alert.created",
                "alert-engine",
                serde_json::json!({
                    "id": alert.id,
                    "rule_id": alert.rule_id,
                    "event_type": alert.event_type,
                    "severity": alert.severity,
                    "title": alert.title,
                    "message": alert.message,
                    "device_id": alert.device_id,
                    "channels": rule.channels,
                    "event_data": alert.event_data,
                    "source": "alert-engine",
                }),
            ))
            .await;

        if let Some(escalation) = &self.escalation {
            escalation.track_alert(&alert).await;
        }

        self.record_bypass_history(&alert, rule).await;
    }

    /// An alert that fired immediately (i.e. was not quiet-hours suppressed)
    /// may still belong, by severity, to a channel whose digest config would
    /// normally have batched it. When that channel's `bypass_critical` let a
    /// CRITICAL alert through immediately, the digest service separately
    /// persists a `bypass_sent=true` entry so the channel's digest history
    /// still shows it - both the immediate delivery and the historical
    /// record are exercised rather than just one (see DESIGN.md).
    async fn record_bypass_history(&self, alert: &Alert, rule: &Rule) {
        let (Some(digest), Some(directory)) = (&self.digest, &self.channel_directory) else {
            return;
        };

        for channel_id in &rule.channels {
            let Some(digest_config) = directory.digest_config(channel_id) else {
                continue;
            };
            if !digest_config.bypass_critical || alert.severity != Severity::Critical {
                continue;
            }

            let channel_type = directory
                .channel_type(channel_id)
                .unwrap_or_else(|| "email".to_string());
            if let Err(e) = digest.queue_alert(alert, channel_id, &channel_type, true).await {
                warn!(error = %e, channel_id = %channel_id, "bypass-history queue_alert failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl EventHandler for AlertEngine {
    /// Entry point for every event the bus delivers to this engine.
    async fn handle(&self, event: &Event) {
        if !self.storm.record_event() {
            let matching = self.cache.matching(&event.event_type).await;
            for rule in &matching {
                self.tally_reason(&rule.id, "storm").await;
            }
            return;
        }

        if event.event_type.is_empty() {
            return;
        }

        let matching = self.cache.matching(&event.event_type).await;
        if matching.is_empty() {
            return;
        }

        let data = &event.data;

        for rule in &matching {
            if !rule.enabled {
                continue;
            }
            self.process_rule(rule, event, data).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryEventBus;
    use crate::clock::TestClock;
    use crate::dispatcher::NoopDispatcher;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rule(id: &str, event_type: &str, severity: Severity, enabled: bool) -> Rule {
        Rule {
            id: id.to_string(),
            event_type: event_type.to_string(),
            severity,
            conditions: json!([]),
            throttle_config: None,
            quiet_hours_config: None,
            channels: vec!["ops-email".into()],
            enabled,
            name: "Router offline".into(),
            description: None,
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn engine_with_rule(r: Rule) -> (Arc<AlertEngine>, Arc<InMemoryStore>, Arc<InMemoryEventBus>) {
        let clock = Arc::new(TestClock::new("2026-01-01T12:00:00Z".parse().unwrap()));
        let store = Arc::new(InMemoryStore::new());
        store.put_rule(r);
        let bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(NoopDispatcher);

        let engine = Arc::new(AlertEngine::new(
            clock,
            EngineSettings::default(),
            bus.clone(),
            store.clone(),
            dispatcher,
        ));
        engine.start().await;
        (engine, store, bus)
    }

    #[tokio::test]
    async fn end_to_end_rule_match_creates_and_persists_an_alert() {
        let (engine, store, bus) = engine_with_rule(rule(
            "r1",
            "router.disconnected",
            Severity::Critical,
            true,
        ))
        .await;

        let created_count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            "alert.created",
            Arc::new(CountingHandler(created_count.clone())),
        )
        .await;

        engine
            .handle(&Event::new(
                "router.disconnected",
                "poller",
                json!({"device_id": "dev-1"}),
            ))
            .await;

        assert_eq!(store.alerts_snapshot().len(), 1);
        assert_eq!(created_count.load(Ordering::SeqCst), 1);

        engine.stop().await;
    }

    #[tokio::test]
    async fn disabled_rule_produces_no_alert() {
        let (engine, store, _bus) = engine_with_rule(rule(
            "r1",
            "router.disconnected",
            Severity::Critical,
            false,
        ))
        .await;

        engine
            .handle(&Event::new(
                "router.disconnected",
                "poller",
                json!({"device_id": "dev-1"}),
            ))
            .await;

        assert_eq!(store.alerts_snapshot().len(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn unmatched_event_type_produces_no_alert() {
        let (engine, store, _bus) = engine_with_rule(rule(
            "r1",
            "router.disconnected",
            Severity::Critical,
            true,
        ))
        .await;

        engine
            .handle(&Event::new("cpu.high", "poller", json!({})))
            .await;

        assert_eq!(store.alerts_snapshot().len(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn empty_event_type_is_a_no_op() {
        let (engine, store, _bus) = engine_with_rule(rule(
            "r1",
            "router.disconnected",
            Severity::Critical,
            true,
        ))
        .await;

        engine.handle(&Event::new("", "poller", json!({}))).await;

        assert_eq!(store.alerts_snapshot().len(), 0);
        engine.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (engine, _store, _bus) = engine_with_rule(rule(
            "r1",
            "router.disconnected",
            Severity::Critical,
            true,
        ))
        .await;

        engine.stop().await;
        engine.stop().await;
    }
}
