//! Integration coverage for the digest path end to end: queuing entries
//! through `DigestService`, scheduling delivery through `DigestScheduler`,
//! and observing the store end up with delivered entries and the bus
//! carrying the resulting `alert.digest.delivered` event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sairen_os::bus::{EventBus, EventHandler, InMemoryEventBus};
use sairen_os::clock::SystemClock;
use sairen_os::digest::DigestService;
use sairen_os::dispatcher::NoopDispatcher;
use sairen_os::model::{DigestConfig, DigestMode, Event, Severity};
use sairen_os::scheduler::{DigestScheduler, InMemoryChannelDirectory};
use sairen_os::store::{AlertStore, InMemoryStore};

struct CountingHandler(Arc<AtomicUsize>);

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _event: &Event) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn alert(id: &str) -> sairen_os::model::Alert {
    sairen_os::model::Alert {
        id: id.to_string(),
        rule_id: "r1".into(),
        event_type: "router.disconnected".into(),
        severity: Severity::Warning,
        title: "WARNING: Router offline".into(),
        message: "msg".into(),
        device_id: Some("dev-1".into()),
        event_data: serde_json::json!({}),
        triggered_at: chrono::Utc::now(),
        suppressed_count: None,
        suppress_reason: None,
    }
}

#[tokio::test(start_paused = true)]
async fn scheduled_digest_delivery_fires_and_marks_entries_delivered() {
    let clock = Arc::new(SystemClock);
    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(InMemoryEventBus::new());

    let delivered = Arc::new(AtomicUsize::new(0));
    bus.subscribe(
        "alert.digest.delivered",
        Arc::new(CountingHandler(delivered.clone())),
    )
    .await;

    let digest_service = Arc::new(DigestService::new(
        clock.clone(),
        store.clone() as Arc<dyn AlertStore>,
        Arc::new(NoopDispatcher) as Arc<dyn sairen_os::dispatcher::Dispatcher>,
        bus.clone() as Arc<dyn EventBus>,
    ));

    digest_service
        .queue_alert(&alert("a1"), "chan-a", "email", false)
        .await
        .unwrap();
    digest_service
        .queue_alert(&alert("a2"), "chan-a", "email", false)
        .await
        .unwrap();
    assert_eq!(store.digest_entries_snapshot().len(), 2);

    let directory = Arc::new(InMemoryChannelDirectory::new());
    directory.register(
        "chan-a",
        DigestConfig {
            mode: DigestMode::Hourly,
            schedule: Some("0".into()),
            timezone: "UTC".into(),
            bypass_critical: false,
            send_empty: false,
            severities: vec![],
        },
        None,
        "email",
    );

    let scheduler = DigestScheduler::new(clock, digest_service, directory);
    scheduler.schedule_next("chan-a").await;

    // advance virtual time past the top of the next hour so the armed
    // timer fires its one-shot delivery
    tokio::time::advance(std::time::Duration::from_secs(3601)).await;
    tokio::task::yield_now().await;
    tokio::time::advance(std::time::Duration::from_millis(10)).await;
    tokio::task::yield_now().await;

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    let entries = store.digest_entries_snapshot();
    assert!(entries.iter().all(|e| e.delivered_at.is_some()));

    scheduler.stop().await;
}

#[tokio::test]
async fn send_empty_false_is_silent_when_nothing_is_queued() {
    let clock = Arc::new(SystemClock);
    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(InMemoryEventBus::new());
    let digest_service = DigestService::new(
        clock,
        store.clone() as Arc<dyn AlertStore>,
        Arc::new(NoopDispatcher) as Arc<dyn sairen_os::dispatcher::Dispatcher>,
        bus as Arc<dyn EventBus>,
    );

    digest_service.deliver_digest("chan-empty").await.unwrap();
    assert_eq!(store.digest_entries_snapshot().len(), 0);
}
