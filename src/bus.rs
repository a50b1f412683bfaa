//! Event bus — the engine's only inbound and outbound transport. Kept as
//! a narrow trait pair so the engine can be built and tested against an
//! in-memory bus without any real transport.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::model::Event;

/// Callback invoked for a published event. One handler may be registered
/// for "all events" or for a single event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&Event) + Send + Sync,
{
    async fn handle(&self, event: &Event) {
        (self)(event)
    }
}

/// Publish/subscribe transport the engine consumes. `subscribe_all` and
/// `subscribe` register handlers; `publish` fans an event out to every
/// matching handler and reports whether delivery succeeded.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn subscribe_all(&self, handler: std::sync::Arc<dyn EventHandler>);
    async fn subscribe(&self, event_type: &str, handler: std::sync::Arc<dyn EventHandler>);
    async fn publish(&self, event: Event) -> bool;
}

/// In-process bus used by the demo binary and the test suite. Handlers run
/// sequentially on the publishing task — adequate for a single process with
/// no cross-restart delivery guarantees (out of scope per the core's
/// contract with its transport).
#[derive(Default)]
pub struct InMemoryEventBus {
    all_handlers: RwLock<Vec<std::sync::Arc<dyn EventHandler>>>,
    typed_handlers: RwLock<HashMap<String, Vec<std::sync::Arc<dyn EventHandler>>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn subscribe_all(&self, handler: std::sync::Arc<dyn EventHandler>) {
        self.all_handlers
            .write()
            .expect("bus handler list poisoned")
            .push(handler);
    }

    async fn subscribe(&self, event_type: &str, handler: std::sync::Arc<dyn EventHandler>) {
        self.typed_handlers
            .write()
            .expect("bus handler map poisoned")
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    async fn publish(&self, event: Event) -> bool {
        let all: Vec<_> = self
            .all_handlers
            .read()
            .expect("bus handler list poisoned")
            .clone();
        for handler in &all {
            handler.handle(&event).await;
        }

        let typed: Vec<_> = self
            .typed_handlers
            .read()
            .expect("bus handler map poisoned")
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        for handler in &typed {
            handler.handle(&event).await;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn subscribe_all_receives_every_event() {
        let bus = InMemoryEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe_all(Arc::new(CountingHandler(count.clone())))
            .await;

        bus.publish(Event::new("alert.created", "engine", json!({})))
            .await;
        bus.publish(Event::new("throttle.summary", "engine", json!({})))
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscribe_typed_only_receives_matching_type() {
        let bus = InMemoryEventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("alert.rule.created", Arc::new(CountingHandler(count.clone())))
            .await;

        bus.publish(Event::new("alert.rule.created", "store", json!({})))
            .await;
        bus.publish(Event::new("alert.rule.deleted", "store", json!({})))
            .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
