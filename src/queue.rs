//! In-memory alert queue — the fallback aggregation path used only when no
//! `DigestService` is configured (§4.9's in-memory digest fallback
//! worker). Bucketed by device id so the fallback worker can synthesize
//! one digest alert per device.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::model::QueuedAlert;

const UNKNOWN_DEVICE: &str = "unknown";

/// Reader-writer locked map of device id to its queued alerts.
/// `dequeue_all` is a single exclusive swap, making it atomic with respect
/// to concurrent `enqueue` calls the total count observed always equals
/// enqueued minus dequeued, with no lost updates under concurrency.
#[derive(Debug, Default)]
pub struct AlertQueue {
    buckets: RwLock<HashMap<String, Vec<QueuedAlert>>>,
}

impl AlertQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, alert: QueuedAlert) {
        let key = alert.device_id.clone().unwrap_or_else(|| UNKNOWN_DEVICE.to_string());
        self.buckets
            .write()
            .expect("alert queue lock poisoned")
            .entry(key)
            .or_default()
            .push(alert);
    }

    /// Atomically swaps the internal map for a fresh one, returning
    /// everything that was queued up to this point.
    pub fn dequeue_all(&self) -> HashMap<String, Vec<QueuedAlert>> {
        std::mem::take(&mut *self.buckets.write().expect("alert queue lock poisoned"))
    }

    pub fn count(&self) -> usize {
        self.buckets
            .read()
            .expect("alert queue lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn get_by_device(&self, device_id: &str) -> Vec<QueuedAlert> {
        self.buckets
            .read()
            .expect("alert queue lock poisoned")
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.buckets.write().expect("alert queue lock poisoned").clear();
    }
}
