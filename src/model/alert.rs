//! Records produced by the pipeline: the persistent `Alert` and
//! `DigestEntry`, and the in-memory-only `QueuedAlert` / `SuppressionTally`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::severity::Severity;

/// A persisted record: a rule's conditions matched an event and no
/// suppression gate blocked it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub event_type: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub event_data: Value,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub suppressed_count: Option<u64>,
    #[serde(default)]
    pub suppress_reason: Option<String>,
}

/// A batched-delivery record queued for a channel's digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub id: String,
    pub alert_id: String,
    pub rule_id: String,
    pub channel_id: String,
    pub channel_type: String,
    pub severity: Severity,
    pub event_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    pub bypass_sent: bool,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub digest_id: Option<String>,
}

/// In-memory-only fallback aggregation unit, used when no `DigestService`
/// is configured (§4.9's in-memory digest fallback worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAlert {
    pub rule_id: String,
    pub event_type: String,
    pub payload: Value,
    pub severity: Severity,
    pub device_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-rule running count of suppressions not yet attributed to a fired
/// alert. Read-and-reset when an alert for the rule finally fires.
#[derive(Debug, Clone, Default)]
pub struct SuppressionTally {
    pub count: u64,
    pub last_reason: Option<String>,
}

impl SuppressionTally {
    pub fn record(&mut self, reason: impl Into<String>) {
        self.count += 1;
        self.last_reason = Some(reason.into());
    }

    /// Returns the tally and clears it, as required before attaching
    /// suppression attribution to a firing alert.
    pub fn take(&mut self) -> (u64, Option<String>) {
        let count = self.count;
        let reason = self.last_reason.take();
        self.count = 0;
        (count, reason)
    }
}
