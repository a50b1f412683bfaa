//! Persistent store collaborator — typed CRUD on `Rule`, `Alert`, and
//! `DigestEntry` plus the handful of queries the engine and digest service
//! actually issue. Modeled as a trait so a real backend (sled, Postgres
//! via sqlx) can be dropped in without touching engine code.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Alert, DigestEntry, Rule};

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn rules_where_enabled(&self) -> Result<Vec<Rule>, StoreError>;
    async fn rule_by_id(&self, id: &str) -> Result<Option<Rule>, StoreError>;

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    async fn save_digest_entry(&self, entry: &DigestEntry) -> Result<(), StoreError>;

    /// `digest_entries where channel_id AND delivered_at is null AND queued_at >= since`,
    /// ordered by `queued_at` ascending.
    async fn pending_digest_entries(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DigestEntry>, StoreError>;

    /// Bulk-updates `(delivered_at, digest_id)` on every entry in `ids`.
    async fn mark_delivered(
        &self,
        ids: &[String],
        delivered_at: DateTime<Utc>,
        digest_id: &str,
    ) -> Result<(), StoreError>;
}

/// Reference backend used by the demo binary and the test suite. Not
/// durable across restarts — acceptable since rule/alert/digest-entry
/// persistence durability lives entirely with whatever backend is wired in
/// at construction; this crate only needs a working implementation of the
/// contract above.
#[derive(Default)]
pub struct InMemoryStore {
    rules: RwLock<HashMap<String, Rule>>,
    alerts: RwLock<Vec<Alert>>,
    digest_entries: RwLock<HashMap<String, DigestEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_rule(&self, rule: Rule) {
        self.rules
            .write()
            .expect("store rules lock poisoned")
            .insert(rule.id.clone(), rule);
    }

    pub fn remove_rule(&self, id: &str) {
        self.rules.write().expect("store rules lock poisoned").remove(id);
    }

    pub fn alerts_snapshot(&self) -> Vec<Alert> {
        self.alerts.read().expect("store alerts lock poisoned").clone()
    }

    pub fn digest_entries_snapshot(&self) -> Vec<DigestEntry> {
        self.digest_entries
            .read()
            .expect("store digest entries lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn rules_where_enabled(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self
            .rules
            .read()
            .expect("store rules lock poisoned")
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn rule_by_id(&self, id: &str) -> Result<Option<Rule>, StoreError> {
        Ok(self
            .rules
            .read()
            .expect("store rules lock poisoned")
            .get(id)
            .cloned())
    }

    async fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.alerts
            .write()
            .expect("store alerts lock poisoned")
            .push(alert.clone());
        Ok(())
    }

    async fn save_digest_entry(&self, entry: &DigestEntry) -> Result<(), StoreError> {
        self.digest_entries
            .write()
            .expect("store digest entries lock poisoned")
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn pending_digest_entries(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DigestEntry>, StoreError> {
        let mut entries: Vec<DigestEntry> = self
            .digest_entries
            .read()
            .expect("store digest entries lock poisoned")
            .values()
            .filter(|e| e.channel_id == channel_id && e.delivered_at.is_none() && e.queued_at >= since)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.queued_at);
        Ok(entries)
    }

    async fn mark_delivered(
        &self,
        ids: &[String],
        delivered_at: DateTime<Utc>,
        digest_id: &str,
    ) -> Result<(), StoreError> {
        let mut entries = self
            .digest_entries
            .write()
            .expect("store digest entries lock poisoned");
        for id in ids {
            if let Some(entry) = entries.get_mut(id) {
                entry.delivered_at = Some(delivered_at);
                entry.digest_id = Some(digest_id.to_string());
            }
        }
        Ok(())
    }
}
