//! Rule cache — an in-memory index of enabled rules by id, refreshed
//! wholesale from the store on rule-change events. Readers dominate (every
//! event consults it), so it is a `tokio::sync::RwLock` rather than a
//! plain `Mutex`: `refresh` holds it across the store call, which is the
//! one operation in this module that awaits.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::model::Rule;
use crate::store::AlertStore;

#[derive(Default)]
pub struct RuleCache {
    rules: RwLock<HashMap<String, Rule>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full reload from the store, replacing the cache's contents.
    pub async fn refresh(&self, store: &dyn AlertStore) -> Result<(), StoreError> {
        let fresh = store.rules_where_enabled().await?;
        let mut rules = self.rules.write().await;
        rules.clear();
        for rule in fresh {
            rules.insert(rule.id.clone(), rule);
        }
        info!(rule_count = rules.len(), "rule cache refreshed");
        Ok(())
    }

    /// Returns enabled rules whose selector matches `event_type`.
    pub async fn matching(&self, event_type: &str) -> Vec<Rule> {
        self.rules
            .read()
            .await
            .values()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    /// All currently cached rule ids — used to drop stale throttle state
    /// for rules that have since been deleted or disabled.
    pub async fn active_rule_ids(&self) -> std::collections::HashSet<String> {
        self.rules.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.rules.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Handler that re-runs `refresh` whenever a rule-change event fires.
/// Subscribed to `alert.rule.created`, `alert.rule.updated`, and
/// `alert.rule.deleted`.
pub struct RuleCacheRefreshHandler {
    cache: Arc<RuleCache>,
    store: Arc<dyn AlertStore>,
}

impl RuleCacheRefreshHandler {
    pub fn new(cache: Arc<RuleCache>, store: Arc<dyn AlertStore>) -> Self {
        Self { cache, store }
    }
}

#[async_trait::async_trait]
impl crate::bus::EventHandler for RuleCacheRefreshHandler {
    async fn handle(&self, event: &crate::model::Event) {
        if let Err(e) = self.cache.refresh(self.store.as_ref()).await {
            warn!(error = %e, event_type = %event.event_type, "rule cache refresh failed");
        }
    }
}
