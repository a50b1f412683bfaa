//! Rule — a user-defined policy selecting events by type. Owned by the
//! external store; the engine only ever reads it. Conditions and the
//! throttle/quiet-hours configs are kept as raw JSON blobs on the struct
//! and parsed lazily by the engine, so a single malformed rule can fail
//! to parse without poisoning the rest of the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::severity::Severity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub event_type: String,
    pub severity: Severity,
    /// JSON array of `{field, operator, value}` objects. Empty/absent
    /// matches everything.
    #[serde(default = "default_conditions")]
    pub conditions: Value,
    #[serde(default)]
    pub throttle_config: Option<Value>,
    #[serde(default)]
    pub quiet_hours_config: Option<Value>,
    pub channels: Vec<String>,
    pub enabled: bool,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_conditions() -> Value {
    Value::Array(Vec::new())
}

impl Rule {
    /// `"<SEVERITY>: <name>"`, the standard alert title.
    pub fn alert_title(&self) -> String {
        format!("{}: {}", self.severity, self.name)
    }

    /// Rule description if present, else a generic template — used as the
    /// alert message body when no description was authored.
    pub fn alert_message(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => d.clone(),
            _ => format!(
                "Alert rule '{}' matched an event of type '{}'",
                self.name, self.event_type
            ),
        }
    }
}
