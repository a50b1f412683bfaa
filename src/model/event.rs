//! Inbound event envelope — the unit of work the engine consumes from the
//! bus. The payload is kept as a `serde_json::Value` tree (per the dotted
//! path accessor design in `conditions.rs`) rather than a closed set of
//! typed variants, since the engine must evaluate rules against event
//! shapes it has no compile-time knowledge of.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// A typed record published on the event bus: router/service/system state
/// changes, metrics, health signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub priority: EventPriority,
    pub source: String,
    #[serde(default = "default_payload")]
    pub data: Value,
}

fn default_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            priority: EventPriority::default(),
            source: source.into(),
            data,
        }
    }

    /// Extracts a device identifier from the payload, preferring
    /// `device_id` and falling back to `router_id`, per the engine's
    /// alert-persistence rule.
    pub fn device_id(&self) -> Option<String> {
        self.data
            .get("device_id")
            .or_else(|| self.data.get("router_id"))
            .and_then(value_as_plain_string)
    }
}

/// Renders a JSON scalar as a plain string, used for group-key and
/// device-id derivation where only scalars make sense.
pub fn value_as_plain_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
