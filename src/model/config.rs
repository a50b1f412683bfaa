//! Per-rule and per-channel config blobs, parsed from the raw JSON stored
//! on a `Rule` or resolved through a `ChannelDirectory`. Parsing is
//! isolated here so the engine can catch and log a single malformed
//! config without aborting the rest of rule evaluation: a throttle,
//! quiet-hours, or digest blob that fails to parse is logged and treated
//! as not configured rather than failing the whole rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::severity::Severity;
use crate::error::ConfigParseError;

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// Rate-limit config for a rule. `max_alerts <= 0` or `period_seconds <= 0`
/// disables throttling entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub max_alerts: i64,
    pub period_seconds: i64,
    #[serde(default)]
    pub group_by_field: Option<String>,
}

impl ThrottleConfig {
    pub fn is_disabled(&self) -> bool {
        self.max_alerts <= 0 || self.period_seconds <= 0
    }

    pub fn parse(raw: &Value) -> Result<Self, ConfigParseError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| ConfigParseError::Throttle(e.to_string()))
    }
}

/// Local-time suppression window for a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub bypass_critical: bool,
    /// 0 = Sunday .. 6 = Saturday. Empty means "all days".
    #[serde(default)]
    pub days_of_week: Vec<u8>,
}

impl QuietHoursConfig {
    pub fn parse(raw: &Value) -> Result<Self, ConfigParseError> {
        serde_json::from_value(raw.clone())
            .map_err(|e| ConfigParseError::QuietHours(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMode {
    Immediate,
    Hourly,
    Daily,
}

/// Per-channel digest delivery policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestConfig {
    pub mode: DigestMode,
    /// "MM" for hourly, "HH:MM" for daily. Unused for immediate mode.
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub bypass_critical: bool,
    #[serde(default)]
    pub send_empty: bool,
    #[serde(default)]
    pub severities: Vec<Severity>,
}

impl DigestConfig {
    pub fn parse(raw: &Value) -> Result<Self, ConfigParseError> {
        serde_json::from_value(raw.clone()).map_err(|e| ConfigParseError::Digest(e.to_string()))
    }

    /// Decides whether to defer an alert into the digest queue.
    pub fn should_queue(&self, severity: Severity) -> bool {
        if self.mode == DigestMode::Immediate {
            return false;
        }
        if self.bypass_critical && severity == Severity::Critical {
            return false;
        }
        if !self.severities.is_empty() && !self.severities.contains(&severity) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn throttle_config_roundtrips() {
        let cfg = ThrottleConfig {
            max_alerts: 3,
            period_seconds: 60,
            group_by_field: Some("device_id".into()),
        };
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(ThrottleConfig::parse(&value).unwrap(), cfg);
    }

    #[test]
    fn throttle_disabled_when_non_positive() {
        let cfg = ThrottleConfig {
            max_alerts: 0,
            period_seconds: 60,
            group_by_field: None,
        };
        assert!(cfg.is_disabled());
    }

    #[test]
    fn throttle_parse_error_on_missing_required_field() {
        let raw = json!({"max_alerts": 3});
        assert!(ThrottleConfig::parse(&raw).is_err());
    }

    #[test]
    fn quiet_hours_config_roundtrips() {
        let cfg = QuietHoursConfig {
            start_time: "22:00".into(),
            end_time: "07:00".into(),
            timezone: "America/Chicago".into(),
            bypass_critical: true,
            days_of_week: vec![1, 2, 3, 4, 5],
        };
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(QuietHoursConfig::parse(&value).unwrap(), cfg);
    }

    #[test]
    fn digest_config_roundtrips() {
        let cfg = DigestConfig {
            mode: DigestMode::Hourly,
            schedule: Some("15".into()),
            timezone: "UTC".into(),
            bypass_critical: true,
            send_empty: false,
            severities: vec![Severity::Warning, Severity::Critical],
        };
        let value = serde_json::to_value(&cfg).unwrap();
        assert_eq!(DigestConfig::parse(&value).unwrap(), cfg);
    }

    #[test]
    fn should_queue_false_for_immediate_mode() {
        let cfg = DigestConfig {
            mode: DigestMode::Immediate,
            schedule: None,
            timezone: default_timezone(),
            bypass_critical: false,
            send_empty: false,
            severities: vec![],
        };
        assert!(!cfg.should_queue(Severity::Warning));
    }

    #[test]
    fn should_queue_false_when_bypass_critical_and_severity_critical() {
        let cfg = DigestConfig {
            mode: DigestMode::Hourly,
            schedule: Some("0".into()),
            timezone: default_timezone(),
            bypass_critical: true,
            send_empty: false,
            severities: vec![],
        };
        assert!(!cfg.should_queue(Severity::Critical));
        assert!(cfg.should_queue(Severity::Warning));
    }

    #[test]
    fn should_queue_false_when_severities_list_excludes_severity() {
        let cfg = DigestConfig {
            mode: DigestMode::Daily,
            schedule: Some("09:00".into()),
            timezone: default_timezone(),
            bypass_critical: false,
            send_empty: false,
            severities: vec![Severity::Critical],
        };
        assert!(!cfg.should_queue(Severity::Warning));
        assert!(cfg.should_queue(Severity::Critical));
    }
}
