//! Notification rendering — turns a compiled digest or an immediate alert
//! into the payload shape a given channel type expects. The dispatcher
//! consumes these; the core never talks to a channel transport directly.

use serde::Serialize;
use serde_json::Value;

use crate::digest::CompiledDigest;
use crate::model::{Alert, Severity};

/// A rendered message ready for a `Dispatcher`. `html`/`text` are populated
/// for email-style channels; `structured` carries the machine-readable
/// form webhook channels expect; `summary` is the generic plain-text
/// fallback every channel type can show.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub subject: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
}

/// Renders an immediate single-alert notification (the `bypass_critical`
/// path: a CRITICAL alert fires right away in addition to the digest
/// entry recorded for history).
pub fn render_alert(alert: &Alert) -> Notification {
    Notification {
        subject: alert.title.clone(),
        summary: format!("{}: {}", alert.title, alert.message),
        html: Some(format!(
            "<h2>{}</h2><p>{}</p>",
            html_escape(&alert.title),
            html_escape(&alert.message)
        )),
        text: Some(format!("{}\n\n{}", alert.title, alert.message)),
        structured: Some(serde_json::json!({
            "alert_id": alert.id,
            "rule_id": alert.rule_id,
            "severity": alert.severity,
            "title": alert.title,
            "message": alert.message,
            "device_id": alert.device_id,
        })),
    }
}

/// Renders a compiled digest for a given channel type. Every rendering
/// includes the digest id, counts, and time range.
pub fn render_digest(digest: &CompiledDigest, channel_type: &str) -> Notification {
    let subject = format!(
        "Digest {} — {} alert(s) from {} to {}",
        digest.digest_id,
        digest.entries.len(),
        digest.oldest.format("%Y-%m-%d %H:%M UTC"),
        digest.newest.format("%Y-%m-%d %H:%M UTC")
    );
    let counts_line = format_severity_counts(&digest.severity_counts);

    match channel_type {
        "email" => Notification {
            subject: subject.clone(),
            summary: format!("{subject} ({counts_line})"),
            html: Some(render_digest_html(digest, &counts_line)),
            text: Some(render_digest_text(digest, &counts_line)),
            structured: None,
        },
        "webhook" => Notification {
            subject: subject.clone(),
            summary: format!("{subject} ({counts_line})"),
            html: None,
            text: None,
            structured: Some(serde_json::json!({
                "digest_id": digest.digest_id,
                "severity_counts": counts_as_map(&digest.severity_counts),
                "oldest": digest.oldest,
                "newest": digest.newest,
                "alerts": digest.entries.iter().map(|e| serde_json::json!({
                    "alert_id": e.alert_id,
                    "rule_id": e.rule_id,
                    "severity": e.severity,
                    "title": e.title,
                    "message": e.message,
                })).collect::<Vec<_>>(),
            })),
        },
        _ => Notification {
            subject: subject.clone(),
            summary: render_digest_text(digest, &counts_line),
            html: None,
            text: None,
            structured: None,
        },
    }
}

/// Boilerplate "all clear" notification for `handle_empty_digest`.
pub fn render_empty_digest_notice(channel_id: &str) -> Notification {
    let summary = format!("No alerts to report for channel {channel_id} this period.");
    Notification {
        subject: "All clear".to_string(),
        summary: summary.clone(),
        html: Some(format!("<p>{}</p>", html_escape(&summary))),
        text: Some(summary),
        structured: None,
    }
}

fn render_digest_html(digest: &CompiledDigest, counts_line: &str) -> String {
    let mut rows = String::new();
    for entry in &digest.entries {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            entry.severity,
            html_escape(&entry.title),
            html_escape(&entry.message)
        ));
    }
    format!(
        "<h2>Digest {}</h2><p>{}</p><table>{}</table>",
        digest.digest_id, counts_line, rows
    )
}

fn render_digest_text(digest: &CompiledDigest, counts_line: &str) -> String {
    let mut lines = vec![format!("Digest {} — {}", digest.digest_id, counts_line)];
    for entry in &digest.entries {
        lines.push(format!("[{}] {} — {}", entry.severity, entry.title, entry.message));
    }
    lines.join("\n")
}

fn format_severity_counts(counts: &[(Severity, usize)]) -> String {
    counts
        .iter()
        .map(|(sev, n)| format!("{sev}: {n}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn counts_as_map(counts: &[(Severity, usize)]) -> Value {
    let mut map = serde_json::Map::new();
    for (sev, n) in counts {
        map.insert(sev.to_string().to_lowercase(), Value::from(*n));
    }
    Value::Object(map)
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::CompiledDigestEntry;

    fn digest() -> CompiledDigest {
        CompiledDigest {
            digest_id: "digest-1".into(),
            severity_counts: vec![(Severity::Critical, 5), (Severity::Warning, 8), (Severity::Info, 2)],
            oldest: "2026-01-01T00:00:00Z".parse().unwrap(),
            newest: "2026-01-01T00:10:00Z".parse().unwrap(),
            entries: vec![CompiledDigestEntry {
                entry_id: "e1".into(),
                alert_id: "a1".into(),
                rule_id: "r1".into(),
                severity: Severity::Critical,
                title: "CRITICAL: Router offline".into(),
                message: "msg".into(),
            }],
        }
    }

    #[test]
    fn email_rendering_includes_html_and_text() {
        let notification = render_digest(&digest(), "email");
        assert!(notification.html.is_some());
        assert!(notification.text.is_some());
        assert!(notification.subject.contains("digest-1"));
    }

    #[test]
    fn webhook_rendering_is_structured() {
        let notification = render_digest(&digest(), "webhook");
        let structured = notification.structured.expect("webhook notification must be structured");
        assert_eq!(structured["digest_id"], "digest-1");
        assert_eq!(structured["alerts"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn generic_rendering_is_plain_text_summary() {
        let notification = render_digest(&digest(), "sms");
        assert!(notification.html.is_none());
        assert!(notification.structured.is_none());
        assert!(notification.summary.contains("Router offline"));
    }
}
