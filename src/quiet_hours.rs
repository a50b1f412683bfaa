//! Quiet-hours filter — a deterministic predicate over
//! `(config, severity, now)`. No internal state; mirrors
//! `crate::conditions` in being a pure function module.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::model::{QuietHoursConfig, Severity};

/// Decides whether an alert of `severity` at `now` falls inside the quiet-hours window.
pub fn should_suppress(
    config: &QuietHoursConfig,
    severity: Severity,
    now: DateTime<Utc>,
) -> (bool, String) {
    if config.start_time.is_empty() || config.end_time.is_empty() {
        return (false, String::new());
    }

    if config.bypass_critical && severity == Severity::Critical {
        return (false, "critical bypasses quiet hours".to_string());
    }

    let tz = resolve_timezone(&config.timezone);
    let local_now = now.with_timezone(&tz);

    if !config.days_of_week.is_empty() {
        let weekday = sunday_indexed_weekday(local_now.weekday());
        if !config.days_of_week.contains(&weekday) {
            return (
                false,
                format!("quiet hours not active on {}", local_now.format("%A")),
            );
        }
    }

    let (Some(start), Some(end)) = (
        parse_hhmm(&config.start_time),
        parse_hhmm(&config.end_time),
    ) else {
        return (false, String::new());
    };

    let now_min = local_now.hour() * 60 + local_now.minute();
    let start_min = start.0 as u32 * 60 + start.1 as u32;
    let end_min = end.0 as u32 * 60 + end.1 as u32;

    let in_range = if start_min <= end_min {
        start_min <= now_min && now_min < end_min
    } else {
        now_min >= start_min || now_min < end_min
    };

    if in_range {
        (
            true,
            format!(
                "quiet hours active ({}-{} {})",
                config.start_time, config.end_time, config.timezone
            ),
        )
    } else {
        (false, String::new())
    }
}

/// The next instant after `now` that leaves the
/// quiet-hours window.
pub fn next_delivery_time(config: &QuietHoursConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = resolve_timezone(&config.timezone);
    let local_now = now.with_timezone(&tz);

    let Some((hour, minute)) = parse_hhmm(&config.end_time) else {
        return now;
    };

    let today_end = local_now
        .date_naive()
        .and_hms_opt(hour as u32, minute as u32, 0)
        .expect("validated HH:MM");

    let candidate = match tz.from_local_datetime(&today_end) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => local_now,
    };

    let next_local = if candidate > local_now {
        candidate
    } else {
        candidate + Duration::days(1)
    };

    next_local.with_timezone(&Utc)
}

fn resolve_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = %name, "unknown IANA timezone, falling back to UTC");
        chrono_tz::UTC
    })
}

fn parse_hhmm(value: &str) -> Option<(u8, u8)> {
    let time = NaiveTime::parse_from_str(value, "%H:%M").ok()?;
    Some((time.hour() as u8, time.minute() as u8))
}

/// Remaps to a 0=Sunday .. 6=Saturday index; chrono's `Weekday` numbers
/// from Monday.
fn sunday_indexed_weekday(weekday: chrono::Weekday) -> u8 {
    match weekday {
        chrono::Weekday::Sun => 0,
        chrono::Weekday::Mon => 1,
        chrono::Weekday::Tue => 2,
        chrono::Weekday::Wed => 3,
        chrono::Weekday::Thu => 4,
        chrono::Weekday::Fri => 5,
        chrono::Weekday::Sat => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(start: &str, end: &str, bypass_critical: bool) -> QuietHoursConfig {
        QuietHoursConfig {
            start_time: start.to_string(),
            end_time: end.to_string(),
            timezone: "UTC".to_string(),
            bypass_critical,
            days_of_week: vec![],
        }
    }

    #[test]
    fn empty_start_or_end_never_suppresses() {
        let cfg = config("", "07:00", true);
        assert_eq!(
            should_suppress(&cfg, Severity::Warning, Utc::now()),
            (false, String::new())
        );
    }

    #[test]
    fn overnight_window_suppresses_except_when_critical_bypass_applies() {
        let cfg = config("22:00", "07:00", true);

        // Tuesday 23:00 UTC
        let tuesday_2300: DateTime<Utc> = "2026-01-06T23:00:00Z".parse().unwrap();
        let (suppress, _) = should_suppress(&cfg, Severity::Warning, tuesday_2300);
        assert!(suppress);
        let (suppress, reason) = should_suppress(&cfg, Severity::Critical, tuesday_2300);
        assert!(!suppress);
        assert_eq!(reason, "critical bypasses quiet hours");

        // Tuesday noon UTC
        let tuesday_noon: DateTime<Utc> = "2026-01-06T12:00:00Z".parse().unwrap();
        assert_eq!(should_suppress(&cfg, Severity::Warning, tuesday_noon).0, false);
    }

    #[test]
    fn days_of_week_restricts_suppression_to_listed_days() {
        let mut cfg = config("22:00", "07:00", true);
        cfg.days_of_week = vec![1, 2, 3, 4, 5];

        // Saturday 23:00 UTC
        let saturday_2300: DateTime<Utc> = "2026-01-03T23:00:00Z".parse().unwrap();
        let (suppress, reason) = should_suppress(&cfg, Severity::Warning, saturday_2300);
        assert!(!suppress);
        assert!(reason.contains("Saturday"));
    }

    #[test]
    fn bypass_critical_never_suppresses_critical_severity() {
        let cfg = config("00:00", "23:59", true);
        for hour in 0..24 {
            let now: DateTime<Utc> =
                format!("2026-01-06T{hour:02}:30:00Z").parse().unwrap();
            assert!(!should_suppress(&cfg, Severity::Critical, now).0);
        }
    }

    #[test]
    fn overnight_range_boundary_at_midnight() {
        let cfg = config("22:00", "07:00", false);
        // exactly at start -> in range
        let at_start: DateTime<Utc> = "2026-01-06T22:00:00Z".parse().unwrap();
        assert!(should_suppress(&cfg, Severity::Warning, at_start).0);
        // exactly at end -> out of range (half-open interval)
        let at_end: DateTime<Utc> = "2026-01-07T07:00:00Z".parse().unwrap();
        assert!(!should_suppress(&cfg, Severity::Warning, at_end).0);
        // one minute before end -> still in range
        let before_end: DateTime<Utc> = "2026-01-07T06:59:00Z".parse().unwrap();
        assert!(should_suppress(&cfg, Severity::Warning, before_end).0);
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let mut cfg = config("22:00", "07:00", false);
        cfg.timezone = "Not/A/Real/Zone".to_string();
        let now: DateTime<Utc> = "2026-01-06T23:00:00Z".parse().unwrap();
        assert!(should_suppress(&cfg, Severity::Warning, now).0);
    }

    #[test]
    fn next_delivery_time_is_todays_end_when_future() {
        let cfg = config("22:00", "07:00", false);
        let now: DateTime<Utc> = "2026-01-06T23:00:00Z".parse().unwrap();
        let next = next_delivery_time(&cfg, now);
        assert_eq!(next, "2026-01-07T07:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn next_delivery_time_rolls_to_tomorrow_when_end_already_passed() {
        let cfg = config("22:00", "07:00", false);
        let now: DateTime<Utc> = "2026-01-07T08:00:00Z".parse().unwrap();
        let next = next_delivery_time(&cfg, now);
        assert_eq!(next, "2026-01-08T07:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }
}
