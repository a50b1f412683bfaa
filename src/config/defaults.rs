//! Default tunables for the alert engine, centralized so the config loader
//! and the engine's own `Default` impls never drift apart.

// ============================================================================
// Alert Engine
// ============================================================================

/// Storm detector: event count within `storm_window_seconds` that trips
/// the breaker for a rule.
pub const fn storm_threshold() -> usize {
    100
}

/// Storm detector: sliding window width (seconds).
pub const fn storm_window_seconds() -> i64 {
    60
}

/// Storm detector: once tripped, how long the breaker stays open (seconds).
pub const fn storm_cooldown_seconds() -> i64 {
    300
}

/// How often the throttle manager drains and publishes summary events
/// for rules that suppressed at least one alert (seconds).
pub const fn throttle_summary_interval_secs() -> u64 {
    300
}

/// Tick interval for the in-memory digest fallback worker, used only when
/// no `DigestService` is configured (seconds).
pub const fn digest_worker_tick_secs() -> u64 {
    60
}

/// Per-attempt timeout for a scheduled digest delivery (seconds).
pub const fn digest_delivery_timeout_secs() -> u64 {
    30
}
