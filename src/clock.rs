//! Clock abstraction — every time-sensitive decision consults this instead
//! of reading the system clock directly.
//!
//! Every time-sensitive component holds an `Arc<dyn Clock>` injected at
//! construction: no component in this crate calls `chrono::Utc::now()`
//! or `Instant::now()` on its own.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Monotonic "now" source.
///
/// Implementations must be cheap to call and safe to share across threads;
/// every component that needs the time holds an `Arc<dyn Clock>`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests. Holds a settable instant that only moves
/// when `advance` or `set` is called.
#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `delta`. Returns the new instant.
    pub fn advance(&self, delta: Duration) -> DateTime<Utc> {
        let mut guard = self.now.lock().expect("test clock mutex poisoned");
        *guard += delta;
        *guard
    }

    /// Jumps the clock to an arbitrary instant (forward or backward).
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut guard = self.now.lock().expect("test clock mutex poisoned");
        *guard = instant;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("test clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_returns_plausible_time() {
        let clock = SystemClock;
        let now = clock.now();
        assert!(now.timestamp() > 1_700_000_000);
    }

    #[test]
    fn test_clock_advances_atomically() {
        let start = "2026-01-01T00:00:00Z".parse().unwrap();
        let clock = TestClock::new(start);
        assert_eq!(clock.now(), start);
        let next = clock.advance(Duration::seconds(30));
        assert_eq!(next, start + Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }

    #[test]
    fn test_clock_set_jumps_to_instant() {
        let start = "2026-01-01T00:00:00Z".parse().unwrap();
        let clock = TestClock::new(start);
        let target = "2026-06-15T12:00:00Z".parse().unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
