//! Storm detector — a global sliding-window counter with cooldown that
//! gates every event before any per-rule work happens. Guarded by a
//! single exclusive lock: checks are fast and infrequent enough that a
//! reader/writer split buys nothing (a lock shared across a small, infrequent hot path
//! does not need to be split.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
pub struct StormConfig {
    pub threshold: usize,
    pub window_seconds: i64,
    pub cooldown_seconds: i64,
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            window_seconds: 60,
            cooldown_seconds: 300,
        }
    }
}

#[derive(Debug, Default)]
struct StormState {
    timestamps: VecDeque<DateTime<Utc>>,
    in_storm: bool,
    storm_start: Option<DateTime<Utc>>,
    suppressed_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StormStatus {
    pub in_storm: bool,
    pub storm_start: Option<DateTime<Utc>>,
    pub suppressed_count: u64,
    /// events-in-window normalized to an events-per-minute rate
    pub current_rate: f64,
    pub cooldown_remaining: Option<Duration>,
}

#[derive(Debug)]
pub struct StormDetector {
    config: StormConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<StormState>,
}

impl StormDetector {
    pub fn new(config: StormConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(StormState::default()),
        }
    }

    /// Records one event; returns whether it should still be processed.
    pub fn record_event(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("storm detector mutex poisoned");

        let window_start = now - Duration::seconds(self.config.window_seconds);
        while matches!(state.timestamps.front(), Some(t) if *t < window_start) {
            state.timestamps.pop_front();
        }

        if state.in_storm {
            let storm_start = state.storm_start.expect("in_storm implies storm_start set");
            if now >= storm_start + Duration::seconds(self.config.cooldown_seconds) {
                state.in_storm = false;
                state.storm_start = None;
                state.suppressed_count = 0;
            } else {
                state.suppressed_count += 1;
                return false;
            }
        }

        state.timestamps.push_back(now);
        if state.timestamps.len() > self.config.threshold {
            state.in_storm = true;
            state.storm_start = Some(now);
            state.suppressed_count = 0;
            return false;
        }

        true
    }

    pub fn status(&self) -> StormStatus {
        let now = self.clock.now();
        let state = self.state.lock().expect("storm detector mutex poisoned");
        let current_rate =
            (state.timestamps.len() as f64 / self.config.window_seconds as f64) * 60.0;
        let cooldown_remaining = if state.in_storm {
            state.storm_start.map(|start| {
                let end = start + Duration::seconds(self.config.cooldown_seconds);
                (end - now).max(Duration::zero())
            })
        } else {
            None
        };

        StormStatus {
            in_storm: state.in_storm,
            storm_start: state.storm_start,
            suppressed_count: state.suppressed_count,
            current_rate,
            cooldown_remaining,
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().expect("storm detector mutex poisoned");
        *state = StormState::default();
    }
}
