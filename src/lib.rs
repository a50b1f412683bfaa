//! Alert engine core: the decision pipeline that turns typed infrastructure
//! events into a disciplined stream of user-visible alerts and outbound
//! digests.
//!
//! ## Pipeline
//!
//! `bus -> engine.handle -> storm detector (may drop) -> matching rules`,
//! then `condition evaluation -> throttle -> quiet hours -> persist + publish`.
//!
//! - [`storm`]: global sliding-window storm breaker, gates every event.
//! - [`conditions`]: pure `(conditions, event_data) -> bool` evaluator.
//! - [`throttle`]: per-rule, per-group sliding-window rate limiter.
//! - [`quiet_hours`]: local-time suppression window predicate.
//! - [`queue`] / [`digest`] / [`scheduler`]: suppressed-alert aggregation
//!   and scheduled delivery.
//! - [`cache`]: in-memory index of enabled rules, refreshed on bus events.
//! - [`engine`]: the orchestrator wiring all of the above together.
//!
//! The event bus, persistent store, notification dispatcher, and
//! escalation engine are external collaborators the engine is generic
//! over — see [`bus::EventBus`], [`store::AlertStore`],
//! [`dispatcher::Dispatcher`], and [`escalation::EscalationEngine`].

pub mod bus;
pub mod cache;
pub mod clock;
pub mod conditions;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod model;
pub mod notification;
pub mod queue;
pub mod quiet_hours;
pub mod scheduler;
pub mod storm;
pub mod store;
pub mod throttle;

pub use clock::{Clock, SystemClock, TestClock};
pub use engine::{AlertEngine, EngineSettings};
pub use model::{
    Alert, Condition, DigestConfig, DigestEntry, Event, EventPriority, Operator, QueuedAlert,
    QuietHoursConfig, Rule, Severity, SuppressionTally, ThrottleConfig,
};
