//! Crate-wide leaf error types.
//!
//! Small `thiserror`-derived enums at leaf boundaries (one per subsystem:
//! conditions, config parsing, throttling, the store, digests), with
//! `anyhow::Result` used by orchestration call sites that only need to
//! propagate or attach context.

use thiserror::Error;

/// A condition could not be evaluated as specified.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("condition list is not a JSON array")]
    NotAnArray,
    #[error("condition at index {0} is malformed: {1}")]
    MalformedCondition(usize, String),
    #[error("unknown operator {0:?}")]
    UnknownOperator(String),
}

/// A rule's stored throttle/quiet-hours/digest config blob failed to parse.
#[derive(Debug, Error)]
pub enum ConfigParseError {
    #[error("throttle config: {0}")]
    Throttle(String),
    #[error("quiet-hours config: {0}")]
    QuietHours(String),
    #[error("digest config: {0}")]
    Digest(String),
}

/// Throttle-manager-local failures. The engine treats any of these as
/// "throttling disabled for this rule" and logs a warning.
#[derive(Debug, Error)]
pub enum ThrottleError {
    #[error("invalid throttle config: max_alerts and period_seconds must be positive")]
    InvalidConfig,
    #[error("group key could not be derived from event data: {0}")]
    BadGroupKey(String),
}

/// Store-layer failures, surfaced to whichever call site can recover.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("not found")]
    NotFound,
}

/// Digest-service failures.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("all {0} dispatch attempt(s) failed for channel {1}")]
    AllDispatchesFailed(usize, String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
