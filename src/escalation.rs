//! Escalation engine collaborator — out of this core's scope, treated as
//! an optional subsystem the engine starts only if configured. Kept as a
//! narrow capability trait, like `dispatcher::Dispatcher`, so the engine
//! can be built and tested without one.

use async_trait::async_trait;

use crate::model::Alert;

#[async_trait]
pub trait EscalationEngine: Send + Sync {
    /// Registers a fired alert so the escalation subsystem can track
    /// whether it gets acknowledged within its policy window.
    async fn track_alert(&self, alert: &Alert);

    /// Starts any background work the escalation subsystem needs.
    async fn start(&self) {}

    /// Stops background work; idempotent.
    async fn stop(&self) {}
}

/// No-op implementation used when the engine is built without escalation
/// configured.
#[derive(Debug, Default)]
pub struct NoopEscalationEngine;

#[async_trait]
impl EscalationEngine for NoopEscalationEngine {
    async fn track_alert(&self, _alert: &Alert) {}
}
