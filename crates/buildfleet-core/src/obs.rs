//! Structured observability hooks for fleet poll lifecycle events.
//!
//! Emission goes through `tracing` at `info!` level; verbosity and format
//! are configured once via [`crate::telemetry::init_tracing`].

use tracing::info;

/// RAII guard that scopes tracing output to one poll cycle.
pub struct PollSpan {
    _span: tracing::span::EnteredSpan,
}

impl PollSpan {
    /// Create and enter a span tagged with the number of branch groups
    /// under consideration.
    pub fn enter(groups: usize) -> Self {
        let span = tracing::info_span!("fleet.poll", groups = groups);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a poll cycle started.
pub fn emit_poll_started(groups: usize) {
    info!(event = "poll.started", groups = groups);
}

/// Emit event: a branch group diverged and should trigger a build.
pub fn emit_trigger_detected(group: &str, trigger: &str) {
    info!(event = "poll.trigger", group = %group, trigger = %trigger);
}

/// Emit event: a poll cycle finished with the number of triggered groups.
pub fn emit_poll_finished(triggered: usize) {
    info!(event = "poll.finished", triggered = triggered);
}
