//! ---
//! tbh_section: "03-logging"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Structured logging context and sinks."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Log context shared by the sequencer, dispatcher and process supervision so
//! every event names the scenario and the side it concerns.

use tracing::Level;

/// Context-aware logging macros (`tbh_info!`, `tbh_debug!`, `tbh_warn!`, `tbh_error!`).
pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Scenario label (e.g. `timebase-master`).
    pub scenario: Option<&'a str>,
    /// Position of the scenario in the fixed catalogue.
    pub index: Option<usize>,
    /// Process role tag (e.g. `reference-engine`, `test-binary:bbt-relocation-listener`).
    pub role: Option<&'a str>,
    /// Control endpoint the event concerns.
    pub endpoint: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a scenario label and its index.
    pub fn with_scenario(mut self, index: usize, scenario: &'a str) -> Self {
        self.index = Some(index);
        self.scenario = Some(scenario);
        self
    }

    /// Attach a process role tag.
    pub fn with_role(mut self, role: &'a str) -> Self {
        self.role = Some(role);
        self
    }

    /// Attach an endpoint descriptor.
    pub fn with_endpoint(mut self, endpoint: &'a str) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

/// Outcome attached to lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition is part of normal progress.
    Success,
    /// The transition results from a failure or abort.
    Fault,
}

impl TransitionOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Success => "success",
            TransitionOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized state-transition event with a success/fault outcome.
pub fn log_transition(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: TransitionOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    // `tracing::event!` needs a constant level, hence the two arms.
    match outcome {
        TransitionOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            scenario = ctx.scenario.unwrap_or(""),
            index = ctx.index.map(|i| i as i64).unwrap_or(-1),
            role = ctx.role.unwrap_or(""),
            endpoint = ctx.endpoint.unwrap_or(""),
            message = %message
        ),
        TransitionOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            scenario = ctx.scenario.unwrap_or(""),
            index = ctx.index.map(|i| i as i64).unwrap_or(-1),
            role = ctx.role.unwrap_or(""),
            endpoint = ctx.endpoint.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_scenario(1, "timebase-master")
            .with_role("test-binary:timebase-master");
        tbh_info!(context = ctx, "process launched");
        tbh_debug!("debug message");
        tbh_warn!(context = ctx.with_endpoint("primary:8099"), "send failed");
        tbh_error!(context = ctx, "exit code: {}", 3);
    }

    #[test]
    fn transition_helper_emits() {
        init();
        let ctx = LogContext::new().with_scenario(0, "non-timebase");
        log_transition(
            Some(&ctx),
            "sequencer.launching",
            "launching scenario processes",
            TransitionOutcome::Success,
        );
        log_transition(
            None,
            "sequencer.aborted",
            "process failure observed",
            TransitionOutcome::Fault,
        );
    }
}
