//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Quit broadcast, grace period and cancellation at harness end."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::time::Duration;

use serde::Serialize;
use tbh_common::TimingConfig;
use tbh_control::{ControlMessage, EndpointRole, SendStatus};
use tbh_logging::{log_transition, tbh_info, LogContext, TransitionOutcome};
use tbh_process::DRAIN_TIMEOUT;
use tokio::time::Instant;

use crate::context::HarnessContext;
use crate::report::duration_ms;

/// Quit delivery to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuitRecord {
    /// Endpoint role.
    pub role: EndpointRole,
    /// Control port.
    pub port: u16,
    /// Whether the transport accepted the message.
    pub accepted: bool,
}

/// Summary of the teardown phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// One record per known endpoint, in send order.
    pub quit: Vec<QuitRecord>,
    /// Background tasks that finished after cancellation.
    pub reaped: usize,
    /// Background tasks aborted after the cancel grace.
    pub aborted: usize,
    /// Total teardown time.
    pub duration_ms: u64,
}

/// Runs once at harness end, on every path that launched something.
#[derive(Debug)]
pub struct Teardown {
    teardown_grace: Duration,
    cancel_grace: Duration,
}

impl Teardown {
    /// Build the coordinator from timing configuration.
    pub fn from_config(timing: &TimingConfig) -> Self {
        Self {
            teardown_grace: timing.teardown_grace,
            cancel_grace: timing.cancel_grace,
        }
    }

    /// Broadcast quit, wait the grace period, cancel and reap.
    ///
    /// Consumes the coordinator so a run cannot tear down twice.
    pub async fn run(self, ctx: &HarnessContext) -> TeardownReport {
        let started = Instant::now();
        log_transition(
            None,
            "teardown.start",
            &format!("return code {}", ctx.return_code()),
            TransitionOutcome::Success,
        );

        let mut quit = Vec::with_capacity(3);
        for endpoint in ctx.endpoints.all() {
            let target = endpoint.to_string();
            tbh_info!(
                context = LogContext::new().with_endpoint(&target),
                "sending {}",
                ControlMessage::Quit
            );
            let status = ctx.control.send(&endpoint, &ControlMessage::Quit).await;
            quit.push(QuitRecord {
                role: endpoint.role,
                port: endpoint.port(),
                accepted: status == SendStatus::Sent,
            });
        }

        tokio::time::sleep(self.teardown_grace).await;
        ctx.cancel();
        tokio::time::sleep(self.cancel_grace).await;
        tbh_info!("{} tasks still running after cancellation", ctx.tasks.live());
        // Watchers finish only after their process's pipes are drained.
        let (reaped, aborted) = ctx.tasks.reap(self.cancel_grace + DRAIN_TIMEOUT).await;

        let report = TeardownReport {
            quit,
            reaped,
            aborted,
            duration_ms: duration_ms(started.elapsed()),
        };
        log_transition(
            None,
            "teardown.finish",
            &format!(
                "{} tasks reaped, {} aborted in {} ms",
                report.reaped, report.aborted, report.duration_ms
            ),
            TransitionOutcome::Success,
        );
        report
    }
}
