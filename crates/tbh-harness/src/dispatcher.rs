//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Control loop arbitrating advance, failure and finish notifications."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::time::Duration;

use tbh_common::TimingConfig;
use tbh_logging::{tbh_debug, tbh_error, tbh_info, tbh_warn, LogContext};
use tokio::time::Instant;

use crate::context::{HarnessContext, ReturnCode};
use crate::sequencer::Sequencer;
use crate::signal::Signal;

/// The single loop that owns the aggregate result.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    heartbeat: Duration,
    scenario_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Build a dispatcher from timing configuration.
    pub fn from_config(timing: &TimingConfig) -> Self {
        Self {
            heartbeat: timing.dispatch_heartbeat,
            scenario_timeout: timing.scenario_timeout,
        }
    }

    /// Seed the first scenario and dispatch notifications until the run ends.
    pub async fn run(&self, ctx: &mut HarnessContext, sequencer: &mut Sequencer) -> ReturnCode {
        if let Err(err) = ctx.signals.raise(Signal::ScenarioAdvance) {
            tbh_warn!("initial advance not delivered: {err}");
        }

        loop {
            let signal = ctx.signals.wait(Some(self.heartbeat)).await;
            match signal {
                Some(Signal::ProcessFailed(report)) => {
                    let scenario = sequencer.active_label().unwrap_or_default();
                    let log_ctx = LogContext::new()
                        .with_scenario(ctx.scenario_index(), scenario)
                        .with_role(&report.label);
                    tbh_error!(context = log_ctx, "process failure: {}", report.details);
                    ctx.mark_failed();
                    sequencer.abort(&format!("{} failed: {}", report.label, report.details));
                    break;
                }
                Some(Signal::HarnessFinished) => {
                    tbh_info!("harness finished with return code {}", ctx.return_code());
                    break;
                }
                Some(Signal::ScenarioAdvance) => {
                    tbh_debug!("scenario advance received");
                    sequencer.advance(ctx);
                }
                None => {
                    if let Some(elapsed) = self.timed_out(sequencer) {
                        let reason = format!(
                            "scenario timed out after {} ms in state {}",
                            elapsed.as_millis(),
                            sequencer.state()
                        );
                        tbh_error!("{reason}");
                        ctx.mark_failed();
                        sequencer.abort(&reason);
                        break;
                    }
                    tbh_debug!("dispatcher idle, sequencer {}", sequencer.state());
                }
            }
        }
        ctx.return_code()
    }

    fn timed_out(&self, sequencer: &Sequencer) -> Option<Duration> {
        let limit = self.scenario_timeout?;
        let (_, started) = sequencer.active_since()?;
        let elapsed = Instant::now().saturating_duration_since(started);
        (elapsed >= limit).then_some(elapsed)
    }
}
