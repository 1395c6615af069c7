//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Scenario sequencing, failure dispatch and teardown."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Test-sequencing and process-lifecycle coordination for the Timebase
//! integration harness.
//!
//! [`Harness::run`] seeds the first scenario, lets the [`Dispatcher`] drive the
//! [`Sequencer`] until every scenario passed or a failure was observed, then
//! always runs the [`Teardown`] before returning a [`RunReport`].

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tbh_common::HarnessConfig;
use tbh_control::Transport;
use tbh_logging::{tbh_info, tbh_warn};
use tbh_process::Launcher;

pub mod commands;
pub mod context;
pub mod dispatcher;
pub mod preflight;
pub mod report;
pub mod scenario;
pub mod sequencer;
pub mod signal;
pub mod teardown;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{HarnessContext, ReturnCode, TaskSet};
pub use dispatcher::Dispatcher;
pub use preflight::{check as preflight, look_path, ResolvedBinaries};
pub use report::{ControlSummary, RunReport};
pub use scenario::{catalogue, ScenarioDefinition, ScriptStep, TestBinary, TimebaseRole};
pub use sequencer::{ScenarioOutcome, ScenarioRecord, Sequencer, SequencerState};
pub use signal::{FailureReport, Signal, SignalBoard, SignalError, SignalKind};
pub use teardown::{QuitRecord, Teardown, TeardownReport};

/// Shared result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors surfaced outside the dispatcher loop.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A required executable is not on disk.
    #[error("{role} executable not found: {}", .path.display())]
    ExecutableMissing {
        /// Which executable.
        role: &'static str,
        /// Path or bare name that was looked up.
        path: PathBuf,
    },
    /// The run summary could not be written.
    #[error("failed to write run report to {}: {source}", .path.display())]
    Report {
        /// Destination file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The run summary could not be serialised.
    #[error("failed to serialise run report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One harness run over a scenario list.
pub struct Harness {
    config: HarnessConfig,
    launcher: Arc<dyn Launcher>,
    transport: Arc<dyn Transport>,
    scenarios: Vec<ScenarioDefinition>,
    signals: Arc<SignalBoard>,
}

impl Harness {
    /// Prepare a run of the fixed catalogue.
    pub fn new(
        config: HarnessConfig,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            launcher,
            transport,
            scenarios: catalogue().to_vec(),
            signals: Arc::new(SignalBoard::new()),
        }
    }

    /// Replace the scenario list.
    pub fn with_scenarios(mut self, scenarios: Vec<ScenarioDefinition>) -> Self {
        self.scenarios = scenarios;
        self
    }

    /// Notification board of this run, for raising external failures such as
    /// an operator interrupt.
    pub fn signals(&self) -> Arc<SignalBoard> {
        self.signals.clone()
    }

    /// Run every scenario, then tear down. Teardown runs exactly once.
    pub async fn run(self) -> RunReport {
        let started_at = Utc::now();
        let catalogue_len = self.scenarios.len();
        let mut ctx = HarnessContext::new(self.config, self.launcher, self.transport, self.signals);
        let mut sequencer = Sequencer::new(self.scenarios);

        tbh_info!("starting {catalogue_len} scenarios");
        let return_code = Dispatcher::from_config(&ctx.config.timing)
            .run(&mut ctx, &mut sequencer)
            .await;
        let teardown = Teardown::from_config(&ctx.config.timing).run(&ctx).await;
        if teardown.aborted > 0 {
            tbh_warn!("{} tasks outlived teardown", teardown.aborted);
        }

        RunReport {
            started_at,
            finished_at: Utc::now(),
            return_code,
            catalogue_len,
            scenarios: sequencer.into_records(),
            control: ctx.control.metrics().into(),
            teardown,
        }
    }
}
