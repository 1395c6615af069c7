//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Harness-wide state passed to the dispatcher, sequencer and teardown."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tbh_common::HarnessConfig;
use tbh_control::{ControlClient, EndpointSet, Transport};
use tbh_process::Launcher;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::signal::SignalBoard;

/// Aggregate result of a harness run, used as the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReturnCode {
    /// Every scenario passed.
    Success,
    /// A process failure (or scenario timeout) was observed.
    Failure,
    /// A precondition failed before anything was launched.
    Precondition,
}

impl ReturnCode {
    /// Numeric exit code.
    pub fn code(self) -> u8 {
        match self {
            ReturnCode::Success => 0,
            ReturnCode::Failure => 1,
            ReturnCode::Precondition => 2,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Background tasks spawned on behalf of the run, reaped at teardown.
#[derive(Clone, Default)]
pub struct TaskSet {
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TaskSet {
    /// Track a spawned task.
    pub fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Number of tracked tasks that have not finished yet.
    pub fn live(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Await every tracked task until `deadline`, aborting stragglers.
    ///
    /// Returns `(reaped, aborted)`.
    pub async fn reap(&self, within: Duration) -> (usize, usize) {
        let deadline = Instant::now() + within;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut reaped = 0;
        let mut aborted = 0;
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(_) => reaped += 1,
                Err(_) => {
                    abort.abort();
                    aborted += 1;
                }
            }
        }
        (reaped, aborted)
    }
}

/// Everything the dispatcher, sequencer and teardown share.
///
/// Only the dispatcher loop and the advance handler it calls mutate the
/// scenario index and the return code.
pub struct HarnessContext {
    /// Effective configuration.
    pub config: Arc<HarnessConfig>,
    /// Control endpoints of the three engines.
    pub endpoints: EndpointSet,
    /// Settle-paced control client.
    pub control: ControlClient,
    /// Notification board.
    pub signals: Arc<SignalBoard>,
    /// Process launcher.
    pub launcher: Arc<dyn Launcher>,
    /// Background tasks to reap at teardown.
    pub tasks: TaskSet,
    cancel: watch::Sender<bool>,
    return_code: ReturnCode,
    scenario_index: usize,
}

impl HarnessContext {
    /// Assemble the context for one run.
    pub fn new(
        config: HarnessConfig,
        launcher: Arc<dyn Launcher>,
        transport: Arc<dyn Transport>,
        signals: Arc<SignalBoard>,
    ) -> Self {
        let endpoints = EndpointSet::from_config(&config.endpoints);
        let control = ControlClient::new(transport, config.timing.settle_interval);
        let (cancel, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            endpoints,
            control,
            signals,
            launcher,
            tasks: TaskSet::default(),
            cancel,
            return_code: ReturnCode::Success,
            scenario_index: 0,
        }
    }

    /// Receiver handed to every launched process.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Raise the harness-wide cancellation.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Current aggregate return code.
    pub fn return_code(&self) -> ReturnCode {
        self.return_code
    }

    /// Record a failure; the code never returns to success afterwards.
    pub fn mark_failed(&mut self) {
        self.return_code = ReturnCode::Failure;
    }

    /// Index of the scenario most recently started.
    pub fn scenario_index(&self) -> usize {
        self.scenario_index
    }

    pub(crate) fn set_scenario_index(&mut self, index: usize) {
        self.scenario_index = index;
    }
}
