//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Scenario state machine: launch, script, await result."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
//! Walks the scenario list one entry at a time.
//!
//! Each advance starts a driver task for the next scenario. The driver
//! launches the scenario's processes, waits out the startup budget, sends the
//! script and raises exactly one scenario-advance once every test binary it
//! launched has exited cleanly. Process failures are raised by per-process
//! watcher tasks as soon as they are observed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tbh_common::HarnessConfig;
use tbh_control::{ControlClient, EndpointSet};
use tbh_logging::{log_transition, tbh_error, tbh_info, tbh_warn, LogContext, TransitionOutcome};
use tbh_process::{CompletionState, LaunchSpec, Launcher, ProcessExit};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::commands;
use crate::context::{HarnessContext, TaskSet};
use crate::report::duration_ms;
use crate::scenario::{ScenarioDefinition, ScriptStep};
use crate::signal::{FailureReport, Signal, SignalBoard};

/// Sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequencerState {
    /// No scenario started yet.
    Idle,
    /// Processes are starting; the startup budget is running.
    Launching,
    /// The control-message script is being sent.
    Scripting,
    /// Waiting for the driven processes to exit.
    AwaitingResult,
    /// Every scenario passed.
    Done,
    /// A failure ended the run.
    Aborted,
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SequencerState::Idle => "idle",
            SequencerState::Launching => "launching",
            SequencerState::Scripting => "scripting",
            SequencerState::AwaitingResult => "awaiting-result",
            SequencerState::Done => "done",
            SequencerState::Aborted => "aborted",
        })
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioOutcome {
    /// Every test binary exited cleanly.
    Passed,
    /// The run was aborted while the scenario was active.
    Failed,
}

/// Record of a started scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioRecord {
    /// Catalogue index.
    pub index: usize,
    /// Scenario label.
    pub label: String,
    /// Pass or fail.
    pub outcome: ScenarioOutcome,
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Time from start to pass or abort.
    pub duration_ms: u64,
    /// Failure diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

struct ActiveScenario {
    index: usize,
    label: &'static str,
    started: Instant,
    started_at: DateTime<Utc>,
    driver: JoinHandle<()>,
    phase: watch::Receiver<SequencerState>,
}

/// Scenario state machine.
pub struct Sequencer {
    scenarios: Vec<ScenarioDefinition>,
    next_index: usize,
    active: Option<ActiveScenario>,
    reference: Option<watch::Receiver<CompletionState>>,
    records: Vec<ScenarioRecord>,
    terminal: Option<SequencerState>,
}

impl Sequencer {
    /// Create a sequencer over `scenarios`, run in order.
    pub fn new(scenarios: Vec<ScenarioDefinition>) -> Self {
        Self {
            scenarios,
            next_index: 0,
            active: None,
            reference: None,
            records: Vec::new(),
            terminal: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SequencerState {
        if let Some(terminal) = self.terminal {
            return terminal;
        }
        match &self.active {
            Some(active) => *active.phase.borrow(),
            None => SequencerState::Idle,
        }
    }

    /// Index and start time of the active scenario.
    pub fn active_since(&self) -> Option<(usize, Instant)> {
        self.active.as_ref().map(|a| (a.index, a.started))
    }

    /// Label of the active scenario.
    pub fn active_label(&self) -> Option<&'static str> {
        self.active.as_ref().map(|a| a.label)
    }

    /// Consume the sequencer, yielding its records.
    pub fn into_records(self) -> Vec<ScenarioRecord> {
        self.records
    }

    /// Handle a scenario-advance notification.
    ///
    /// Marks the active scenario passed, then starts the next one or raises
    /// harness-finished when the list is exhausted.
    pub fn advance(&mut self, ctx: &mut HarnessContext) {
        if self.terminal.is_some() {
            tbh_warn!("advance ignored, sequencer is {}", self.state());
            return;
        }
        if let Some(active) = self.active.take() {
            self.close(active, ScenarioOutcome::Passed, None);
        }

        let index = self.next_index;
        let Some(scenario) = self.scenarios.get(index).cloned() else {
            self.terminal = Some(SequencerState::Done);
            log_transition(
                None,
                "sequencer.done",
                &format!("all {} scenarios passed", self.scenarios.len()),
                TransitionOutcome::Success,
            );
            if let Err(err) = ctx.signals.raise(Signal::HarnessFinished) {
                tbh_warn!("{err}");
            }
            return;
        };
        self.next_index += 1;
        ctx.set_scenario_index(index);

        let log_ctx = LogContext::new().with_scenario(index, scenario.label);
        log_transition(
            Some(&log_ctx),
            "sequencer.launching",
            scenario.description,
            TransitionOutcome::Success,
        );

        if scenario.requires_reference() && !self.reference_running() {
            self.reference = Some(launch_reference(ctx));
        }

        let (phase_tx, phase) = watch::channel(SequencerState::Launching);
        let driver = ScenarioDriver {
            scenario: scenario.clone(),
            config: ctx.config.clone(),
            endpoints: ctx.endpoints,
            control: ctx.control.clone(),
            signals: ctx.signals.clone(),
            launcher: ctx.launcher.clone(),
            tasks: ctx.tasks.clone(),
            cancel: ctx.cancel_receiver(),
            phase: phase_tx,
        };
        let driver = tokio::spawn(driver.run());
        self.active = Some(ActiveScenario {
            index,
            label: scenario.label,
            started: Instant::now(),
            started_at: Utc::now(),
            driver,
            phase,
        });
    }

    /// End the sequencer after a failure; the active scenario is marked failed.
    pub fn abort(&mut self, reason: &str) {
        if let Some(active) = self.active.take() {
            active.driver.abort();
            let log_ctx = LogContext::new().with_scenario(active.index, active.label);
            log_transition(
                Some(&log_ctx),
                "sequencer.aborted",
                reason,
                TransitionOutcome::Fault,
            );
            self.close(active, ScenarioOutcome::Failed, Some(reason.to_string()));
        } else {
            log_transition(None, "sequencer.aborted", reason, TransitionOutcome::Fault);
        }
        self.terminal = Some(SequencerState::Aborted);
    }

    fn close(&mut self, active: ActiveScenario, outcome: ScenarioOutcome, failure: Option<String>) {
        self.records.push(ScenarioRecord {
            index: active.index,
            label: active.label.to_string(),
            outcome,
            started_at: active.started_at,
            duration_ms: duration_ms(active.started.elapsed()),
            failure,
        });
    }

    fn reference_running(&self) -> bool {
        self.reference
            .as_ref()
            .is_some_and(|state| *state.borrow() == CompletionState::Running)
    }
}

fn launch_reference(ctx: &HarnessContext) -> watch::Receiver<CompletionState> {
    let spec = commands::reference_engine(&ctx.config, ctx.endpoints.reference.port());
    let handle = ctx.launcher.launch(spec, ctx.cancel_receiver());
    let state = handle.state_watch();
    let signals = ctx.signals.clone();
    ctx.tasks.track(tokio::spawn(async move {
        let exit = handle.wait().await;
        let log_ctx = LogContext::new().with_role(commands::REFERENCE_LABEL);
        if exit.is_failure() {
            report_failure(&signals, &log_ctx, &exit);
        } else {
            tbh_info!(context = log_ctx, "reference engine exited: {}", exit.details());
        }
    }));
    state
}

fn report_failure(signals: &SignalBoard, log_ctx: &LogContext<'_>, exit: &ProcessExit) {
    tbh_error!(context = *log_ctx, "process failed: {}", exit.details());
    let report = FailureReport::new(exit.label.clone(), exit.details());
    if let Err(err) = signals.raise(Signal::ProcessFailed(report)) {
        tbh_warn!(context = *log_ctx, "failure not delivered: {err}");
    }
}

struct ScenarioDriver {
    scenario: ScenarioDefinition,
    config: Arc<HarnessConfig>,
    endpoints: EndpointSet,
    control: ControlClient,
    signals: Arc<SignalBoard>,
    launcher: Arc<dyn Launcher>,
    tasks: TaskSet,
    cancel: watch::Receiver<bool>,
    phase: watch::Sender<SequencerState>,
}

impl ScenarioDriver {
    async fn run(self) {
        let log_ctx = LogContext::new().with_scenario(self.scenario.index, self.scenario.label);

        self.send_all(&self.scenario.prelude, &log_ctx).await;

        let mut exits = Vec::with_capacity(self.scenario.binaries.len());
        for binary in &self.scenario.binaries {
            let port = self.endpoints.get(binary.endpoint).port();
            let spec = commands::test_binary(&self.config, binary.label, port);
            tbh_info!(
                context = log_ctx.with_role(&spec.label),
                "launching {} as timebase {} on port {port}",
                binary.label,
                binary.timebase
            );
            exits.push(self.watch(spec, self.scenario.index, self.scenario.label));
        }

        tokio::time::sleep(self.startup_budget()).await;

        self.enter(SequencerState::Scripting, &log_ctx);
        self.send_all(&self.scenario.script, &log_ctx).await;

        self.enter(SequencerState::AwaitingResult, &log_ctx);
        let results = futures::future::join_all(exits).await;
        let all_clean = results
            .iter()
            .all(|result| matches!(result, Ok(exit) if exit.is_clean()));
        if all_clean {
            tbh_info!(context = log_ctx, "scenario passed");
            if let Err(err) = self.signals.raise(Signal::ScenarioAdvance) {
                tbh_warn!(context = log_ctx, "advance not delivered: {err}");
            }
        }
    }

    fn startup_budget(&self) -> Duration {
        self.config.timing.startup_budget
    }

    fn enter(&self, state: SequencerState, log_ctx: &LogContext<'_>) {
        self.phase.send_replace(state);
        log_transition(
            Some(log_ctx),
            &format!("sequencer.{state}"),
            &format!("scenario entered {state}"),
            TransitionOutcome::Success,
        );
    }

    async fn send_all(&self, steps: &[ScriptStep], log_ctx: &LogContext<'_>) {
        for step in steps {
            let endpoint = self.endpoints.get(step.target);
            let target = endpoint.to_string();
            tbh_info!(
                context = log_ctx.with_endpoint(&target),
                "sending {}",
                step.message
            );
            self.control.send(&endpoint, &step.message).await;
        }
    }

    /// Launch one test binary and forward its exit.
    fn watch(
        &self,
        spec: LaunchSpec,
        index: usize,
        scenario: &'static str,
    ) -> oneshot::Receiver<ProcessExit> {
        let (tx, rx) = oneshot::channel();
        let handle = self.launcher.launch(spec, self.cancel.clone());
        let signals = self.signals.clone();
        self.tasks.track(tokio::spawn(async move {
            let exit = handle.wait().await;
            let log_ctx = LogContext::new()
                .with_scenario(index, scenario)
                .with_role(&exit.label);
            if exit.is_failure() {
                report_failure(&signals, &log_ctx, &exit);
            } else {
                tbh_info!(context = log_ctx, "process exited: {}", exit.details());
            }
            // The driver is gone once the run was aborted.
            let _ = tx.send(exit);
        }));
        rx
    }
}
