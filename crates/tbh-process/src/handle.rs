//! ---
//! tbh_section: "05-process-lifecycle"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "External process launch, capture and exit classification."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Observable lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionState {
    /// The process has not exited yet.
    Running,
    /// Exit status zero.
    ExitedClean,
    /// Non-zero exit, death by signal, or spawn failure.
    ExitedError,
    /// Terminated by harness cancellation.
    Terminated,
}

impl fmt::Display for CompletionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompletionState::Running => "running",
            CompletionState::ExitedClean => "exited-clean",
            CompletionState::ExitedError => "exited-error",
            CompletionState::Terminated => "terminated",
        })
    }
}

/// Classification of how a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit status zero.
    Clean,
    /// The process exited non-zero or was killed by a signal.
    Failed {
        /// Exit code, `None` when the process died from a signal.
        code: Option<i32>,
        /// Combined stdout/stderr captured while it ran.
        output: String,
    },
    /// The executable never started.
    SpawnFailed {
        /// OS error text.
        reason: String,
    },
    /// Terminated through the cancellation signal.
    Cancelled,
}

impl ProcessOutcome {
    /// Completion state implied by this outcome.
    pub fn state(&self) -> CompletionState {
        match self {
            ProcessOutcome::Clean => CompletionState::ExitedClean,
            ProcessOutcome::Failed { .. } | ProcessOutcome::SpawnFailed { .. } => {
                CompletionState::ExitedError
            }
            ProcessOutcome::Cancelled => CompletionState::Terminated,
        }
    }
}

/// The single completion report of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Role label of the process.
    pub label: String,
    /// How the process ended.
    pub outcome: ProcessOutcome,
    /// File holding the captured output, when capture was enabled.
    pub capture: Option<PathBuf>,
    /// Wall time between launch and exit.
    pub elapsed: Duration,
}

impl ProcessExit {
    /// True for exit status zero.
    pub fn is_clean(&self) -> bool {
        matches!(self.outcome, ProcessOutcome::Clean)
    }

    /// True for non-zero exits and spawn failures. Cancellation is not a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            ProcessOutcome::Failed { .. } | ProcessOutcome::SpawnFailed { .. }
        )
    }

    /// Human-readable diagnostics for failure reports.
    pub fn details(&self) -> String {
        match &self.outcome {
            ProcessOutcome::Clean => "exit status 0".to_string(),
            ProcessOutcome::Failed { code, output } => {
                let status = match code {
                    Some(code) => format!("exit status {code}"),
                    None => "killed by signal".to_string(),
                };
                if output.trim().is_empty() {
                    status
                } else {
                    format!("{status}\n{}", output.trim_end())
                }
            }
            ProcessOutcome::SpawnFailed { reason } => format!("spawn failed: {reason}"),
            ProcessOutcome::Cancelled => "terminated by cancellation".to_string(),
        }
    }
}

/// Handle to one supervised process.
///
/// The handle reports completion exactly once: [`ProcessHandle::wait`]
/// consumes it.
pub struct ProcessHandle {
    label: String,
    state: watch::Receiver<CompletionState>,
    task: JoinHandle<ProcessExit>,
}

impl ProcessHandle {
    /// Build a handle around any future resolving to a [`ProcessOutcome`].
    ///
    /// Used by the command launcher and by scripted processes in tests.
    pub fn from_future<F>(label: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = ProcessOutcome> + Send + 'static,
    {
        Self::supervise(label.into(), None, fut)
    }

    pub(crate) fn supervise<F>(label: String, capture: Option<PathBuf>, fut: F) -> Self
    where
        F: Future<Output = ProcessOutcome> + Send + 'static,
    {
        let (state_tx, state) = watch::channel(CompletionState::Running);
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = fut.await;
            state_tx.send_replace(outcome.state());
            ProcessExit {
                label: task_label,
                outcome,
                capture,
                elapsed: started.elapsed(),
            }
        });
        Self { label, state, task }
    }

    /// Role label of the process.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current completion state.
    pub fn state(&self) -> CompletionState {
        *self.state.borrow()
    }

    /// Subscribe to completion-state changes.
    pub fn state_watch(&self) -> watch::Receiver<CompletionState> {
        self.state.clone()
    }

    /// Wait for the process to finish and return its completion report.
    pub async fn wait(self) -> ProcessExit {
        let label = self.label;
        match self.task.await {
            Ok(exit) => exit,
            Err(err) => {
                let outcome = if err.is_cancelled() {
                    ProcessOutcome::Cancelled
                } else {
                    ProcessOutcome::Failed {
                        code: None,
                        output: format!("supervisor task panicked: {err}"),
                    }
                };
                ProcessExit {
                    label,
                    outcome,
                    capture: None,
                    elapsed: Duration::ZERO,
                }
            }
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("label", &self.label)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn scripted_handle_reports_once_with_state() {
        let handle = ProcessHandle::from_future("test-binary:non-timebase", async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            ProcessOutcome::Clean
        });
        assert_eq!(handle.state(), CompletionState::Running);
        let mut state = handle.state_watch();

        let exit = handle.wait().await;
        assert!(exit.is_clean());
        assert!(!exit.is_failure());
        assert_eq!(exit.label, "test-binary:non-timebase");
        assert!(exit.elapsed >= Duration::from_secs(2));
        assert_eq!(*state.borrow_and_update(), CompletionState::ExitedClean);
    }

    #[tokio::test]
    async fn failure_details_include_output() {
        let handle = ProcessHandle::from_future("reference-engine", async {
            ProcessOutcome::Failed {
                code: Some(3),
                output: "jack server not running\n".into(),
            }
        });
        let exit = handle.wait().await;
        assert!(exit.is_failure());
        assert_eq!(exit.outcome.state(), CompletionState::ExitedError);
        assert_eq!(exit.details(), "exit status 3\njack server not running");
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        let exit = ProcessExit {
            label: "test-binary:bbt-relocation-master".into(),
            outcome: ProcessOutcome::Cancelled,
            capture: None,
            elapsed: Duration::ZERO,
        };
        assert!(!exit.is_failure());
        assert_eq!(exit.outcome.state(), CompletionState::Terminated);
    }
}
