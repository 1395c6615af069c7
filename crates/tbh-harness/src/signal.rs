//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Single-slot notification board between process watchers and the dispatcher."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
//! Edge-triggered notifications with one pending slot per kind.
//!
//! Producers must not raise a second notification of a kind before the
//! dispatcher consumed the first; doing so is reported as
//! [`SignalError::AlreadyPending`] and the new value is discarded.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

/// The three notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// The active scenario passed; start the next one.
    ScenarioAdvance,
    /// A process failed; abort the run.
    ProcessFailed,
    /// The catalogue is exhausted.
    HarnessFinished,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::ScenarioAdvance => "scenario-advance",
            SignalKind::ProcessFailed => "process-failed",
            SignalKind::HarnessFinished => "harness-finished",
        })
    }
}

/// Diagnostics attached to a process failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Role label of the failed process.
    pub label: String,
    /// Exit status and captured output.
    pub details: String,
}

impl FailureReport {
    /// Build a failure report.
    pub fn new(label: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            details: details.into(),
        }
    }
}

/// A notification delivered to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// See [`SignalKind::ScenarioAdvance`].
    ScenarioAdvance,
    /// See [`SignalKind::ProcessFailed`].
    ProcessFailed(FailureReport),
    /// See [`SignalKind::HarnessFinished`].
    HarnessFinished,
}

impl Signal {
    /// Kind of the notification.
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::ScenarioAdvance => SignalKind::ScenarioAdvance,
            Signal::ProcessFailed(_) => SignalKind::ProcessFailed,
            Signal::HarnessFinished => SignalKind::HarnessFinished,
        }
    }
}

/// Errors raised by the notification board.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// A notification of this kind has not been consumed yet.
    #[error("a {0} notification is already pending")]
    AlreadyPending(SignalKind),
}

#[derive(Default)]
struct Slots {
    advance: bool,
    failed: Option<FailureReport>,
    finished: bool,
}

/// Single-slot event cells shared by the sequencer, the process watchers and
/// the dispatcher.
#[derive(Default)]
pub struct SignalBoard {
    slots: Mutex<Slots>,
    notify: Notify,
}

impl SignalBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a notification, waking the dispatcher.
    pub fn raise(&self, signal: Signal) -> Result<(), SignalError> {
        {
            let mut slots = self.slots.lock();
            match signal {
                Signal::ScenarioAdvance => {
                    if slots.advance {
                        return Err(SignalError::AlreadyPending(SignalKind::ScenarioAdvance));
                    }
                    slots.advance = true;
                }
                Signal::ProcessFailed(report) => {
                    if slots.failed.is_some() {
                        return Err(SignalError::AlreadyPending(SignalKind::ProcessFailed));
                    }
                    slots.failed = Some(report);
                }
                Signal::HarnessFinished => {
                    if slots.finished {
                        return Err(SignalError::AlreadyPending(SignalKind::HarnessFinished));
                    }
                    slots.finished = true;
                }
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Take the highest-priority pending notification without blocking.
    ///
    /// Failure is checked before advance, advance before finished.
    pub fn try_take(&self) -> Option<Signal> {
        let mut slots = self.slots.lock();
        if let Some(report) = slots.failed.take() {
            return Some(Signal::ProcessFailed(report));
        }
        if std::mem::take(&mut slots.advance) {
            return Some(Signal::ScenarioAdvance);
        }
        if std::mem::take(&mut slots.finished) {
            return Some(Signal::HarnessFinished);
        }
        None
    }

    /// True when a notification of `kind` is waiting.
    pub fn is_pending(&self, kind: SignalKind) -> bool {
        let slots = self.slots.lock();
        match kind {
            SignalKind::ScenarioAdvance => slots.advance,
            SignalKind::ProcessFailed => slots.failed.is_some(),
            SignalKind::HarnessFinished => slots.finished,
        }
    }

    /// Block until a notification is pending, or until `timeout` elapses.
    ///
    /// Returns `None` on timeout. `None` as timeout waits indefinitely.
    pub async fn wait(&self, timeout: Option<Duration>) -> Option<Signal> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(signal) = self.try_take() {
                return Some(signal);
            }
            let notified = self.notify.notified();
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_take();
                    }
                }
                None => notified.await,
            }
        }
    }
}
