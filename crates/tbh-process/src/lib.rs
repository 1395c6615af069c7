//! ---
//! tbh_section: "05-process-lifecycle"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "External process launch, capture and exit classification."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Supervision of the externally launched engine processes.
//!
//! A [`ProcessHandle`] owns one background task that awaits the process exit
//! and yields a single [`ProcessExit`]. Cancellation through the shared
//! `watch` signal terminates the process and is reported as
//! [`ProcessOutcome::Cancelled`], never as a failure.

use std::path::PathBuf;

pub mod handle;
pub mod launcher;

/// Shared result type for process supervision.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Errors surfaced by process supervision helpers.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that was launched.
        program: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// Captured output could not be persisted.
    #[error("failed to write captured output to {path}: {source}")]
    Capture {
        /// Destination file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

pub use handle::{CompletionState, ProcessExit, ProcessHandle, ProcessOutcome};
pub use launcher::{CommandLauncher, LaunchSpec, Launcher, DRAIN_TIMEOUT};
