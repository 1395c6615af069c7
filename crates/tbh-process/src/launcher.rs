//! ---
//! tbh_section: "05-process-lifecycle"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "External process launch, capture and exit classification."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{ProcessError, ProcessHandle, ProcessOutcome, Result};

/// Upper bound on draining output pipes after the process has exited.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Role label used in logs and failure reports.
    pub label: String,
    /// Executable path.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Destination for the combined stdout/stderr, discarded when `None`.
    pub capture: Option<PathBuf>,
}

impl LaunchSpec {
    /// Create a spec with no arguments and no capture.
    pub fn new(label: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            capture: None,
        }
    }

    /// Append arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Write captured output to `path` once the process exits.
    pub fn capture_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.capture = Some(path.into());
        self
    }

    /// Shell-like rendering of the command line for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Starts processes on behalf of the harness.
pub trait Launcher: Send + Sync {
    /// Start the process described by `spec`.
    ///
    /// The returned handle terminates the process once `cancel` turns `true`.
    /// Must be called from within a tokio runtime.
    fn launch(&self, spec: LaunchSpec, cancel: watch::Receiver<bool>) -> ProcessHandle;
}

/// Launcher backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Create a launcher.
    pub fn new() -> Self {
        Self
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, spec: LaunchSpec, cancel: watch::Receiver<bool>) -> ProcessHandle {
        let label = spec.label.clone();
        let capture = spec.capture.clone();
        ProcessHandle::supervise(label, capture, run_command(spec, cancel))
    }
}

async fn run_command(spec: LaunchSpec, mut cancel: watch::Receiver<bool>) -> ProcessOutcome {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = ProcessError::Spawn {
                program: spec.program.clone(),
                source,
            };
            warn!(label = %spec.label, error = %err, "process failed to start");
            return ProcessOutcome::SpawnFailed {
                reason: err.to_string(),
            };
        }
    };
    info!(
        label = %spec.label,
        pid = child.id().unwrap_or_default(),
        command = %spec.command_line(),
        "process launched"
    );

    let output = Arc::new(Mutex::new(String::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(collect_lines(stdout, output.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(collect_lines(stderr, output.clone()));
    }

    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => ProcessOutcome::Clean,
            Ok(status) => ProcessOutcome::Failed {
                code: status.code(),
                output: String::new(),
            },
            Err(err) => ProcessOutcome::Failed {
                code: None,
                output: format!("failed to await process: {err}"),
            },
        },
        _ = cancelled(&mut cancel) => {
            debug!(label = %spec.label, "cancellation received, terminating process");
            if let Err(err) = child.start_kill() {
                debug!(label = %spec.label, error = %err, "kill after exit");
            }
            let _ = child.wait().await;
            ProcessOutcome::Cancelled
        }
    };

    // A grandchild holding a pipe open can stall the drain; persist what arrived first.
    if let Some(path) = &spec.capture {
        let snapshot = output.lock().clone();
        persist_capture(&spec.label, path, &snapshot).await;
    }
    drain(readers).await;
    let captured = std::mem::take(&mut *output.lock());
    if let Some(path) = &spec.capture {
        persist_capture(&spec.label, path, &captured).await;
    }

    match outcome {
        ProcessOutcome::Failed { code, output } => ProcessOutcome::Failed {
            code,
            output: if output.is_empty() { captured } else { output },
        },
        other => other,
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        // Sender gone without cancelling: never fire.
        std::future::pending::<()>().await;
    }
}

async fn persist_capture(label: &str, path: &Path, output: &str) {
    if let Err(err) = write_capture(path, output).await {
        warn!(label = %label, error = %err, "captured output not persisted");
    }
}

/// Read `stream` line by line until EOF. Bytes that are not UTF-8 are
/// replaced, never treated as the end of the stream.
fn collect_lines<R>(stream: R, sink: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let mut guard = sink.lock();
                    guard.push_str(&line);
                    if !line.ends_with('\n') {
                        guard.push('\n');
                    }
                }
                Err(err) => {
                    debug!(error = %err, "output stream closed");
                    break;
                }
            }
        }
    })
}

async fn drain(readers: Vec<JoinHandle<()>>) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout_at(deadline, reader).await.is_err() {
            // A grandchild may still hold the pipe open.
            abort.abort();
        }
    }
}

/// Persist captured output, creating parent directories as needed.
pub async fn write_capture(path: &Path, output: &str) -> Result<()> {
    let to_err = |source| ProcessError::Capture {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::write(path, output).await.map_err(to_err)
}
