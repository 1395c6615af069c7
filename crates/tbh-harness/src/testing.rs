//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "test"
//! tbh_description: "Scripted engine processes driven by in-memory control messages."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
//! A [`Launcher`] whose processes react to the messages recorded by an
//! [`InMemoryTransport`], for exercising the harness without real engines.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tbh_control::{ControlMessage, InMemoryTransport};
use tbh_process::{LaunchSpec, Launcher, ProcessHandle, ProcessOutcome};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// How a scripted process behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Exit with `code` once a run-checks or start-driver trigger reaches its port.
    ExitOnTrigger {
        /// Exit status.
        code: i32,
    },
    /// Exit with `code` after `after`, regardless of messages.
    ExitAfter {
        /// Delay from launch.
        after: Duration,
        /// Exit status.
        code: i32,
    },
    /// Ignore triggers; run until quit or cancellation.
    RunUntilQuit,
    /// Fail to start.
    SpawnFailure,
}

/// One recorded launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Role label.
    pub label: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Labels of scripted processes alive when this one started.
    pub live_at_launch: Vec<String>,
    /// Launch time.
    pub at: Instant,
}

/// Launcher producing scripted processes.
///
/// Every process quits cleanly on `/Hydrogen/QUIT` to its port and reports
/// cancellation when the harness cancels. Test binaries default to
/// [`Behaviour::ExitOnTrigger`] with code 0, the reference engine to
/// [`Behaviour::RunUntilQuit`].
#[derive(Clone)]
pub struct ScriptedLauncher {
    transport: InMemoryTransport,
    behaviours: Arc<Mutex<HashMap<String, Behaviour>>>,
    launches: Arc<Mutex<Vec<LaunchRecord>>>,
    live: Arc<Mutex<Vec<String>>>,
}

impl ScriptedLauncher {
    /// Scripted processes listening to `transport`.
    pub fn new(transport: InMemoryTransport) -> Self {
        Self {
            transport,
            behaviours: Arc::default(),
            launches: Arc::default(),
            live: Arc::default(),
        }
    }

    /// Override the behaviour for processes labelled `label`.
    pub fn with(self, label: impl Into<String>, behaviour: Behaviour) -> Self {
        self.behaviours.lock().insert(label.into(), behaviour);
        self
    }

    /// Launches in order.
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().clone()
    }

    /// Labels launched, in order.
    pub fn launched_labels(&self) -> Vec<String> {
        self.launches.lock().iter().map(|l| l.label.clone()).collect()
    }

    /// Labels of processes still alive.
    pub fn live(&self) -> Vec<String> {
        self.live.lock().clone()
    }

    fn behaviour_for(&self, label: &str) -> Behaviour {
        if let Some(behaviour) = self.behaviours.lock().get(label) {
            return *behaviour;
        }
        if label.starts_with("test-binary:") {
            Behaviour::ExitOnTrigger { code: 0 }
        } else {
            Behaviour::RunUntilQuit
        }
    }
}

fn control_port(args: &[String]) -> Option<u16> {
    args.iter()
        .position(|a| a == "-O")
        .and_then(|i| args.get(i + 1))
        .and_then(|p| p.parse().ok())
}

fn exit_with(code: i32) -> ProcessOutcome {
    if code == 0 {
        ProcessOutcome::Clean
    } else {
        ProcessOutcome::Failed {
            code: Some(code),
            output: format!("scripted exit {code}\n"),
        }
    }
}

struct LiveGuard {
    live: Arc<Mutex<Vec<String>>>,
    label: String,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.live.lock();
        if let Some(pos) = live.iter().position(|l| *l == self.label) {
            live.remove(pos);
        }
    }
}

impl Launcher for ScriptedLauncher {
    fn launch(&self, spec: LaunchSpec, mut cancel: watch::Receiver<bool>) -> ProcessHandle {
        let behaviour = self.behaviour_for(&spec.label);
        let port = control_port(&spec.args);
        let mut feed = self.transport.subscribe();
        {
            let mut live = self.live.lock();
            self.launches.lock().push(LaunchRecord {
                label: spec.label.clone(),
                args: spec.args.clone(),
                live_at_launch: live.clone(),
                at: Instant::now(),
            });
            if behaviour != Behaviour::SpawnFailure {
                live.push(spec.label.clone());
            }
        }
        let guard = LiveGuard {
            live: self.live.clone(),
            label: spec.label.clone(),
        };

        ProcessHandle::from_future(spec.label, async move {
            let _guard = guard;
            let deadline = match behaviour {
                Behaviour::SpawnFailure => {
                    return ProcessOutcome::SpawnFailed {
                        reason: "scripted spawn failure".into(),
                    }
                }
                Behaviour::ExitAfter { after, .. } => Some(Instant::now() + after),
                _ => None,
            };
            let mut cancel_open = true;
            let mut feed_open = true;
            loop {
                let timer = async {
                    match deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    biased;
                    cancelled = async { cancel.wait_for(|c| *c).await.is_ok() }, if cancel_open => {
                        if cancelled {
                            return ProcessOutcome::Cancelled;
                        }
                        cancel_open = false;
                    }
                    _ = timer => {
                        if let Behaviour::ExitAfter { code, .. } = behaviour {
                            return exit_with(code);
                        }
                    }
                    delivery = feed.recv(), if feed_open => match delivery {
                        Ok(delivery) if Some(delivery.target.port()) == port => {
                            match (delivery.message, behaviour) {
                                (ControlMessage::Quit, _) => return ProcessOutcome::Clean,
                                (
                                    ControlMessage::RunTransportTests
                                    | ControlMessage::StartSecondaryDriver,
                                    Behaviour::ExitOnTrigger { code },
                                ) => {
                                    return exit_with(code);
                                }
                                _ => {}
                            }
                        }
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => feed_open = false,
                    },
                }
            }
        })
    }
}
