//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Fixed scenario catalogue."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
//! The fixed, ordered list of Timebase scenarios.

use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;
use tbh_control::{ControlMessage, EndpointRole};

use ControlMessage::{MasterActivation, Quit, RunTransportTests, StartSecondaryDriver};
use EndpointRole::{Primary, Reference, Secondary};

/// Timebase role a process is configured for in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimebaseRole {
    /// Registered as Timebase master.
    Master,
    /// Following another process's master.
    Listener,
    /// No Timebase master anywhere in the scenario.
    Off,
}

impl fmt::Display for TimebaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimebaseRole::Master => "master",
            TimebaseRole::Listener => "listener",
            TimebaseRole::Off => "off",
        })
    }
}

/// A test binary started by a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestBinary {
    /// Label naming the per-binary log and capture files.
    pub label: &'static str,
    /// Endpoint (and therefore control port) the binary listens on.
    pub endpoint: EndpointRole,
    /// Timebase role it is driven into.
    pub timebase: TimebaseRole,
}

/// One control message addressed to an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScriptStep {
    /// Destination endpoint.
    pub target: EndpointRole,
    /// Message to send.
    pub message: ControlMessage,
}

impl ScriptStep {
    /// Build a step.
    pub const fn new(target: EndpointRole, message: ControlMessage) -> Self {
        Self { target, message }
    }
}

/// Immutable definition of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioDefinition {
    /// Position in the catalogue.
    pub index: usize,
    /// Short label used for logs and artifacts.
    pub label: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Timebase role of the reference engine, `None` when the scenario runs without it.
    pub reference: Option<TimebaseRole>,
    /// Messages sent before any test binary is launched.
    pub prelude: Vec<ScriptStep>,
    /// Test binaries launched, in launch order.
    pub binaries: Vec<TestBinary>,
    /// Messages sent after the startup budget; the last one triggers the checks.
    pub script: Vec<ScriptStep>,
}

impl ScenarioDefinition {
    /// True when the scenario needs the reference engine running.
    pub fn requires_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Final message of the script, the trigger for the checks.
    pub fn trigger(&self) -> Option<&ScriptStep> {
        self.script.last()
    }
}

static CATALOGUE: Lazy<Vec<ScenarioDefinition>> = Lazy::new(|| {
    vec![
        ScenarioDefinition {
            index: 0,
            label: "non-timebase",
            description: "transport without any Timebase master",
            reference: Some(TimebaseRole::Off),
            prelude: Vec::new(),
            binaries: vec![TestBinary {
                label: "non-timebase",
                endpoint: Primary,
                timebase: TimebaseRole::Off,
            }],
            script: vec![
                ScriptStep::new(Reference, MasterActivation(false)),
                ScriptStep::new(Primary, MasterActivation(false)),
                ScriptStep::new(Primary, RunTransportTests),
            ],
        },
        ScenarioDefinition {
            index: 1,
            label: "timebase-master",
            description: "test binary registered as Timebase master",
            reference: Some(TimebaseRole::Listener),
            prelude: Vec::new(),
            binaries: vec![TestBinary {
                label: "timebase-master",
                endpoint: Primary,
                timebase: TimebaseRole::Master,
            }],
            script: vec![
                ScriptStep::new(Reference, MasterActivation(false)),
                ScriptStep::new(Primary, MasterActivation(true)),
                ScriptStep::new(Primary, RunTransportTests),
            ],
        },
        ScenarioDefinition {
            index: 2,
            label: "timebase-listener",
            description: "test binary following the reference engine as Timebase master",
            reference: Some(TimebaseRole::Master),
            prelude: Vec::new(),
            binaries: vec![TestBinary {
                label: "timebase-listener",
                endpoint: Primary,
                timebase: TimebaseRole::Listener,
            }],
            script: vec![
                ScriptStep::new(Reference, MasterActivation(true)),
                ScriptStep::new(Primary, MasterActivation(false)),
                ScriptStep::new(Primary, RunTransportTests),
            ],
        },
        ScenarioDefinition {
            index: 3,
            label: "bbt-relocation",
            description: "bar/beat/tick relocation between two test binaries without the reference engine",
            reference: None,
            prelude: vec![ScriptStep::new(Reference, Quit)],
            binaries: vec![
                TestBinary {
                    label: "bbt-relocation-listener",
                    endpoint: Secondary,
                    timebase: TimebaseRole::Listener,
                },
                TestBinary {
                    label: "bbt-relocation-master",
                    endpoint: Primary,
                    timebase: TimebaseRole::Master,
                },
            ],
            script: vec![
                ScriptStep::new(Secondary, MasterActivation(false)),
                ScriptStep::new(Secondary, StartSecondaryDriver),
                ScriptStep::new(Primary, MasterActivation(true)),
                ScriptStep::new(Primary, RunTransportTests),
            ],
        },
    ]
});

/// The fixed scenario catalogue, in execution order.
pub fn catalogue() -> &'static [ScenarioDefinition] {
    &CATALOGUE
}
