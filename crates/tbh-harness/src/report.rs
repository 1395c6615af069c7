//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Run summary written at harness end."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tbh_control::ControlMetrics;

use crate::context::ReturnCode;
use crate::sequencer::{ScenarioOutcome, ScenarioRecord};
use crate::teardown::TeardownReport;
use crate::{HarnessError, Result};

/// Whole milliseconds in `elapsed`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Control-message counters at harness end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlSummary {
    /// Messages accepted by the transport.
    pub sent: u64,
    /// Messages refused by the transport.
    pub dropped: u64,
}

impl From<ControlMetrics> for ControlSummary {
    fn from(metrics: ControlMetrics) -> Self {
        Self {
            sent: metrics.sent,
            dropped: metrics.dropped,
        }
    }
}

/// Outcome of one harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end, after teardown.
    pub finished_at: DateTime<Utc>,
    /// Aggregate result.
    pub return_code: ReturnCode,
    /// Number of scenarios in the catalogue.
    pub catalogue_len: usize,
    /// Every scenario that was started.
    pub scenarios: Vec<ScenarioRecord>,
    /// Control-message counters.
    pub control: ControlSummary,
    /// Teardown summary.
    pub teardown: TeardownReport,
}

impl RunReport {
    /// Numeric exit code.
    pub fn exit_code(&self) -> u8 {
        self.return_code.code()
    }

    /// Scenarios that passed.
    pub fn passed(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| s.outcome == ScenarioOutcome::Passed)
            .count()
    }

    /// The scenario that failed, if any.
    pub fn failed(&self) -> Option<&ScenarioRecord> {
        self.scenarios
            .iter()
            .find(|s| s.outcome == ScenarioOutcome::Failed)
    }

    /// Scenarios never started.
    pub fn not_run(&self) -> usize {
        self.catalogue_len.saturating_sub(self.scenarios.len())
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let to_err = |source| HarnessError::Report {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(to_err)?;
        }
        let body = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, body).map_err(to_err)
    }
}
