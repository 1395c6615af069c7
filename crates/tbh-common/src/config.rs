//! ---
//! tbh_section: "04-configuration"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Harness configuration model and loader."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_reference_engine() -> PathBuf {
    ["..", "..", "build", "src", "cli", "h2cli"].iter().collect()
}

fn default_test_binary() -> PathBuf {
    [
        "..",
        "..",
        "build",
        "tests",
        "jackTimebase",
        "h2JackTimebase",
        "h2JackTimebase",
    ]
    .iter()
    .collect()
}

fn default_song() -> PathBuf {
    PathBuf::from("jackTimebaseTest.h2song")
}

fn default_audio_driver() -> String {
    "jack".to_owned()
}

fn default_verbosity() -> String {
    "Debug".to_owned()
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_reference_port() -> u16 {
    9099
}

fn default_primary_port() -> u16 {
    8099
}

fn default_secondary_port() -> u16 {
    8100
}

fn default_startup_budget() -> Duration {
    Duration::from_millis(5000)
}

fn default_settle_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_teardown_grace() -> Duration {
    Duration::from_millis(3000)
}

fn default_cancel_grace() -> Duration {
    Duration::from_millis(100)
}

fn default_dispatch_heartbeat() -> Duration {
    Duration::from_millis(1000)
}

fn default_scenario_timeout() -> Option<Duration> {
    Some(Duration::from_secs(300))
}

fn default_reference_log() -> PathBuf {
    PathBuf::from("./hydrogen.log")
}

fn default_test_log_base() -> String {
    "./test".to_owned()
}

fn default_capture_output() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/tbh-logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

/// Primary configuration object for a harness run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub binaries: BinaryConfig,
    #[serde(default)]
    pub fixture: FixtureConfig,
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`HarnessConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedHarnessConfig {
    pub config: HarnessConfig,
    /// `None` when no file was found and the built-in defaults apply.
    pub source: Option<PathBuf>,
}

impl HarnessConfig {
    pub const ENV_CONFIG_PATH: &'static str = "TBH_CONFIG";

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `TBH_CONFIG` path must exist. Candidate paths are probed in
    /// order and skipped when absent; if none exists the defaults are returned.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedHarnessConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedHarnessConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedHarnessConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedHarnessConfig {
            config: Self::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<HarnessConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.binaries.validate()?;
        self.endpoints.validate()?;
        self.timing.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for HarnessConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: HarnessConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Locations of the two executables under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryConfig {
    #[serde(default = "default_reference_engine")]
    pub reference_engine: PathBuf,
    #[serde(default = "default_test_binary")]
    pub test_binary: PathBuf,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            reference_engine: default_reference_engine(),
            test_binary: default_test_binary(),
        }
    }
}

impl BinaryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reference_engine.as_os_str().is_empty() {
            return Err(anyhow!("binaries.reference_engine must not be empty"));
        }
        if self.test_binary.as_os_str().is_empty() {
            return Err(anyhow!("binaries.test_binary must not be empty"));
        }
        Ok(())
    }
}

/// Fixture project and flags handed to every launched engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureConfig {
    #[serde(default = "default_song")]
    pub song: PathBuf,
    #[serde(default = "default_audio_driver")]
    pub audio_driver: String,
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            song: default_song(),
            audio_driver: default_audio_driver(),
            verbosity: default_verbosity(),
        }
    }
}

/// Well-known control ports of the three logical endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_reference_port")]
    pub reference_port: u16,
    #[serde(default = "default_primary_port")]
    pub primary_port: u16,
    #[serde(default = "default_secondary_port")]
    pub secondary_port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            reference_port: default_reference_port(),
            primary_port: default_primary_port(),
            secondary_port: default_secondary_port(),
        }
    }
}

impl EndpointConfig {
    pub fn validate(&self) -> Result<()> {
        let ports = [self.reference_port, self.primary_port, self.secondary_port];
        if ports.contains(&0) {
            return Err(anyhow!("endpoint ports must be non-zero"));
        }
        let unique: HashSet<u16> = ports.iter().copied().collect();
        if unique.len() != ports.len() {
            return Err(anyhow!(
                "endpoint ports must be distinct (reference={}, primary={}, secondary={})",
                self.reference_port,
                self.primary_port,
                self.secondary_port
            ));
        }
        Ok(())
    }
}

/// Fixed delays bounding the run.
///
/// `startup_budget` and `settle_interval` are not readiness probes: the engines
/// expose no acknowledgement, so the values have to carry generous margins.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_startup_budget", rename = "startup_budget_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub startup_budget: Duration,
    #[serde(default = "default_settle_interval", rename = "settle_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub settle_interval: Duration,
    #[serde(default = "default_teardown_grace", rename = "teardown_grace_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub teardown_grace: Duration,
    #[serde(default = "default_cancel_grace", rename = "cancel_grace_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cancel_grace: Duration,
    #[serde(default = "default_dispatch_heartbeat", rename = "dispatch_heartbeat_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub dispatch_heartbeat: Duration,
    #[serde(default = "default_scenario_timeout", rename = "scenario_timeout_ms")]
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub scenario_timeout: Option<Duration>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_budget: default_startup_budget(),
            settle_interval: default_settle_interval(),
            teardown_grace: default_teardown_grace(),
            cancel_grace: default_cancel_grace(),
            dispatch_heartbeat: default_dispatch_heartbeat(),
            scenario_timeout: default_scenario_timeout(),
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.startup_budget.is_zero() {
            return Err(anyhow!("timing.startup_budget_ms must be greater than zero"));
        }
        if self.settle_interval.is_zero() {
            return Err(anyhow!("timing.settle_interval_ms must be greater than zero"));
        }
        if self.dispatch_heartbeat.is_zero() {
            return Err(anyhow!(
                "timing.dispatch_heartbeat_ms must be greater than zero"
            ));
        }
        if matches!(self.scenario_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(anyhow!(
                "timing.scenario_timeout_ms must be omitted or greater than zero"
            ));
        }
        Ok(())
    }
}

/// Files written by the launched engines and by the harness itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_reference_log")]
    pub reference_log: PathBuf,
    #[serde(default = "default_test_log_base")]
    pub test_log_base: String,
    #[serde(default = "default_capture_output")]
    pub capture_output: bool,
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            reference_log: default_reference_log(),
            test_log_base: default_test_log_base(),
            capture_output: default_capture_output(),
            summary_path: None,
        }
    }
}

impl ArtifactConfig {
    /// Log file handed to the test binary via `-L` for the given label.
    pub fn test_log_path(&self, label: &str) -> PathBuf {
        PathBuf::from(format!("{}-{}.log", self.test_log_base, label))
    }

    /// Combined stdout/stderr capture of the test binary for the given label.
    pub fn test_output_path(&self, label: &str) -> Option<PathBuf> {
        self.capture_output
            .then(|| PathBuf::from(format!("{}-{}.output.log", self.test_log_base, label)))
    }

    /// Combined stdout/stderr capture of the reference engine.
    pub fn reference_output_path(&self) -> Option<PathBuf> {
        self.capture_output
            .then(|| self.reference_log.with_extension("output.log"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}
