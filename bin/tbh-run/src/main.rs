//! ---
//! tbh_section: "01-harness-runner"
//! tbh_subsection: "binary"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Binary entrypoint for the Timebase integration harness."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tbh_common::config::{HarnessConfig, LoggingConfig};
use tbh_common::logging::{init_tracing, LogFormat};
use tbh_control::UdpTransport;
use tbh_harness::{catalogue, preflight, FailureReport, Harness, ReturnCode, RunReport, Signal};
use tbh_process::CommandLauncher;
use tokio::signal;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_FILE: &str = "tbh.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Timebase integration harness", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Reference engine executable")]
    reference_engine: Option<PathBuf>,

    #[arg(long, value_name = "PATH", help = "Test binary executable")]
    test_binary: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Song fixture loaded by every engine")]
    song: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Console log format: pretty or json")]
    log_format: Option<LogFormat>,

    #[arg(long, value_name = "MS", help = "Delay between launch and the first control message")]
    startup_budget_ms: Option<u64>,

    #[arg(long, value_name = "MS", help = "Pause after every control message")]
    settle_ms: Option<u64>,

    #[arg(long, value_name = "FILE", help = "Write a JSON run summary")]
    summary: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Commands {
    #[command(about = "Run every scenario (default)")]
    Run,
    #[command(about = "Print the scenario catalogue")]
    List,
    #[command(about = "Check that both executables exist, then exit")]
    Check,
}

impl Cli {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(path) = &self.reference_engine {
            config.binaries.reference_engine = path.clone();
        }
        if let Some(path) = &self.test_binary {
            config.binaries.test_binary = path.clone();
        }
        if let Some(song) = &self.song {
            config.fixture.song = song.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(ms) = self.startup_budget_ms {
            config.timing.startup_budget = Duration::from_millis(ms);
        }
        if let Some(ms) = self.settle_ms {
            config.timing.settle_interval = Duration::from_millis(ms);
        }
        if let Some(path) = &self.summary {
            config.artifacts.summary_path = Some(path.clone());
        }
    }
}

fn precondition_failed() -> ExitCode {
    ExitCode::from(ReturnCode::Precondition.code())
}

fn start_tracing(config: &LoggingConfig) -> Result<(), ExitCode> {
    init_tracing("tbh-run", config).map_err(|err| {
        eprintln!("failed to initialise tracing: {err:#}");
        precondition_failed()
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_FILE));

    let loaded = match HarnessConfig::load_with_source(&candidates) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return Ok(precondition_failed());
        }
    };
    let mut config = loaded.config;
    cli.apply(&mut config);
    if let Err(code) = start_tracing(&config.logging) {
        return Ok(code);
    }
    match &loaded.source {
        Some(path) => info!(config = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }
    if let Err(err) = config.validate() {
        error!(error = %format!("{err:#}"), "invalid configuration");
        return Ok(precondition_failed());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::List => {
            print_catalogue();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => match preflight(&config.binaries) {
            Ok(resolved) => {
                println!("reference engine: {}", resolved.reference_engine.display());
                println!("test binary:      {}", resolved.test_binary.display());
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                error!(error = %err, "preflight failed");
                Ok(precondition_failed())
            }
        },
        Commands::Run => run(config).await,
    }
}

async fn run(mut config: HarnessConfig) -> Result<ExitCode> {
    let resolved = match preflight(&config.binaries) {
        Ok(resolved) => resolved,
        Err(err) => {
            error!(error = %err, "precondition failed; nothing was launched");
            return Ok(precondition_failed());
        }
    };
    config.binaries = resolved.into_config();

    let transport = match UdpTransport::bind_for(config.endpoints.host).await {
        Ok(transport) => transport,
        Err(err) => {
            error!(error = %err, "unable to open control socket");
            return Ok(precondition_failed());
        }
    };

    let summary_path = config.artifacts.summary_path.clone();
    let harness = Harness::new(config, Arc::new(CommandLauncher::new()), Arc::new(transport));
    let signals = harness.signals();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received; aborting run");
            let report = FailureReport::new("operator", "interrupted");
            if let Err(err) = signals.raise(Signal::ProcessFailed(report)) {
                warn!(error = %err, "interrupt not delivered");
            }
        }
    });

    let report = harness.run().await;
    interrupt.abort();
    render_report(&report);

    if let Some(path) = summary_path {
        match report.write_json(&path) {
            Ok(()) => info!(summary = %path.display(), "run summary written"),
            Err(err) => warn!(error = %err, "run summary not written"),
        }
    }
    Ok(ExitCode::from(report.exit_code()))
}

fn print_catalogue() {
    for scenario in catalogue() {
        let reference = scenario
            .reference
            .map(|role| role.to_string())
            .unwrap_or_else(|| "stopped".into());
        let binaries = scenario
            .binaries
            .iter()
            .map(|b| format!("{}@{}({})", b.label, b.endpoint, b.timebase))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{}  {:<18} reference={:<9} {}",
            scenario.index, scenario.label, reference, binaries
        );
        println!("   {}", scenario.description);
    }
}

fn render_report(report: &RunReport) {
    for scenario in &report.scenarios {
        info!(
            index = scenario.index,
            scenario = %scenario.label,
            outcome = ?scenario.outcome,
            duration_ms = scenario.duration_ms,
            "scenario result"
        );
    }
    info!(
        passed = report.passed(),
        not_run = report.not_run(),
        sent = report.control.sent,
        dropped = report.control.dropped,
        return_code = report.exit_code(),
        "harness run complete"
    );
    println!(
        "{}/{} scenarios passed, exit code {}",
        report.passed(),
        report.catalogue_len,
        report.exit_code()
    );
    if let Some(failed) = report.failed() {
        println!(
            "failed: {} ({})",
            failed.label,
            failed.failure.as_deref().unwrap_or("no details")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_log_directory_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let occupied = dir.path().join("not-a-directory");
        std::fs::write(&occupied, b"").unwrap();
        let config = LoggingConfig {
            directory: occupied.join("logs"),
            ..LoggingConfig::default()
        };

        let code = start_tracing(&config).unwrap_err();
        assert_eq!(format!("{code:?}"), format!("{:?}", precondition_failed()));
    }
}
