//! ---
//! tbh_section: "07-testing"
//! tbh_subsection: "integration-tests"
//! tbh_type: "source"
//! tbh_scope: "test"
//! tbh_description: "Full harness runs against stand-in engine executables."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tbh_common::HarnessConfig;
use tbh_control::UdpTransport;
use tbh_harness::{preflight, Harness, ReturnCode, RunReport};
use tbh_process::CommandLauncher;

const REFERENCE_SCRIPT: &str = "#!/bin/sh\nexec sleep 30\n";

// A backgrounded child inherits stdout and keeps the pipe open past the engine's exit.
const FORKING_REFERENCE: &str = "#!/bin/sh\necho \"reference up\"\nsleep 3 &\nexec sleep 30\n";

const PASSING_BINARY: &str = "#!/bin/sh\necho \"args: $*\"\nexit 0\n";

const LISTENER_FAILS: &str = "#!/bin/sh\n\
echo \"args: $*\"\n\
case \"$*\" in\n\
  *timebase-listener*) echo \"listener checks failed\" >&2; exit 4;;\n\
esac\n\
exit 0\n";

fn install(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(dir: &Path, reference: PathBuf, test_binary: PathBuf) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.binaries.reference_engine = reference;
    config.binaries.test_binary = test_binary;
    config.endpoints.reference_port = 39099;
    config.endpoints.primary_port = 38099;
    config.endpoints.secondary_port = 38100;
    config.timing.startup_budget = Duration::from_millis(50);
    config.timing.settle_interval = Duration::from_millis(10);
    config.timing.teardown_grace = Duration::from_millis(100);
    config.timing.cancel_grace = Duration::from_millis(50);
    config.timing.dispatch_heartbeat = Duration::from_millis(50);
    config.timing.scenario_timeout = Some(Duration::from_secs(20));
    config.artifacts.reference_log = dir.join("hydrogen.log");
    config.artifacts.test_log_base = dir.join("test").display().to_string();
    config
}

async fn run(config: HarnessConfig) -> RunReport {
    let resolved = preflight(&config.binaries).expect("stand-in executables present");
    let mut config = config;
    config.binaries = resolved.into_config();
    let transport = UdpTransport::bind_for(config.endpoints.host)
        .await
        .expect("control socket");
    Harness::new(config, Arc::new(CommandLauncher::new()), Arc::new(transport))
        .run()
        .await
}

// All runs share one test so the scripts are fully written before any fork.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stand_in_engines_pass_then_fail_at_listener() {
    let dir = tempfile::tempdir().unwrap();
    let reference = install(dir.path(), "h2cli", REFERENCE_SCRIPT);
    let passing = install(dir.path(), "h2JackTimebase", PASSING_BINARY);
    let failing = install(dir.path(), "h2JackTimebase-broken", LISTENER_FAILS);
    let forking = install(dir.path(), "h2cli-forking", FORKING_REFERENCE);

    let report = run(config(dir.path(), reference.clone(), passing.clone())).await;
    assert_eq!(report.return_code, ReturnCode::Success, "{report:?}");
    assert_eq!(report.passed(), 4);

    let capture = fs::read_to_string(dir.path().join("test-timebase-master.output.log")).unwrap();
    assert!(capture.contains("-O 38099"), "{capture}");
    assert!(capture.contains(&format!("-L {}", dir.path().join("test-timebase-master.log").display())));
    let relocation =
        fs::read_to_string(dir.path().join("test-bbt-relocation-listener.output.log")).unwrap();
    assert!(relocation.contains("-O 38100"), "{relocation}");

    let report = run(config(dir.path(), reference, failing)).await;
    assert_eq!(report.return_code, ReturnCode::Failure);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.scenarios.len(), 3);
    let failed = report.failed().unwrap();
    assert_eq!(failed.index, 2);
    let reason = failed.failure.as_deref().unwrap_or_default();
    assert!(reason.starts_with("test-binary:timebase-listener failed: exit status 4"), "{reason}");
    assert!(reason.contains("listener checks failed"), "{reason}");
    assert_eq!(report.teardown.quit.len(), 3);

    fs::create_dir_all(dir.path().join("forking")).unwrap();
    let mut forked = config(dir.path(), forking, passing);
    forked.artifacts.reference_log = dir.path().join("forking/hydrogen.log");
    let report = run(forked).await;
    assert_eq!(report.return_code, ReturnCode::Success, "{report:?}");
    let reference_output =
        fs::read_to_string(dir.path().join("forking/hydrogen.output.log")).unwrap();
    assert!(reference_output.contains("reference up"), "{reference_output}");
}

#[test]
fn missing_executable_fails_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(
        dir.path(),
        dir.path().join("absent-h2cli"),
        dir.path().join("absent-test-binary"),
    );
    let err = preflight(&config.binaries).unwrap_err();
    assert!(err.to_string().contains("reference engine"), "{err}");
}
