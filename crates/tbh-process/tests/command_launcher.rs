//! ---
//! tbh_section: "05-process-lifecycle"
//! tbh_subsection: "tests"
//! tbh_type: "source"
//! tbh_scope: "test"
//! tbh_description: "Command launcher behaviour against real child processes."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
#![cfg(unix)]

use std::time::Duration;

use tbh_process::{CommandLauncher, CompletionState, LaunchSpec, Launcher, ProcessOutcome};
use tokio::sync::watch;

fn shell(label: &str, script: &str) -> LaunchSpec {
    LaunchSpec::new(label, "/bin/sh").args(["-c", script])
}

#[tokio::test]
async fn clean_exit_is_captured_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("test-non-timebase.output.log");
    let (_cancel_tx, cancel) = watch::channel(false);

    let handle = CommandLauncher::new().launch(
        shell("test-binary:non-timebase", "echo transport ok; echo checks done >&2")
            .capture_to(&capture),
        cancel,
    );
    let mut state = handle.state_watch();
    let exit = handle.wait().await;

    assert!(exit.is_clean(), "unexpected outcome {:?}", exit.outcome);
    assert_eq!(*state.borrow_and_update(), CompletionState::ExitedClean);
    assert_eq!(exit.capture.as_deref(), Some(capture.as_path()));
    let written = std::fs::read_to_string(&capture).unwrap();
    assert!(written.contains("transport ok"));
    assert!(written.contains("checks done"));
}

#[tokio::test]
async fn non_zero_exit_carries_combined_output() {
    let (_cancel_tx, cancel) = watch::channel(false);
    let handle = CommandLauncher::new().launch(
        shell("test-binary:timebase-master", "echo relocation mismatch >&2; exit 3"),
        cancel,
    );
    let exit = handle.wait().await;

    match &exit.outcome {
        ProcessOutcome::Failed { code, output } => {
            assert_eq!(*code, Some(3));
            assert!(output.contains("relocation mismatch"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(exit.is_failure());
    assert!(exit.details().starts_with("exit status 3"));
}

#[tokio::test]
async fn missing_executable_is_a_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (_cancel_tx, cancel) = watch::channel(false);
    let handle = CommandLauncher::new().launch(
        LaunchSpec::new("reference-engine", dir.path().join("h2cli")),
        cancel,
    );
    let exit = handle.wait().await;

    assert!(matches!(exit.outcome, ProcessOutcome::SpawnFailed { .. }));
    assert!(exit.is_failure());
    assert_eq!(exit.outcome.state(), CompletionState::ExitedError);
}

#[tokio::test]
async fn cancellation_terminates_without_failure() {
    let (cancel_tx, cancel) = watch::channel(false);
    let handle = CommandLauncher::new().launch(shell("reference-engine", "exec sleep 30"), cancel);
    assert_eq!(handle.state(), CompletionState::Running);

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel_tx.send_replace(true);

    let exit = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .expect("cancelled process is reaped promptly");
    assert_eq!(exit.outcome, ProcessOutcome::Cancelled);
    assert!(!exit.is_failure());
}

#[tokio::test]
async fn dropped_cancel_sender_never_cancels() {
    let (cancel_tx, cancel) = watch::channel(false);
    drop(cancel_tx);
    let handle = CommandLauncher::new().launch(shell("test-binary:timebase-listener", "exit 0"), cancel);
    assert!(handle.wait().await.is_clean());
}

#[tokio::test]
async fn invalid_utf8_output_is_captured_without_breaking_the_pipe() {
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("hydrogen.output.log");
    let (_cancel_tx, cancel) = watch::channel(false);
    // Well past the 64 KiB pipe buffer, written after the undecodable line.
    let script = "printf 'loading caf\\351.h2song\\n'; sleep 0.3; \
        i=0; while [ $i -lt 3000 ]; do echo \"transport frame $i padded out to fill the pipe\"; i=$((i+1)); done; \
        exit 0";

    let exit = CommandLauncher::new()
        .launch(shell("reference-engine", script).capture_to(&capture), cancel)
        .wait()
        .await;

    assert!(exit.is_clean(), "unexpected outcome {:?}", exit.outcome);
    let written = std::fs::read_to_string(&capture).unwrap();
    assert!(written.contains("loading caf\u{FFFD}.h2song"), "{}", &written[..80.min(written.len())]);
    assert!(written.contains("transport frame 2999 padded out"));
}
