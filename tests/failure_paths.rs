//! ---
//! tbh_section: "07-testing"
//! tbh_subsection: "integration-tests"
//! tbh_type: "source"
//! tbh_scope: "test"
//! tbh_description: "Failure, timeout and delivery-loss paths against scripted engines."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tbh_common::HarnessConfig;
use tbh_control::{ControlMessage, EndpointRole, EndpointSet, InMemoryTransport};
use tbh_harness::testing::{Behaviour, ScriptedLauncher};
use tbh_harness::{
    catalogue, FailureReport, Harness, ReturnCode, RunReport, ScenarioOutcome, Signal,
};

async fn run_with(config: HarnessConfig, launcher: &ScriptedLauncher, transport: &InMemoryTransport) -> RunReport {
    Harness::new(config, Arc::new(launcher.clone()), Arc::new(transport.clone()))
        .run()
        .await
}

fn assert_quit_broadcast(report: &RunReport) {
    let roles: Vec<_> = report.teardown.quit.iter().map(|q| q.role).collect();
    assert_eq!(
        roles,
        vec![
            EndpointRole::Reference,
            EndpointRole::Primary,
            EndpointRole::Secondary
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failure_at_each_index_stops_the_run_there() {
    let failing = [
        "test-binary:non-timebase",
        "test-binary:timebase-master",
        "test-binary:timebase-listener",
        "test-binary:bbt-relocation-listener",
    ];
    for (k, label) in failing.iter().enumerate() {
        let transport = InMemoryTransport::new();
        let launcher = ScriptedLauncher::new(transport.clone())
            .with(*label, Behaviour::ExitOnTrigger { code: 1 });

        let report = run_with(HarnessConfig::default(), &launcher, &transport).await;

        assert_eq!(report.return_code, ReturnCode::Failure, "failing {label}");
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.scenarios.len(), k + 1);
        let failed = report.failed().expect("failed scenario recorded");
        assert_eq!(failed.index, k);
        assert!(failed.failure.as_deref().unwrap_or_default().contains(label));
        assert!(report.scenarios[..k]
            .iter()
            .all(|s| s.outcome == ScenarioOutcome::Passed));

        let later: Vec<_> = catalogue()[k + 1..].iter().map(|s| s.label).collect();
        for launched in launcher.launched_labels() {
            assert!(
                !later.iter().any(|l| launched.contains(l)),
                "{launched} started after failure at {k}"
            );
        }
        assert_quit_broadcast(&report);
        assert!(launcher.live().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn reference_engine_crash_aborts_first_scenario() {
    let transport = InMemoryTransport::new();
    let launcher = ScriptedLauncher::new(transport.clone()).with(
        "reference-engine",
        Behaviour::ExitAfter {
            after: Duration::from_secs(1),
            code: 2,
        },
    );

    let report = run_with(HarnessConfig::default(), &launcher, &transport).await;

    assert_eq!(report.return_code, ReturnCode::Failure);
    assert_eq!(report.scenarios.len(), 1);
    let failed = report.failed().unwrap();
    assert_eq!(failed.index, 0);
    assert!(failed
        .failure
        .as_deref()
        .unwrap_or_default()
        .starts_with("reference-engine failed: exit status 2"));
    // The script never went out: the crash happened inside the startup budget.
    assert!(!transport
        .deliveries()
        .iter()
        .any(|d| d.message == ControlMessage::RunTransportTests));
    assert_quit_broadcast(&report);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_is_a_process_failure() {
    let transport = InMemoryTransport::new();
    let launcher = ScriptedLauncher::new(transport.clone())
        .with("test-binary:timebase-listener", Behaviour::SpawnFailure);

    let report = run_with(HarnessConfig::default(), &launcher, &transport).await;

    assert_eq!(report.return_code, ReturnCode::Failure);
    let failed = report.failed().unwrap();
    assert_eq!(failed.label, "timebase-listener");
    assert!(failed
        .failure
        .as_deref()
        .unwrap_or_default()
        .contains("spawn failed"));
}

#[tokio::test(start_paused = true)]
async fn hanging_scenario_times_out_as_failure() {
    let mut config = HarnessConfig::default();
    config.timing.scenario_timeout = Some(Duration::from_secs(30));
    let transport = InMemoryTransport::new();
    let launcher = ScriptedLauncher::new(transport.clone())
        .with("test-binary:timebase-master", Behaviour::RunUntilQuit);

    let report = run_with(config, &launcher, &transport).await;

    assert_eq!(report.return_code, ReturnCode::Failure);
    let failed = report.failed().unwrap();
    assert_eq!(failed.index, 1);
    assert!(failed.duration_ms >= 30_000);
    assert!(failed
        .failure
        .as_deref()
        .unwrap_or_default()
        .contains("timed out"));
    assert!(launcher.live().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropped_messages_do_not_abort_the_run() {
    let config = HarnessConfig::default();
    let endpoints = EndpointSet::from_config(&config.endpoints);
    let transport = InMemoryTransport::new();
    transport.reject(endpoints.reference.addr);
    let launcher = ScriptedLauncher::new(transport.clone());

    let report = run_with(config, &launcher, &transport).await;

    assert_eq!(report.return_code, ReturnCode::Success);
    assert_eq!(report.passed(), 4);
    // Three activations, the relocation prelude and the teardown quit.
    assert_eq!(report.control.dropped, 5);
    let reference_quit = report
        .teardown
        .quit
        .iter()
        .find(|q| q.role == EndpointRole::Reference)
        .unwrap();
    assert!(!reference_quit.accepted);
    // The reference engine never saw a quit; cancellation ended it.
    assert!(launcher.live().is_empty());
    assert_eq!(report.teardown.aborted, 0);
}

#[tokio::test(start_paused = true)]
async fn pending_failure_wins_over_the_seeded_advance() {
    let transport = InMemoryTransport::new();
    let launcher = ScriptedLauncher::new(transport.clone());
    let harness = Harness::new(
        HarnessConfig::default(),
        Arc::new(launcher.clone()),
        Arc::new(transport.clone()),
    );
    harness
        .signals()
        .raise(Signal::ProcessFailed(FailureReport::new("operator", "interrupted")))
        .unwrap();

    let report = harness.run().await;

    assert_eq!(report.return_code, ReturnCode::Failure);
    assert!(report.scenarios.is_empty());
    assert!(launcher.launches().is_empty());
    assert_quit_broadcast(&report);
}

#[tokio::test(start_paused = true)]
async fn interrupt_mid_run_still_tears_down() {
    let transport = InMemoryTransport::new();
    let launcher = ScriptedLauncher::new(transport.clone());
    let harness = Harness::new(
        HarnessConfig::default(),
        Arc::new(launcher.clone()),
        Arc::new(transport.clone()),
    );
    let signals = harness.signals();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(8)).await;
        signals
            .raise(Signal::ProcessFailed(FailureReport::new("operator", "interrupted")))
            .unwrap();
    });

    let report = harness.run().await;

    assert_eq!(report.return_code, ReturnCode::Failure);
    let failed = report.failed().unwrap();
    assert_eq!(failed.index, 1);
    assert_eq!(report.scenarios[0].outcome, ScenarioOutcome::Passed);
    assert_quit_broadcast(&report);
    assert!(launcher.live().is_empty());
}
