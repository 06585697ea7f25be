//! End-to-end scenarios for the run lifecycle: fan-out over the task DAG, dependency
//! predicates, cancellation, parallelism limits, and interpolation failures.

mod common;

use common::{event_position, TestHarness, NAMESPACE};
use gofer::models::event::Kind;
use gofer::models::run::{Initiator, InitiatorType};
use gofer::models::task::{RequiredParentStatus, Task};
use gofer::models::task_run::{self, task_run_container_id};
use gofer::models::{run, task_run::StatusReasonType};
use gofer::runner::orchestrator::{cancel_run, start_run};
use gofer::scheduler::in_memory::Behavior;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::time::Duration;

fn test_initiator() -> Initiator {
    Initiator {
        kind: InitiatorType::Human,
        name: "tester".into(),
        reason: "integration testing".into(),
    }
}

#[tokio::test]
async fn linear_pipeline_runs_all_tasks_successfully() {
    let harness = TestHarness::new().await;

    harness.engine.set_behavior(
        "ubuntu:latest",
        Behavior {
            log_lines: vec!["hello from task".into()],
            ..Default::default()
        },
    );

    harness.seed_pipeline(
        "linear",
        0,
        vec![
            Task::new("alpha", "ubuntu:latest"),
            Task::new("beta", "ubuntu:latest").depends_on("alpha", RequiredParentStatus::Success),
            Task::new("gamma", "ubuntu:latest").depends_on("beta", RequiredParentStatus::Success),
        ],
    );

    let run = start_run(
        harness.state.clone(),
        NAMESPACE,
        "linear",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    assert_eq!(run.run_id, 1);

    harness
        .wait_run_complete("linear", 1, Duration::from_secs(30))
        .await;

    let run = harness.get_run("linear", 1);
    assert_eq!(run.status, run::Status::Successful);
    assert_eq!(run.state, run::State::Complete);

    for task_id in ["alpha", "beta", "gamma"] {
        let task_run = harness.get_task_run("linear", 1, task_id);
        assert_eq!(task_run.status, task_run::Status::Successful);
        assert_eq!(task_run.exit_code, Some(0));
    }

    // Give the detached log pumps a moment to finish writing.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let events = harness.events();

    let run_started = event_position(&events, |kind| matches!(kind, Kind::StartedRun { .. }));
    let run_completed = event_position(
        &events,
        |kind| matches!(kind, Kind::CompletedRun { status, .. } if *status == run::Status::Successful),
    );

    assert!(run_started < run_completed);

    for task_id in ["alpha", "beta", "gamma"] {
        let created = event_position(&events, |kind| {
            matches!(kind, Kind::CreatedTaskRun { task_run_id, .. } if task_run_id == task_id)
        });
        let started = event_position(&events, |kind| {
            matches!(kind, Kind::StartedTaskRun { task_run_id, .. } if task_run_id == task_id)
        });
        let completed = event_position(&events, |kind| {
            matches!(kind, Kind::CompletedTaskRun { task_run_id, .. } if task_run_id == task_id)
        });

        assert!(run_started < created);
        assert!(created < started);
        assert!(started < completed);
        assert!(completed < run_completed);
    }

    // Task starts respect the DAG ordering.
    let alpha_completed = event_position(&events, |kind| {
        matches!(kind, Kind::CompletedTaskRun { task_run_id, .. } if task_run_id == "alpha")
    });
    let beta_started = event_position(&events, |kind| {
        matches!(kind, Kind::StartedTaskRun { task_run_id, .. } if task_run_id == "beta")
    });
    let beta_completed = event_position(&events, |kind| {
        matches!(kind, Kind::CompletedTaskRun { task_run_id, .. } if task_run_id == "beta")
    });
    let gamma_started = event_position(&events, |kind| {
        matches!(kind, Kind::StartedTaskRun { task_run_id, .. } if task_run_id == "gamma")
    });

    assert!(alpha_completed < beta_started);
    assert!(beta_completed < gamma_started);

    // The completion event carries who kicked the run off.
    let completed_event = &events[run_completed];
    if let Kind::CompletedRun {
        initiator_type,
        initiator_name,
        ..
    } = &completed_event.kind
    {
        assert_eq!(*initiator_type, InitiatorType::Human);
        assert_eq!(initiator_name, "tester");
    }

    // Every closed log file ends with the end-of-stream sentinel.
    for task_id in ["alpha", "beta", "gamma"] {
        let path = task_run::task_run_log_path(
            &harness.state.config.general.task_run_logs_dir,
            NAMESPACE,
            "linear",
            1,
            task_id,
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(
            contents.ends_with(gofer::GOFER_EOF),
            "log file {path:?} missing sentinel"
        );
        assert!(contents.contains("hello from task"));
    }
}

#[tokio::test]
async fn unmet_failure_dependency_skips_downstream_task() {
    let harness = TestHarness::new().await;

    harness.seed_pipeline(
        "failure-edge",
        0,
        vec![
            Task::new("alpha", "ubuntu:latest"),
            Task::new("cleanup", "ubuntu:latest")
                .depends_on("alpha", RequiredParentStatus::Failure),
        ],
    );

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "failure-edge",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("failure-edge", 1, Duration::from_secs(30))
        .await;

    let cleanup = harness.get_task_run("failure-edge", 1, "cleanup");
    assert_eq!(cleanup.status, task_run::Status::Skipped);

    let reason = cleanup.status_reason.unwrap();
    assert_eq!(reason.reason, StatusReasonType::FailedPrecondition);
    assert!(reason.description.contains("alpha"));
    assert!(reason.description.contains("successful"));

    // The cleanup task never made it to the scheduler.
    let container_id = task_run_container_id(NAMESPACE, "failure-edge", 1, "cleanup");
    assert!(harness.engine.container_variables(&container_id).is_none());

    // A skipped task is not a failure; the run still resolves successful.
    let run = harness.get_run("failure-edge", 1);
    assert_eq!(run.status, run::Status::Successful);
}

#[tokio::test]
async fn cancellation_stops_running_containers() {
    let harness = TestHarness::new().await;

    harness.engine.set_behavior(
        "ubuntu:latest",
        Behavior {
            hold_running: true,
            ..Default::default()
        },
    );

    harness.seed_pipeline("cancellable", 0, vec![Task::new("alpha", "ubuntu:latest")]);

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "cancellable",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_for_event(
            |event| matches!(event.kind, Kind::StartedTaskRun { .. }),
            Duration::from_secs(15),
        )
        .await;

    cancel_run(
        harness.state.clone(),
        NAMESPACE,
        "cancellable",
        1,
        "via api",
        false,
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("cancellable", 1, Duration::from_secs(30))
        .await;

    let run = harness.get_run("cancellable", 1);
    assert_eq!(run.status, run::Status::Cancelled);
    assert!(run.status_reason.unwrap().description.contains("via api"));

    let task_run = harness.get_task_run("cancellable", 1, "alpha");
    assert_eq!(task_run.status, task_run::Status::Cancelled);

    // Exactly one graceful stop request, using the configured timeout.
    let stops = harness.engine.stop_requests();
    assert_eq!(stops.len(), 1);
    assert_eq!(
        stops[0].0,
        task_run_container_id(NAMESPACE, "cancellable", 1, "alpha")
    );
    assert_eq!(stops[0].1, Duration::from_secs(30));
}

#[tokio::test]
async fn parallelism_limit_gates_second_run() {
    let harness = TestHarness::new().await;

    // Containers stay up for a few polls so the first run holds its slot for a while.
    harness.engine.set_behavior(
        "ubuntu:latest",
        Behavior {
            polls_until_exit: 4,
            ..Default::default()
        },
    );

    harness.seed_pipeline("gated", 1, vec![Task::new("alpha", "ubuntu:latest")]);

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "gated",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    // The second start blocks in the parallelism gate until the first run completes.
    let second_start = tokio::spawn(start_run(
        harness.state.clone(),
        NAMESPACE,
        "gated",
        HashMap::new(),
        test_initiator(),
    ));

    let second_run = second_start.await.unwrap().unwrap();
    assert_eq!(second_run.run_id, 2);

    harness
        .wait_run_complete("gated", 2, Duration::from_secs(60))
        .await;

    assert_eq!(harness.get_run("gated", 1).status, run::Status::Successful);
    assert_eq!(harness.get_run("gated", 2).status, run::Status::Successful);

    let events = harness.events();

    let first_run_completed = event_position(&events, |kind| {
        matches!(kind, Kind::CompletedRun { run_id, .. } if *run_id == 1)
    });
    let second_run_task_started = event_position(&events, |kind| {
        matches!(kind, Kind::StartedTaskRun { run_id, .. } if *run_id == 2)
    });

    assert!(
        first_run_completed < second_run_task_started,
        "second run started a task before the first run completed"
    );
}

#[tokio::test]
async fn interpolation_miss_fails_task_before_scheduling() {
    let harness = TestHarness::new().await;

    harness.seed_pipeline(
        "secretful",
        0,
        vec![Task::new("alpha", "ubuntu:latest")
            .variable("TOKEN", "pipeline_secret{{ api_key }}")],
    );

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "secretful",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("secretful", 1, Duration::from_secs(30))
        .await;

    let task_run = harness.get_task_run("secretful", 1, "alpha");
    assert_eq!(task_run.status, task_run::Status::Failed);

    let reason = task_run.status_reason.unwrap();
    assert_eq!(reason.reason, StatusReasonType::FailedPrecondition);
    assert!(reason.description.contains("pipeline_secret"));
    assert!(reason.description.contains("api_key"));

    // The scheduler was never asked to start the container.
    let container_id = task_run_container_id(NAMESPACE, "secretful", 1, "alpha");
    assert!(harness.engine.container_variables(&container_id).is_none());

    let run = harness.get_run("secretful", 1);
    assert_eq!(run.status, run::Status::Failed);
}

#[tokio::test]
async fn manual_starts_emit_resolved_extension_event() {
    let harness = TestHarness::new().await;

    harness.seed_pipeline("manual", 0, vec![Task::new("alpha", "ubuntu:latest")]);

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "manual",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("manual", 1, Duration::from_secs(30))
        .await;

    harness
        .wait_for_event(
            |event| {
                matches!(
                    &event.kind,
                    Kind::ResolvedExtensionEvent { name, label, .. }
                        if name == "manual" && label == "api"
                )
            },
            Duration::from_secs(5),
        )
        .await;
}

#[tokio::test]
async fn ignore_pipeline_run_events_rejects_and_drops() {
    let harness = TestHarness::with_config_overrides(|config| {
        config.general.ignore_pipeline_run_events = true;
    })
    .await;

    harness.seed_pipeline("ignored", 0, vec![Task::new("alpha", "ubuntu:latest")]);

    // Manual starts are rejected outright.
    let result = start_run(
        harness.state.clone(),
        NAMESPACE,
        "ignored",
        HashMap::new(),
        test_initiator(),
    )
    .await;
    assert!(result.is_err());

    // Extension fired events are silently dropped with a skipped resolution.
    let result = gofer::runner::orchestrator::process_extension_event(
        harness.state.clone(),
        NAMESPACE,
        "ignored",
        "interval",
        "every-five-minutes",
        HashMap::new(),
        HashMap::new(),
    )
    .await
    .unwrap();
    assert!(result.is_none());

    harness
        .wait_for_event(
            |event| {
                matches!(
                    &event.kind,
                    Kind::ResolvedExtensionEvent { name, result, .. }
                        if name == "interval"
                            && result.status
                                == gofer::models::event::ExtensionResultStatus::Skipped
                )
            },
            Duration::from_secs(5),
        )
        .await;

    // No run rows were created for either attempt.
    let conn = harness.state.storage.read_conn().unwrap();
    let runs = gofer::storage::runs::list(&conn, NAMESPACE, "ignored", 0, 10, false).unwrap();
    assert!(runs.is_empty());
}

#[tokio::test]
async fn failed_task_fails_run_and_preserves_exit_code() {
    let harness = TestHarness::new().await;

    harness.engine.set_behavior(
        "flaky:latest",
        Behavior {
            exit_code: 3,
            ..Default::default()
        },
    );

    harness.seed_pipeline(
        "flaky",
        0,
        vec![
            Task::new("alpha", "flaky:latest"),
            Task::new("beta", "ubuntu:latest").depends_on("alpha", RequiredParentStatus::Success),
        ],
    );

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "flaky",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("flaky", 1, Duration::from_secs(30))
        .await;

    let alpha = harness.get_task_run("flaky", 1, "alpha");
    assert_eq!(alpha.status, task_run::Status::Failed);
    assert_eq!(alpha.exit_code, Some(3));
    assert_eq!(
        alpha.status_reason.unwrap().reason,
        StatusReasonType::AbnormalExit
    );

    // Downstream task skips because its Success dependency wasn't met.
    let beta = harness.get_task_run("flaky", 1, "beta");
    assert_eq!(beta.status, task_run::Status::Skipped);

    // Any failed task outranks skips when resolving the run status.
    let run = harness.get_run("flaky", 1);
    assert_eq!(run.status, run::Status::Failed);
    assert_eq!(
        run.status_reason.unwrap().reason,
        run::StatusReasonType::AbnormalExit
    );
}
