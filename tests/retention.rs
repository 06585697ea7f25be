//! Scenarios for the per-run retention janitors: run object expiry and task run log expiry.

mod common;

use common::{TestHarness, NAMESPACE};
use bytes::Bytes;
use gofer::models::event::Kind;
use gofer::models::run::{Initiator, InitiatorType};
use gofer::models::task::Task;
use gofer::models::task_run::task_run_log_path;
use gofer::runner::{objects, orchestrator::start_run};
use gofer::scheduler::in_memory::Behavior;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::time::{Duration, Instant};

fn test_initiator() -> Initiator {
    Initiator {
        kind: InitiatorType::Human,
        name: "tester".into(),
        reason: "integration testing".into(),
    }
}

#[tokio::test]
async fn run_objects_expire_past_retention_window() {
    let harness = TestHarness::with_config_overrides(|config| {
        config.object_store.run_object_expiry = 1;
    })
    .await;

    harness.seed_pipeline("expiring", 0, vec![Task::new("alpha", "ubuntu:latest")]);

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "expiring",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("expiring", 1, Duration::from_secs(30))
        .await;

    objects::put_run_object(
        &harness.state,
        NAMESPACE,
        "expiring",
        1,
        "result",
        Bytes::from("42"),
        false,
    )
    .await
    .unwrap();

    // The second run's janitor should expire run 1's objects once run 1 is outside the
    // single-run retention window.
    start_run(
        harness.state.clone(),
        NAMESPACE,
        "expiring",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("expiring", 2, Duration::from_secs(30))
        .await;

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let run = harness.get_run("expiring", 1);
        if run.store_objects_expired {
            break;
        }

        if Instant::now() > deadline {
            panic!("run 1 objects were never expired");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let result = objects::get_run_object(&harness.state, NAMESPACE, "expiring", 1, "result").await;
    assert!(matches!(
        result,
        Err(gofer::runner::RunnerError::NotFound(_))
    ));

    harness
        .wait_for_event(
            |event| matches!(event.kind, Kind::ExpiredRunObjects { run_id, .. } if run_id == 1),
            Duration::from_secs(5),
        )
        .await;
}

#[tokio::test]
async fn task_run_logs_expire_past_retention_window() {
    let harness = TestHarness::with_config_overrides(|config| {
        config.general.task_run_log_expiry = 1;
    })
    .await;

    harness.engine.set_behavior(
        "ubuntu:latest",
        Behavior {
            log_lines: vec!["some log output".into()],
            ..Default::default()
        },
    );

    harness.seed_pipeline("log-expiry", 0, vec![Task::new("alpha", "ubuntu:latest")]);

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "log-expiry",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("log-expiry", 1, Duration::from_secs(30))
        .await;

    let log_path = task_run_log_path(
        &harness.state.config.general.task_run_logs_dir,
        NAMESPACE,
        "log-expiry",
        1,
        "alpha",
    );

    // Wait for the log pump to finish writing run 1's file.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !log_path.exists() {
        if Instant::now() > deadline {
            panic!("run 1 log file never appeared");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "log-expiry",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("log-expiry", 2, Duration::from_secs(30))
        .await;

    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let task_run = harness.get_task_run("log-expiry", 1, "alpha");
        if task_run.logs_expired && task_run.logs_removed {
            break;
        }

        if Instant::now() > deadline {
            panic!("run 1 logs were never expired");
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert!(!log_path.exists(), "expired log file still on disk");
}

#[tokio::test]
async fn injected_api_tokens_reach_the_container_resolved() {
    let harness = TestHarness::new().await;

    let mut task = Task::new("alpha", "ubuntu:latest");
    task.inject_api_token = true;

    harness.seed_pipeline("tokenized", 0, vec![task]);

    start_run(
        harness.state.clone(),
        NAMESPACE,
        "tokenized",
        HashMap::new(),
        test_initiator(),
    )
    .await
    .unwrap();

    harness
        .wait_run_complete("tokenized", 1, Duration::from_secs(30))
        .await;

    let run = harness.get_run("tokenized", 1);
    assert!(run.token_id.is_some());

    // The container received the resolved token plaintext, not the secret reference.
    let container_id =
        gofer::models::task_run::task_run_container_id(NAMESPACE, "tokenized", 1, "alpha");
    let variables = harness.engine.container_variables(&container_id).unwrap();

    let token_value = variables.get("GOFER_API_TOKEN").unwrap();
    assert_eq!(token_value.len(), 32);
    assert!(!token_value.contains("pipeline_secret"));

    // The stored task run keeps the unresolved reference so the plaintext never lands in
    // the database.
    let task_run = harness.get_task_run("tokenized", 1, "alpha");
    let stored_token_var = task_run
        .variables
        .iter()
        .find(|variable| variable.key == "GOFER_API_TOKEN")
        .unwrap();
    assert!(stored_token_var.value.contains("pipeline_secret"));

    // And the token hash is registered for later authentication.
    let conn = harness.state.storage.read_conn().unwrap();
    let token =
        gofer::storage::tokens::get_by_id(&conn, &run.token_id.unwrap()).unwrap();
    assert_eq!(token.token_type, "run");
}
