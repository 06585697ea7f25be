//! Scenarios for pipeline object storage: the per-pipeline object limit and its LRU
//! eviction behavior.

mod common;

use common::{TestHarness, NAMESPACE};
use bytes::Bytes;
use gofer::runner::{objects, RunnerError};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn pipeline_objects_evict_oldest_past_limit() {
    let harness = TestHarness::with_config_overrides(|config| {
        config.object_store.pipeline_object_limit = 2;
    })
    .await;

    harness.seed_pipeline("hoarder", 0, vec![]);

    let evicted = objects::put_pipeline_object(
        &harness.state,
        NAMESPACE,
        "hoarder",
        "a",
        Bytes::from("first"),
        false,
    )
    .await
    .unwrap();
    assert_eq!(evicted, None);

    let evicted = objects::put_pipeline_object(
        &harness.state,
        NAMESPACE,
        "hoarder",
        "b",
        Bytes::from("second"),
        false,
    )
    .await
    .unwrap();
    assert_eq!(evicted, None);

    // The third put pushes the pipeline over its limit of two; the oldest key gets evicted
    // and reported.
    let evicted = objects::put_pipeline_object(
        &harness.state,
        NAMESPACE,
        "hoarder",
        "c",
        Bytes::from("third"),
        false,
    )
    .await
    .unwrap();
    assert_eq!(evicted, Some("a".to_string()));

    let result = objects::get_pipeline_object(&harness.state, NAMESPACE, "hoarder", "a").await;
    assert!(matches!(result, Err(RunnerError::NotFound(_))));

    let b = objects::get_pipeline_object(&harness.state, NAMESPACE, "hoarder", "b")
        .await
        .unwrap();
    assert_eq!(b, Bytes::from("second"));

    let c = objects::get_pipeline_object(&harness.state, NAMESPACE, "hoarder", "c")
        .await
        .unwrap();
    assert_eq!(c, Bytes::from("third"));
}

#[tokio::test]
async fn pipeline_object_puts_collide_without_force() {
    let harness = TestHarness::new().await;

    harness.seed_pipeline("collider", 0, vec![]);

    objects::put_pipeline_object(
        &harness.state,
        NAMESPACE,
        "collider",
        "a",
        Bytes::from("first"),
        false,
    )
    .await
    .unwrap();

    let result = objects::put_pipeline_object(
        &harness.state,
        NAMESPACE,
        "collider",
        "a",
        Bytes::from("second"),
        false,
    )
    .await;
    assert!(matches!(result, Err(RunnerError::AlreadyExists(_))));

    // A forced overwrite succeeds and keeps the key's place in the eviction order.
    objects::put_pipeline_object(
        &harness.state,
        NAMESPACE,
        "collider",
        "a",
        Bytes::from("second"),
        true,
    )
    .await
    .unwrap();

    let value = objects::get_pipeline_object(&harness.state, NAMESPACE, "collider", "a")
        .await
        .unwrap();
    assert_eq!(value, Bytes::from("second"));
}
