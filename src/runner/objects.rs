//! Pipeline and run scoped object operations.
//!
//! The object store is a temporary key-value storage mechanism for pipelines and runs.
//! Pipeline objects last forever but are limited in number; the oldest key is evicted once a
//! pipeline goes over its limit. Run objects are unlimited in number but are removed once
//! their run passes the configured expiry window.

use crate::models::object;
use crate::runner::{RunnerError, RunnerState};
use crate::{object_store::ObjectStoreError, storage};
use bytes::Bytes;
use tracing::debug;

fn map_storage_error(e: storage::StorageError, entity: &str) -> RunnerError {
    match e {
        storage::StorageError::NotFound => RunnerError::NotFound(entity.into()),
        storage::StorageError::Exists => RunnerError::AlreadyExists(entity.into()),
        _ => RunnerError::Internal(format!("{e}")),
    }
}

fn map_object_store_error(e: ObjectStoreError, entity: &str) -> RunnerError {
    match e {
        ObjectStoreError::NotFound => RunnerError::NotFound(entity.into()),
        ObjectStoreError::Exists => RunnerError::AlreadyExists(entity.into()),
        _ => RunnerError::Internal(format!("{e}")),
    }
}

/// Write a pipeline scoped object. When the pipeline is over its configured object limit the
/// least recently created key is evicted and returned.
pub async fn put_pipeline_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
    content: Bytes,
    force: bool,
) -> Result<Option<String>, RunnerError> {
    let store_key = object::pipeline_object_store_key(namespace_id, pipeline_id, key);

    state
        .object_store
        .put(&store_key, content, force)
        .await
        .map_err(|e| map_object_store_error(e, key))?;

    let new_object = object::Object::new(key);

    {
        let conn = state
            .storage
            .write_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        let result = storage::object_store_pipeline_keys::insert(
            &conn,
            &storage::object_store_pipeline_keys::ObjectStorePipelineKey {
                namespace_id: namespace_id.into(),
                pipeline_id: pipeline_id.into(),
                key: key.into(),
                created: new_object.created.to_string(),
            },
        );

        match result {
            Ok(_) => {}
            // An overwrite of an existing key keeps its original place in the eviction order.
            Err(storage::StorageError::Exists) if force => {}
            Err(e) => return Err(map_storage_error(e, key)),
        }
    }

    evict_oldest_pipeline_object(state, namespace_id, pipeline_id).await
}

/// Enforces `pipeline_object_limit`. Returns the evicted key, if any.
async fn evict_oldest_pipeline_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
) -> Result<Option<String>, RunnerError> {
    let limit = state.config.object_store.pipeline_object_limit;
    if limit == 0 {
        return Ok(None);
    }

    let keys = {
        let conn = state
            .storage
            .read_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        storage::object_store_pipeline_keys::list(&conn, namespace_id, pipeline_id)
            .map_err(|e| RunnerError::Internal(format!("{e}")))?
    };

    if keys.len() as u64 <= limit {
        return Ok(None);
    }

    // The list is oldest-first; only a single put can have happened since the last
    // enforcement, so one eviction is enough.
    let evicted = keys
        .first()
        .map(|k| k.key.clone())
        .ok_or_else(|| RunnerError::Internal("object key list unexpectedly empty".into()))?;

    state
        .object_store
        .delete(&object::pipeline_object_store_key(
            namespace_id,
            pipeline_id,
            &evicted,
        ))
        .await
        .map_err(|e| map_object_store_error(e, &evicted))?;

    {
        let conn = state
            .storage
            .write_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        storage::object_store_pipeline_keys::delete(&conn, namespace_id, pipeline_id, &evicted)
            .map_err(|e| map_storage_error(e, &evicted))?;
    }

    debug!(
        namespace_id = namespace_id,
        pipeline_id = pipeline_id,
        key = evicted,
        "evicted pipeline object past limit"
    );

    Ok(Some(evicted))
}

pub async fn get_pipeline_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
) -> Result<Bytes, RunnerError> {
    state
        .object_store
        .get(&object::pipeline_object_store_key(
            namespace_id,
            pipeline_id,
            key,
        ))
        .await
        .map_err(|e| map_object_store_error(e, key))
}

pub async fn delete_pipeline_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
) -> Result<(), RunnerError> {
    {
        let conn = state
            .storage
            .write_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        storage::object_store_pipeline_keys::delete(&conn, namespace_id, pipeline_id, key)
            .map_err(|e| map_storage_error(e, key))?;
    }

    state
        .object_store
        .delete(&object::pipeline_object_store_key(
            namespace_id,
            pipeline_id,
            key,
        ))
        .await
        .map_err(|e| map_object_store_error(e, key))
}

/// Write a run scoped object. Run objects are not limited in number; they expire with their
/// run instead.
pub async fn put_run_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    key: &str,
    content: Bytes,
    force: bool,
) -> Result<(), RunnerError> {
    let store_key = object::run_object_store_key(namespace_id, pipeline_id, run_id, key);

    state
        .object_store
        .put(&store_key, content, force)
        .await
        .map_err(|e| map_object_store_error(e, key))?;

    let new_object = object::Object::new(key);

    let conn = state
        .storage
        .write_conn()
        .map_err(|e| RunnerError::Internal(format!("{e}")))?;

    let result = storage::object_store_run_keys::insert(
        &conn,
        &storage::object_store_run_keys::ObjectStoreRunKey {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            run_id: run_id.try_into().unwrap_or_default(),
            key: key.into(),
            created: new_object.created.to_string(),
        },
    );

    match result {
        Ok(_) => Ok(()),
        Err(storage::StorageError::Exists) if force => Ok(()),
        Err(e) => Err(map_storage_error(e, key)),
    }
}

pub async fn get_run_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    key: &str,
) -> Result<Bytes, RunnerError> {
    state
        .object_store
        .get(&object::run_object_store_key(
            namespace_id,
            pipeline_id,
            run_id,
            key,
        ))
        .await
        .map_err(|e| map_object_store_error(e, key))
}

pub async fn delete_run_object(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    key: &str,
) -> Result<(), RunnerError> {
    {
        let conn = state
            .storage
            .write_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        storage::object_store_run_keys::delete(
            &conn,
            namespace_id,
            pipeline_id,
            run_id.try_into().unwrap_or_default(),
            key,
        )
        .map_err(|e| map_storage_error(e, key))?;
    }

    state
        .object_store
        .delete(&object::run_object_store_key(
            namespace_id,
            pipeline_id,
            run_id,
            key,
        ))
        .await
        .map_err(|e| map_object_store_error(e, key))
}
