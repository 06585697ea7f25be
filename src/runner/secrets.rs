//! Pipeline and global secret operations.
//!
//! Pipeline secrets are only accessible from within their own pipeline. Global secrets are
//! managed by admins and carry a namespace allowlist which is enforced at interpolation
//! time.

use crate::models::{epoch_milli, secret};
use crate::runner::{RunnerError, RunnerState};
use crate::{secret_store::SecretStoreError, storage};

fn map_storage_error(e: storage::StorageError, entity: &str) -> RunnerError {
    match e {
        storage::StorageError::NotFound => RunnerError::NotFound(entity.into()),
        storage::StorageError::Exists => RunnerError::AlreadyExists(entity.into()),
        _ => RunnerError::Internal(format!("{e}")),
    }
}

fn map_secret_store_error(e: SecretStoreError, entity: &str) -> RunnerError {
    match e {
        SecretStoreError::NotFound => RunnerError::NotFound(entity.into()),
        SecretStoreError::Exists => RunnerError::AlreadyExists(entity.into()),
        _ => RunnerError::Internal(format!("{e}")),
    }
}

pub async fn put_pipeline_secret(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
    value: &str,
    force: bool,
) -> Result<(), RunnerError> {
    state
        .secret_store
        .put(
            &secret::pipeline_secret_store_key(namespace_id, pipeline_id, key),
            value,
            force,
        )
        .await
        .map_err(|e| map_secret_store_error(e, key))?;

    let conn = state
        .storage
        .write_conn()
        .map_err(|e| RunnerError::Internal(format!("{e}")))?;

    let result = storage::secret_store_pipeline_keys::insert(
        &conn,
        &storage::secret_store_pipeline_keys::SecretStorePipelineKey {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            key: key.into(),
            created: epoch_milli().to_string(),
        },
    );

    match result {
        Ok(_) => Ok(()),
        Err(storage::StorageError::Exists) if force => Ok(()),
        Err(e) => Err(map_storage_error(e, key)),
    }
}

pub async fn get_pipeline_secret(
    state: &RunnerState,
    namespace_id: &str,
    pipeline_id: &str,
    key: &str,
) -> Result<Vec<u8>, RunnerError> {
    state
        .secret_store
        .get(&secret::pipeline_secret_store_key(
            namespace_id,
            pipeline_id,
            key,
        ))
        .await
        .map_err(|e| map_secret_store_error(e, key))
}

pub async fn delete_pipeline_secret(
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

        storage::secret_store_pipeline_keys::delete(&conn, namespace_id, pipeline_id, key)
            .map_err(|e| map_storage_error(e, key))?;
    }

    state
        .secret_store
        .delete(&secret::pipeline_secret_store_key(
            namespace_id,
            pipeline_id,
            key,
        ))
        .await
        .map_err(|e| map_secret_store_error(e, key))
}

pub async fn put_global_secret(
    state: &RunnerState,
    key: &str,
    namespaces: Vec<String>,
    value: &str,
    force: bool,
) -> Result<(), RunnerError> {
    state
        .secret_store
        .put(&secret::global_secret_store_key(key), value, force)
        .await
        .map_err(|e| map_secret_store_error(e, key))?;

    let new_secret = secret::Secret::new(key, namespaces);
    let storage_secret: storage::secret_store_global_keys::SecretStoreGlobalKey = new_secret
        .try_into()
        .map_err(|e: anyhow::Error| RunnerError::Internal(format!("{e}")))?;

    let conn = state
        .storage
        .write_conn()
        .map_err(|e| RunnerError::Internal(format!("{e}")))?;

    let result = storage::secret_store_global_keys::insert(&conn, &storage_secret);

    match result {
        Ok(_) => Ok(()),
        Err(storage::StorageError::Exists) if force => Ok(()),
        Err(e) => Err(map_storage_error(e, key)),
    }
}

pub async fn get_global_secret(state: &RunnerState, key: &str) -> Result<Vec<u8>, RunnerError> {
    state
        .secret_store
        .get(&secret::global_secret_store_key(key))
        .await
        .map_err(|e| map_secret_store_error(e, key))
}

pub async fn delete_global_secret(state: &RunnerState, key: &str) -> Result<(), RunnerError> {
    {
        let conn = state
            .storage
            .write_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        storage::secret_store_global_keys::delete(&conn, key)
            .map_err(|e| map_storage_error(e, key))?;
    }

    state
        .secret_store
        .delete(&secret::global_secret_store_key(key))
        .await
        .map_err(|e| map_secret_store_error(e, key))
}
