//! The object store is the mechanism in which the service stores pipeline and run level
//! objects. It is meant to act as a basic, opaque byte-blob KV store; which keys exist is
//! tracked by the main storage layer, not the store itself.

pub mod filesystem;

use crate::conf;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::fmt::Debug;
use strum::{Display, EnumString};

/// Represents different object store failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ObjectStoreError {
    #[error("requested entity not found")]
    NotFound,

    #[error("entity already exists")]
    Exists,

    #[error("could not init store; {0}")]
    FailedInitPrecondition(String),

    #[error("unexpected error occurred; {0}")]
    Internal(String),
}

/// The store trait defines what the interface between the run core and an object store
/// should adhere to.
#[async_trait]
pub trait ObjectStore: Debug + Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Write an object. When `overwrite` is false a colliding key returns
    /// [`ObjectStoreError::Exists`].
    async fn put(&self, key: &str, content: Bytes, overwrite: bool)
        -> Result<(), ObjectStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Engine {
    #[default]
    Filesystem,
}

pub async fn new(config: &conf::ObjectStore) -> Result<Box<dyn ObjectStore>, ObjectStoreError> {
    #[allow(clippy::match_single_binding)]
    match config.engine {
        Engine::Filesystem => {
            if let Some(config) = &config.filesystem {
                let engine = filesystem::Engine::new(config).await?;
                Ok(Box::new(engine))
            } else {
                Err(ObjectStoreError::FailedInitPrecondition(
                    "filesystem engine settings not found in config".into(),
                ))
            }
        }
    }
}
