//! The secret store is the mechanism in which the service manages pipeline and global
//! secrets. Secret values are encrypted at rest; which keys exist (and who may read them) is
//! tracked by the main storage layer.

pub mod sqlite;

use crate::conf;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use strum::{Display, EnumString};

/// Represents different secret store failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("requested entity not found")]
    NotFound,

    #[error("entity already exists")]
    Exists,

    #[error("could not init store; {0}")]
    FailedInitPrecondition(String),

    #[error("could not encrypt/decrypt key; {0}")]
    FailedEncryption(String),

    #[error("unexpected error occurred; {0}")]
    Internal(String),
}

/// The store trait defines what the interface between the run core and a secret store should
/// adhere to.
#[async_trait]
pub trait SecretStore: Debug + Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, SecretStoreError>;

    /// Write a secret. When `overwrite` is false a colliding key returns
    /// [`SecretStoreError::Exists`].
    async fn put(&self, key: &str, value: &str, overwrite: bool) -> Result<(), SecretStoreError>;

    async fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Engine {
    #[default]
    Sqlite,
}

pub async fn new(config: &conf::SecretStore) -> Result<Box<dyn SecretStore>, SecretStoreError> {
    #[allow(clippy::match_single_binding)]
    match config.engine {
        Engine::Sqlite => {
            if let Some(config) = &config.sqlite {
                let engine = sqlite::Engine::new(config)?;
                Ok(Box::new(engine))
            } else {
                Err(SecretStoreError::FailedInitPrecondition(
                    "sqlite engine settings not found in config".into(),
                ))
            }
        }
    }
}
