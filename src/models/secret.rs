use crate::{models::epoch_milli, storage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub fn pipeline_secret_store_key(namespace_id: &str, pipeline_id: &str, key: &str) -> String {
    format!("{namespace_id}_{pipeline_id}_{key}")
}

pub fn global_secret_store_key(key: &str) -> String {
    format!("global_{key}")
}

/// Metadata for a single secret key. The secret value itself only ever lives in the secret
/// store; this tracks ownership and, for global secrets, which namespaces may read it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Secret {
    /// The identifier for the secret value.
    pub key: String,

    /// Which namespaces are allowed to use this secret. An empty list means every namespace
    /// may use it. Only meaningful for global secrets.
    pub namespaces: Vec<String>,

    /// Time in epoch milliseconds that this secret was registered.
    pub created: u64,
}

impl Secret {
    pub fn new(key: &str, namespaces: Vec<String>) -> Self {
        Secret {
            key: key.into(),
            namespaces,
            created: epoch_milli(),
        }
    }

    pub fn is_allowed_namespace(&self, namespace_id: &str) -> bool {
        if self.namespaces.is_empty() {
            return true;
        }

        self.namespaces.iter().any(|ns| ns == namespace_id)
    }
}

impl TryFrom<storage::secret_store_global_keys::SecretStoreGlobalKey> for Secret {
    type Error = anyhow::Error;

    fn try_from(value: storage::secret_store_global_keys::SecretStoreGlobalKey) -> Result<Self> {
        let created = value.created.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'created' from storage value '{}'",
                value.created
            )
        })?;

        let namespaces = serde_json::from_str(&value.namespaces).with_context(|| {
            format!(
                "Could not parse field 'namespaces' from storage value '{}'",
                value.namespaces
            )
        })?;

        Ok(Secret {
            key: value.key,
            namespaces,
            created,
        })
    }
}

impl TryFrom<Secret> for storage::secret_store_global_keys::SecretStoreGlobalKey {
    type Error = anyhow::Error;

    fn try_from(value: Secret) -> Result<Self> {
        let namespaces = serde_json::to_string(&value.namespaces).with_context(|| {
            format!(
                "Could not parse field 'namespaces' to storage value; '{:#?}'",
                value.namespaces
            )
        })?;

        Ok(Self {
            key: value.key,
            namespaces,
            created: value.created.to_string(),
        })
    }
}
