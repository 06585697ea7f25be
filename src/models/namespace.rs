use crate::{models::epoch_milli, storage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A namespace represents a grouping of pipelines. Normally it is used to divide teams or
/// logically different sections of workloads. It is the highest level unit in the
/// execution hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Namespace {
    /// Unique identifier for the namespace.
    pub id: String,

    /// Humanized name for the namespace.
    pub name: String,

    /// Short description of the namespace's purpose.
    pub description: String,

    /// Time in epoch milliseconds when the namespace was created.
    pub created: u64,

    /// Time in epoch milliseconds when the namespace was last modified.
    pub modified: u64,
}

impl Namespace {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Namespace {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            created: epoch_milli(),
            modified: 0,
        }
    }
}

impl TryFrom<storage::namespaces::Namespace> for Namespace {
    type Error = anyhow::Error;

    fn try_from(value: storage::namespaces::Namespace) -> Result<Self> {
        let created = value.created.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'created' from storage value '{}'",
                value.created
            )
        })?;

        let modified = value.modified.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'modified' from storage value '{}'",
                value.modified
            )
        })?;

        Ok(Namespace {
            id: value.id,
            name: value.name,
            description: value.description,
            created,
            modified,
        })
    }
}

impl From<Namespace> for storage::namespaces::Namespace {
    fn from(value: Namespace) -> Self {
        Self {
            id: value.id,
            name: value.name,
            description: value.description,
            created: value.created.to_string(),
            modified: value.modified.to_string(),
        }
    }
}
