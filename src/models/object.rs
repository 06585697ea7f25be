use crate::models::epoch_milli;
use serde::{Deserialize, Serialize};

pub fn pipeline_object_store_key(namespace_id: &str, pipeline_id: &str, key: &str) -> String {
    format!("{namespace_id}_{pipeline_id}_{key}")
}

pub fn run_object_store_key(
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    key: &str,
) -> String {
    format!("{namespace_id}_{pipeline_id}_{run_id}_{key}")
}

/// A reference to a single value within the object store. The object bytes themselves only
/// ever live in the store; this is the bookkeeping half used for listing and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Object {
    /// The identifier for the object value.
    pub key: String,

    /// Time in epoch milliseconds that this object was registered.
    pub created: u64,
}

impl Object {
    pub fn new(key: &str) -> Self {
        Object {
            key: key.into(),
            created: epoch_milli(),
        }
    }
}
