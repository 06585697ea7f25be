//! Domain models for the run execution hierarchy: namespace -> pipeline -> run -> task run.
//!
//! Models convert to and from their storage representations explicitly; the storage layer
//! only ever sees strings and integers.

pub mod event;
pub mod namespace;
pub mod object;
pub mod pipeline;
pub mod pipeline_config;
pub mod run;
pub mod secret;
pub mod task;
pub mod task_run;
pub mod token;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use strum::{Display, EnumString};

/// Return the current epoch time in milliseconds.
pub fn epoch_milli() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Authentication information for container registries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryAuth {
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum VariableSource {
    #[default]
    Unknown,

    /// From the user's own pipeline configuration.
    PipelineConfig,

    /// From the run executor itself.
    System,

    /// Injected at the beginning of a particular run.
    RunOptions,

    /// Injected by a subscribed extension.
    Extension,

    /// Resolved from the secret store.
    Secret,
}

/// A variable is a key value pair that is used either at a run or task level.
/// The variable is inserted as an environment variable to an eventual task run.
/// It can be owned by different parts of the system which control where the potentially
/// sensitive variables might show up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variable {
    pub key: String,
    pub value: String,
    pub source: VariableSource,
}
