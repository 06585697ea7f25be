use crate::{
    models::{epoch_milli, task},
    storage,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ConfigState {
    #[default]
    Unknown,

    /// Has never been deployed.
    Unreleased,

    /// Currently deployed.
    Live,

    /// Has previously been deployed and is now defunct.
    Deprecated,
}

/// A representation of the user's configuration settings for a particular pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Unique identifier of the target namespace.
    pub namespace_id: String,

    /// Unique identifier of the target pipeline.
    pub pipeline_id: String,

    /// The iteration number for this pipeline's configs.
    pub version: u64,

    /// The amount of runs allowed to happen at any given time. 0 defers to the global limit.
    pub parallelism: u64,

    /// Human readable name for pipeline.
    pub name: String,

    /// Description of pipeline's purpose and other details.
    pub description: String,

    /// Tasks associated with this pipeline.
    pub tasks: HashMap<String, task::Task>,

    /// The deployment state of the config. This is used to determine the state of this
    /// particular config and if it is currently being used or not.
    pub state: ConfigState,

    /// Time in epoch milliseconds when this pipeline config was registered.
    pub registered: u64,

    /// Time in epoch milliseconds when this pipeline config was no longer used.
    pub deprecated: u64,
}

impl Config {
    pub fn new(
        namespace_id: &str,
        pipeline_id: &str,
        version: u64,
        name: &str,
        parallelism: u64,
        tasks: Vec<task::Task>,
    ) -> Self {
        Config {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            version,
            parallelism,
            name: name.into(),
            description: String::new(),
            tasks: tasks
                .into_iter()
                .map(|task| (task.id.clone(), task))
                .collect(),
            state: ConfigState::Unreleased,
            registered: epoch_milli(),
            deprecated: 0,
        }
    }

    pub fn to_storage(
        &self,
    ) -> Result<(
        storage::pipeline_configs::PipelineConfig,
        Vec<storage::tasks::Task>,
    )> {
        let config = storage::pipeline_configs::PipelineConfig {
            namespace_id: self.namespace_id.clone(),
            pipeline_id: self.pipeline_id.clone(),
            version: self.version.try_into()?,
            parallelism: self.parallelism.try_into()?,
            name: self.name.clone(),
            description: self.description.clone(),
            registered: self.registered.to_string(),
            deprecated: self.deprecated.to_string(),
            state: self.state.to_string(),
        };

        let mut tasks: Vec<storage::tasks::Task> = vec![];
        for task in self.tasks.values() {
            let storage_task = task
                .to_storage(
                    self.namespace_id.clone(),
                    self.pipeline_id.clone(),
                    self.version.try_into()?,
                )
                .context("Could not properly serialize task to DB")?;

            tasks.push(storage_task);
        }

        Ok((config, tasks))
    }

    pub fn from_storage(
        config: storage::pipeline_configs::PipelineConfig,
        tasks: Vec<storage::tasks::Task>,
    ) -> Result<Self> {
        let registered = config.registered.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'registered' from storage value '{}'",
                config.registered
            )
        })?;

        let deprecated = config.deprecated.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'deprecated' from storage value '{}'",
                config.deprecated
            )
        })?;

        let state = ConfigState::from_str(&config.state).with_context(|| {
            format!(
                "Could not parse field 'state' from storage value '{}'",
                config.state
            )
        })?;

        let mut parsed_tasks: HashMap<String, task::Task> = HashMap::new();
        for storage_task in tasks {
            let task = task::Task::try_from(storage_task)
                .context("Could not parse task from storage value")?;
            parsed_tasks.insert(task.id.clone(), task);
        }

        Ok(Config {
            namespace_id: config.namespace_id,
            pipeline_id: config.pipeline_id,
            version: config.version.try_into()?,
            parallelism: config.parallelism.try_into()?,
            name: config.name,
            description: config.description,
            tasks: parsed_tasks,
            state,
            registered,
            deprecated,
        })
    }
}
