use crate::{
    models::{RegistryAuth, Variable, VariableSource},
    storage,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// The predicate a parent task's terminal status must satisfy before a dependent task is
/// allowed to run.
#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum RequiredParentStatus {
    #[default]
    Unknown,
    Any,
    Success,
    Failure,
}

/// A task represents a particular workload within a pipeline. Tasks are composable within a
/// larger pipeline, meaning they can be run before, after, or alongside other tasks. Tasks
/// are the lowest level of the execution hierarchy and describe how a single container
/// should be handled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Unique identifier for the task.
    pub id: String,

    /// Short description about the workload.
    pub description: String,

    /// Which container image to run for this specific task.
    ///
    /// Example: "ubuntu:latest"
    pub image: String,

    /// Auth credentials for the image's registry.
    pub registry_auth: Option<RegistryAuth>,

    /// Which other tasks (by id) this task depends on.
    pub depends_on: HashMap<String, RequiredParentStatus>,

    /// Variables which will be passed in as env vars to the task.
    pub variables: Vec<Variable>,

    /// Command to run on init of container; follows normal docker convention for entrypoint.
    pub entrypoint: Option<Vec<String>>,

    /// Command to run on init of container; follows normal docker convention of command.
    pub command: Option<Vec<String>>,

    /// Attempt to pull the container image from the upstream repository even if it already
    /// exists locally. Useful for images that don't practice proper tagging or versioning.
    pub always_pull: bool,

    /// Whether to inject a run specific API key. Useful for using the service's API within
    /// the container.
    pub inject_api_token: bool,
}

impl Task {
    pub fn new(id: &str, image: &str) -> Self {
        Task {
            id: id.into(),
            description: String::new(),
            image: image.into(),
            registry_auth: None,
            depends_on: HashMap::new(),
            variables: vec![],
            entrypoint: None,
            command: None,
            always_pull: false,
            inject_api_token: false,
        }
    }

    /// Convenience for building dependency maps in pipeline definitions.
    pub fn depends_on(mut self, task_id: &str, state: RequiredParentStatus) -> Self {
        self.depends_on.insert(task_id.into(), state);
        self
    }

    /// Add a plaintext env var to the task, sourced from the pipeline config.
    pub fn variable(mut self, key: &str, value: &str) -> Self {
        self.variables.push(Variable {
            key: key.into(),
            value: value.into(),
            source: VariableSource::PipelineConfig,
        });
        self
    }

    pub fn to_storage(
        &self,
        namespace_id: String,
        pipeline_id: String,
        version: i64,
    ) -> Result<storage::tasks::Task> {
        let task = storage::tasks::Task {
            namespace_id,
            pipeline_id,
            pipeline_config_version: version,
            task_id: self.id.clone(),
            description: self.description.clone(),
            image: self.image.clone(),
            registry_auth: serde_json::to_string(&self.registry_auth)?,
            depends_on: serde_json::to_string(&self.depends_on)?,
            variables: serde_json::to_string(&self.variables)?,
            entrypoint: serde_json::to_string(&self.entrypoint)?,
            command: serde_json::to_string(&self.command)?,
            always_pull: self.always_pull,
            inject_api_token: self.inject_api_token,
        };

        Ok(task)
    }
}

impl TryFrom<storage::tasks::Task> for Task {
    type Error = anyhow::Error;

    fn try_from(value: storage::tasks::Task) -> Result<Self> {
        let registry_auth = serde_json::from_str(&value.registry_auth).with_context(|| {
            format!(
                "Could not parse field 'registry_auth' from storage value '{}'",
                value.registry_auth
            )
        })?;

        let depends_on = serde_json::from_str(&value.depends_on).with_context(|| {
            format!(
                "Could not parse field 'depends_on' from storage value '{}'",
                value.depends_on
            )
        })?;

        let variables = serde_json::from_str(&value.variables).with_context(|| {
            format!(
                "Could not parse field 'variables' from storage value '{}'",
                value.variables
            )
        })?;

        let entrypoint = serde_json::from_str(&value.entrypoint).with_context(|| {
            format!(
                "Could not parse field 'entrypoint' from storage value '{}'",
                value.entrypoint
            )
        })?;

        let command = serde_json::from_str(&value.command).with_context(|| {
            format!(
                "Could not parse field 'command' from storage value '{}'",
                value.command
            )
        })?;

        Ok(Task {
            id: value.task_id,
            description: value.description,
            image: value.image,
            registry_auth,
            depends_on,
            variables,
            entrypoint,
            command,
            always_pull: value.always_pull,
            inject_api_token: value.inject_api_token,
        })
    }
}
