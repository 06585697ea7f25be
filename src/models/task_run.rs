use crate::{
    models::{epoch_milli, task, Variable},
    storage,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::debug;

/// Correctly formats the task run container id. This is passed to the container scheduler to
/// uniquely identify the referenced container. Because namespace, pipeline, and task ids
/// support hyphens only, the result of this will be a mix between underscores (which designate
/// a different part of the name) and hyphens (which are just parts of the ID). This distinct
/// naming scheme gives any parsers a good way to separate different parts of the name.
pub fn task_run_container_id(
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    task_run_id: &str,
) -> String {
    format!("task_{namespace_id}_{pipeline_id}_{run_id}_{task_run_id}")
}

/// The deterministic location for a task run's log file. Log readers tail this path and treat
/// the GOFER_EOF sentinel as end-of-stream.
pub fn task_run_log_path(
    dir: &str,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    task_run_id: &str,
) -> PathBuf {
    let mut path = PathBuf::new();
    path.push(dir);
    path.push(format!(
        "{namespace_id}_{pipeline_id}_{run_id}_{task_run_id}"
    ));

    path
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum State {
    /// Should never be in this state.
    #[default]
    Unknown,

    /// Pre-scheduling validation and prep.
    Processing,

    /// Waiting on parent tasks to finish.
    Waiting,

    /// Currently running as reported by the scheduler.
    Running,

    Complete,
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Status {
    #[default]
    Unknown,

    /// Has encountered an issue, either a container issue or scheduling issue.
    Failed,

    /// Finished with a proper exit code.
    Successful,

    /// Cancelled mid run due to user requested cancellation.
    Cancelled,

    /// Not run due to dependencies not being met.
    Skipped,
}

impl Status {
    /// Terminal statuses a parent can hold that still count as "finished" for an `Any`
    /// dependency edge.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Status::Successful | Status::Failed | Status::Skipped)
    }
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum StatusReasonType {
    #[default]
    Unknown,

    /// A non-zero exit code has been received.
    AbnormalExit,

    /// Encountered an error with the container scheduler.
    SchedulerError,

    /// User error in task run parameters or unmet dependencies.
    FailedPrecondition,

    /// User invoked cancellation.
    Cancelled,

    /// Task run was lost due to extreme internal error.
    Orphaned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReason {
    /// The specific type of task run failure.
    pub reason: StatusReasonType,

    /// A description of why the task run might have failed and what was going on at the time.
    pub description: String,
}

/// A task run is a specific execution of a task/container. It represents a 4th level unit in
/// the hierarchy: namespace -> pipeline -> run -> task run. It is the last and most specific
/// object in the execution model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRun {
    /// Unique identifier of the target namespace.
    pub namespace_id: String,

    /// Unique identifier of the target pipeline.
    pub pipeline_id: String,

    /// Unique identifier of the target run.
    pub run_id: u64,

    /// Unique identifier of the current task being executed. Taken from the task id.
    pub task_run_id: String,

    /// Time of task run creation in epoch milliseconds.
    pub created: u64,

    /// Time of task run start in epoch milliseconds.
    pub started: u64,

    /// Time of task run end in epoch milliseconds.
    pub ended: u64,

    /// The exit code of the task run container, if it is finished.
    pub exit_code: Option<u8>,

    /// Whether the logs have past their retention time.
    pub logs_expired: bool,

    /// If the logs for this run have been removed. This can be due to user request or
    /// automatic action based on expiry time.
    pub logs_removed: bool,

    /// The current state of the task run within the execution model. Describes if the task run
    /// is in progress or not.
    pub state: State,

    /// The final result of the task run.
    pub status: Status,

    /// More information on the circumstances around a particular task run's status.
    pub status_reason: Option<StatusReason>,

    /// The environment variables injected during this particular task run.
    pub variables: Vec<Variable>,

    /// Information about the underlying task this task run ran.
    pub task: task::Task,
}

impl TaskRun {
    pub fn new(namespace_id: &str, pipeline_id: &str, run_id: u64, task: task::Task) -> Self {
        TaskRun {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            run_id,
            task_run_id: task.id.clone(),
            created: epoch_milli(),
            started: 0,
            ended: 0,
            exit_code: None,
            logs_expired: false,
            logs_removed: false,
            state: State::Processing,
            status: Status::Unknown,
            status_reason: None,
            variables: vec![],
            task,
        }
    }
}

impl TryFrom<storage::task_runs::TaskRun> for TaskRun {
    type Error = anyhow::Error;

    fn try_from(value: storage::task_runs::TaskRun) -> Result<Self> {
        let created = value.created.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'created' from storage value '{}'",
                value.created
            )
        })?;

        let started = value.started.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'started' from storage value '{}'",
                value.started
            )
        })?;

        let ended = value.ended.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'ended' from storage value '{}'",
                value.ended
            )
        })?;

        let state = State::from_str(&value.state).with_context(|| {
            format!(
                "Could not parse field 'state' from storage value '{}'",
                value.state
            )
        })?;

        let status = Status::from_str(&value.status).with_context(|| {
            format!(
                "Could not parse field 'status' from storage value '{}'",
                value.status
            )
        })?;

        let status_reason = serde_json::from_str(&value.status_reason).with_context(|| {
            format!(
                "Could not parse field 'status_reason' from storage value; '{:#?}'",
                value.status_reason
            )
        })?;

        let variables = serde_json::from_str(&value.variables).with_context(|| {
            format!(
                "Could not parse field 'variables' from storage value; '{:#?}'",
                value.variables
            )
        })?;

        let task = serde_json::from_str(&value.task).with_context(|| {
            format!(
                "Could not parse field 'task' from storage value; '{:#?}'",
                value.task
            )
        })?;

        let exit_code = value.exit_code.and_then(|value| match u8::try_from(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(
                    value = value,
                    error = %e,
                    "Could not parse field 'exit_code' from storage value; Defaulting to None"
                );
                None
            }
        });

        Ok(TaskRun {
            namespace_id: value.namespace_id,
            pipeline_id: value.pipeline_id,
            run_id: value.run_id.try_into()?,
            task_run_id: value.task_run_id,
            created,
            started,
            ended,
            exit_code,
            logs_expired: value.logs_expired,
            logs_removed: value.logs_removed,
            state,
            status,
            status_reason,
            variables,
            task,
        })
    }
}

impl TryFrom<TaskRun> for storage::task_runs::TaskRun {
    type Error = anyhow::Error;

    fn try_from(value: TaskRun) -> Result<Self> {
        let status_reason = serde_json::to_string(&value.status_reason).with_context(|| {
            format!(
                "Could not parse field 'status_reason' to storage value; '{:#?}'",
                value.status_reason
            )
        })?;

        let task = serde_json::to_string(&value.task).with_context(|| {
            format!(
                "Could not parse field 'task' to storage value; '{:#?}'",
                value.task
            )
        })?;

        let variables = serde_json::to_string(&value.variables).with_context(|| {
            format!(
                "Could not parse field 'variables' to storage value; '{:#?}'",
                value.variables
            )
        })?;

        let exit_code = value.exit_code.map(i64::from);

        Ok(Self {
            namespace_id: value.namespace_id,
            pipeline_id: value.pipeline_id,
            run_id: value.run_id.try_into()?,
            task_run_id: value.task_run_id,
            task,
            created: value.created.to_string(),
            started: value.started.to_string(),
            ended: value.ended.to_string(),
            exit_code,
            logs_expired: value.logs_expired,
            logs_removed: value.logs_removed,
            state: value.state.to_string(),
            status: value.status.to_string(),
            status_reason,
            variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_ids_are_deterministic() {
        let id = task_run_container_id("default", "build-pipeline", 12, "compile");
        assert_eq!(id, "task_default_build-pipeline_12_compile");
    }

    #[test]
    fn log_paths_are_deterministic() {
        let path = task_run_log_path("/tmp/logs", "default", "build-pipeline", 12, "compile");
        assert_eq!(
            path.to_string_lossy(),
            "/tmp/logs/default_build-pipeline_12_compile"
        );
    }
}
