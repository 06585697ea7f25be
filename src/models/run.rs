use crate::{
    models::{epoch_milli, Variable},
    storage,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum State {
    #[default]
    Unknown,

    /// Before the tasks in a run are sent to the scheduler it must complete various steps like
    /// validation checking. This state represents that step, along with waiting on the
    /// parallelism gate.
    Pending,

    /// Currently running.
    Running,

    /// All tasks have been resolved and the run is no longer being executed.
    Complete,
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Status {
    /// Could not determine current state of the status. Should only be in this state if the
    /// run has not yet completed.
    #[default]
    Unknown,

    /// One or more tasks in the run have failed.
    Failed,

    /// All tasks in the run have completed with a non-failure state.
    Successful,

    /// One or more tasks in the run have been cancelled.
    Cancelled,
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum StatusReasonType {
    #[default]
    Unknown,

    /// While executing the run one or more tasks exited with an abnormal exit code.
    AbnormalExit,

    /// While executing the run one or more tasks could not be scheduled.
    SchedulerError,

    /// The run could not be executed as requested due to user defined attributes given.
    FailedPrecondition,

    /// One or more tasks could not be completed due to a user cancelling the run.
    UserCancelled,

    /// One or more tasks could not be completed due to the system or admin cancelling the run.
    AdminCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReason {
    /// The specific type of run failure.
    pub reason: StatusReasonType,

    /// A description of why the run might have failed and what was going on at the time.
    pub description: String,
}

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum InitiatorType {
    #[default]
    Unknown,
    Bot,
    Human,
    Extension,
}

/// Information about what started the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Initiator {
    /// Which type of user initiated the run.
    pub kind: InitiatorType,

    /// The name of the user or extension which initiated the run.
    pub name: String,

    /// The reason the run was initiated.
    pub reason: String,
}

/// A run is one or more tasks being executed on behalf of some initiator.
/// Run is a third level unit containing task runs and being contained in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Run {
    /// Unique identifier of the target namespace.
    pub namespace_id: String,

    /// Unique identifier of the target pipeline.
    pub pipeline_id: String,

    /// Which version of the pipeline config this run executed.
    pub pipeline_config_version: u64,

    /// Unique, monotonically increasing identifier of the target run.
    pub run_id: u64,

    /// Time of run start in epoch milliseconds.
    pub started: u64,

    /// Time of run end in epoch milliseconds.
    pub ended: u64,

    /// The current state of the run within the execution model. Describes if the run is
    /// in progress or not.
    pub state: State,

    /// The final result of the run.
    pub status: Status,

    /// More information on the circumstances around a particular run's status.
    pub status_reason: Option<StatusReason>,

    /// Information about what started the run.
    pub initiator: Initiator,

    /// Run level environment variables to be passed to each task run.
    pub variables: Vec<Variable>,

    /// The unique identifier for the run's auto-injected API token, if any task requested one
    /// via `inject_api_token`. These tokens automatically expire after a pre-determined time.
    pub token_id: Option<String>,

    /// Whether run level objects have been removed past their expiry.
    pub store_objects_expired: bool,
}

impl Run {
    pub fn new(
        namespace_id: &str,
        pipeline_id: &str,
        version: u64,
        run_id: u64,
        initiator: Initiator,
        variables: Vec<Variable>,
    ) -> Self {
        Run {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            pipeline_config_version: version,
            run_id,
            started: epoch_milli(),
            ended: 0,
            state: State::Pending,
            status: Status::Unknown,
            status_reason: None,
            initiator,
            variables,
            token_id: None,
            store_objects_expired: false,
        }
    }
}

impl TryFrom<storage::runs::Run> for Run {
    type Error = anyhow::Error;

    fn try_from(value: storage::runs::Run) -> Result<Self> {
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

        let initiator = serde_json::from_str(&value.initiator).with_context(|| {
            format!(
                "Could not parse field 'initiator' from storage value; '{:#?}'",
                value.initiator
            )
        })?;

        let variables = serde_json::from_str(&value.variables).with_context(|| {
            format!(
                "Could not parse field 'variables' from storage value; '{:#?}'",
                value.variables
            )
        })?;

        Ok(Run {
            namespace_id: value.namespace_id,
            pipeline_id: value.pipeline_id,
            pipeline_config_version: value.pipeline_config_version.try_into()?,
            run_id: value.run_id.try_into()?,
            started,
            ended,
            state,
            status,
            status_reason,
            initiator,
            variables,
            token_id: value.token_id,
            store_objects_expired: value.store_objects_expired,
        })
    }
}

impl TryFrom<Run> for storage::runs::Run {
    type Error = anyhow::Error;

    fn try_from(value: Run) -> Result<Self> {
        let status_reason = serde_json::to_string(&value.status_reason).with_context(|| {
            format!(
                "Could not parse field 'status_reason' to storage value; '{:#?}'",
                value.status_reason
            )
        })?;

        let initiator = serde_json::to_string(&value.initiator).with_context(|| {
            format!(
                "Could not parse field 'initiator' to storage value; '{:#?}'",
                value.initiator
            )
        })?;

        let variables = serde_json::to_string(&value.variables).with_context(|| {
            format!(
                "Could not parse field 'variables' to storage value; '{:#?}'",
                value.variables
            )
        })?;

        Ok(Self {
            namespace_id: value.namespace_id,
            pipeline_id: value.pipeline_id,
            pipeline_config_version: value.pipeline_config_version.try_into()?,
            run_id: value.run_id.try_into()?,
            started: value.started.to_string(),
            ended: value.ended.to_string(),
            state: value.state.to_string(),
            status: value.status.to_string(),
            status_reason,
            initiator,
            variables,
            token_id: value.token_id,
            store_objects_expired: value.store_objects_expired,
        })
    }
}
