use crate::{
    models::{epoch_milli, run, task_run},
    storage,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumDiscriminants, EnumString};

#[derive(Debug, Clone, Display, Default, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum ExtensionResultStatus {
    #[default]
    Unknown,

    /// The fired event resulted in a new run.
    Processed,

    /// The fired event was dropped without starting a run.
    Skipped,

    /// The fired event could not be processed.
    Failure,
}

/// The outcome of resolving a fired extension event (or the synthetic "manual" event
/// emitted for API initiated runs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionResult {
    pub status: ExtensionResultStatus,
    pub details: String,
}

#[derive(
    Debug, PartialEq, Eq, EnumDiscriminants, Display, Serialize, Deserialize, Clone,
)]
#[strum_discriminants(name(KindDiscriminant))]
#[strum_discriminants(derive(EnumString, Display, Hash))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// The Any kind is a special event kind that denotes the caller wants to listen for any
    /// event. It should not be used as a normal event type (for example do not publish
    /// anything with it). It is internal only and not persisted.
    Any,

    // Run events
    StartedRun {
        namespace_id: String,
        pipeline_id: String,
        run_id: u64,
    },
    CompletedRun {
        namespace_id: String,
        pipeline_id: String,
        run_id: u64,
        status: run::Status,
        initiator_type: run::InitiatorType,
        initiator_name: String,
    },
    ExpiredRunObjects {
        namespace_id: String,
        pipeline_id: String,
        run_id: u64,
    },

    // Task run events
    CreatedTaskRun {
        namespace_id: String,
        pipeline_id: String,
        run_id: u64,
        task_run_id: String,
    },
    StartedTaskRun {
        namespace_id: String,
        pipeline_id: String,
        run_id: u64,
        task_run_id: String,
    },
    CompletedTaskRun {
        namespace_id: String,
        pipeline_id: String,
        run_id: u64,
        task_run_id: String,
        status: task_run::Status,
    },

    // Extension events
    ResolvedExtensionEvent {
        namespace_id: String,
        pipeline_id: String,
        name: String,
        label: String,
        result: ExtensionResult,
        metadata: HashMap<String, String>,
    },
}

/// A single event. Ids are assigned by the durable event log at publish time and increase
/// monotonically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Unique identifier for event.
    pub id: u64,

    /// The type of event it is.
    pub kind: Kind,

    /// Time event was performed in epoch milliseconds.
    pub emitted: u64,
}

impl Event {
    pub fn new(kind: Kind) -> Self {
        Self {
            id: 0,
            kind,
            emitted: epoch_milli(),
        }
    }
}

impl TryFrom<storage::events::Event> for Event {
    type Error = anyhow::Error;

    fn try_from(value: storage::events::Event) -> Result<Self> {
        let emitted = value.emitted.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'emitted' from storage value '{}'",
                value.emitted
            )
        })?;

        let kind: Kind = serde_json::from_str(&value.kind).with_context(|| {
            format!(
                "Could not parse field 'kind' from storage value '{}'",
                value.kind
            )
        })?;

        Ok(Event {
            id: value.id.try_into()?,
            kind,
            emitted,
        })
    }
}

impl TryFrom<Event> for storage::events::Event {
    type Error = anyhow::Error;

    fn try_from(value: Event) -> Result<Self> {
        let kind = serde_json::to_string(&value.kind).with_context(|| {
            format!(
                "Could not parse field 'kind' to storage value '{:#?}'",
                value.kind
            )
        })?;

        Ok(Self {
            id: value.id.try_into()?,
            kind,
            emitted: value.emitted.to_string(),
        })
    }
}
