//! Entry points for starting and cancelling runs.
//!
//! Starting a run loads the pipeline's live config, allocates the next run id under a
//! transaction, announces the run, and hands everything to a [`RunStateMachine`]. The
//! parallelism gate lives here too: a start call blocks while the pipeline is at its
//! concurrency limit.

use crate::models::{
    event::{ExtensionResult, ExtensionResultStatus, Kind},
    pipeline, pipeline_config, run, Variable, VariableSource,
};
use crate::runner::{
    active_run_key, in_progress_runs_key, state_machine::RunStateMachine, RunnerError,
    RunnerState,
};
use crate::storage;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{debug, info};

/// How often a gated run re-checks the pipeline's parallelism limit.
const PARALLELISM_GATE_INTERVAL: Duration = Duration::from_secs(1);

/// Start a run of a particular pipeline on behalf of a user or bot. Blocks in the
/// parallelism gate while the pipeline is at its concurrency limit; the run itself executes
/// detached. Returns the newly created run.
pub async fn start_run(
    state: Arc<RunnerState>,
    namespace_id: &str,
    pipeline_id: &str,
    variables: HashMap<String, String>,
    initiator: run::Initiator,
) -> Result<run::Run, RunnerError> {
    if state.ignore_pipeline_run_events.load(Ordering::SeqCst) {
        debug!("Ignoring pipeline run due to setting 'ignore_pipeline_run_events' in state 'true'");
        return Err(RunnerError::FailedPrecondition(
            "Pipeline run request ignored due to setting 'ignore_pipeline_run_events' in state 'true'".into(),
        ));
    }

    let variables = variables
        .into_iter()
        .map(|(key, value)| Variable {
            key,
            value,
            source: VariableSource::RunOptions,
        })
        .collect();

    let run = launch_run(state.clone(), namespace_id, pipeline_id, variables, initiator).await?;

    // Manual starts get a synthetic resolved entry so the event log reads the same for every
    // way a run can begin.
    state
        .event_bus
        .publish(Kind::ResolvedExtensionEvent {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            name: "manual".into(),
            label: "api".into(),
            result: ExtensionResult {
                status: ExtensionResultStatus::Processed,
                details: format!("Started run {}", run.run_id),
            },
            metadata: HashMap::new(),
        })
        .await;

    Ok(run)
}

/// Consume a fired extension event and, if the service and pipeline are accepting runs,
/// start a run for it. The resolution of the event (processed or skipped) is always
/// published so extensions can observe what happened to their trigger.
///
/// Returns the started run, or None when the event was resolved as skipped.
pub async fn process_extension_event(
    state: Arc<RunnerState>,
    namespace_id: &str,
    pipeline_id: &str,
    extension_name: &str,
    extension_label: &str,
    metadata: HashMap<String, String>,
    variables: HashMap<String, String>,
) -> Result<Option<run::Run>, RunnerError> {
    if state.ignore_pipeline_run_events.load(Ordering::SeqCst) {
        debug!(
            namespace_id = namespace_id,
            pipeline_id = pipeline_id,
            extension = extension_name,
            "Dropping extension event due to setting 'ignore_pipeline_run_events' in state 'true'"
        );

        state
            .event_bus
            .publish(Kind::ResolvedExtensionEvent {
                namespace_id: namespace_id.into(),
                pipeline_id: pipeline_id.into(),
                name: extension_name.into(),
                label: extension_label.into(),
                result: ExtensionResult {
                    status: ExtensionResultStatus::Skipped,
                    details: "Pipeline run events are currently ignored".into(),
                },
                metadata,
            })
            .await;

        return Ok(None);
    }

    let variables = variables
        .into_iter()
        .map(|(key, value)| Variable {
            key,
            value,
            source: VariableSource::Extension,
        })
        .collect();

    let initiator = run::Initiator {
        kind: run::InitiatorType::Extension,
        name: extension_name.into(),
        reason: format!("Extension subscription '{extension_label}' fired"),
    };

    let launch_result = launch_run(
        state.clone(),
        namespace_id,
        pipeline_id,
        variables,
        initiator,
    )
    .await;

    match launch_result {
        Ok(run) => {
            state
                .event_bus
                .publish(Kind::ResolvedExtensionEvent {
                    namespace_id: namespace_id.into(),
                    pipeline_id: pipeline_id.into(),
                    name: extension_name.into(),
                    label: extension_label.into(),
                    result: ExtensionResult {
                        status: ExtensionResultStatus::Processed,
                        details: format!("Started run {}", run.run_id),
                    },
                    metadata,
                })
                .await;

            Ok(Some(run))
        }
        Err(RunnerError::FailedPrecondition(details)) => {
            // An inactive pipeline isn't an error from the extension's point of view; the
            // event is simply resolved as skipped.
            state
                .event_bus
                .publish(Kind::ResolvedExtensionEvent {
                    namespace_id: namespace_id.into(),
                    pipeline_id: pipeline_id.into(),
                    name: extension_name.into(),
                    label: extension_label.into(),
                    result: ExtensionResult {
                        status: ExtensionResultStatus::Skipped,
                        details,
                    },
                    metadata,
                })
                .await;

            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// The shared run launch path: load pipeline, allocate the run id, persist, announce, gate,
/// and finally spawn the state machine.
async fn launch_run(
    state: Arc<RunnerState>,
    namespace_id: &str,
    pipeline_id: &str,
    variables: Vec<Variable>,
    initiator: run::Initiator,
) -> Result<run::Run, RunnerError> {
    let (pipeline_metadata, pipeline_config, new_run) = {
        let mut conn = state
            .storage
            .write_conn()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        let storage_metadata = storage::pipeline_metadata::get(&conn, namespace_id, pipeline_id)
            .map_err(|e| match e {
                storage::StorageError::NotFound => RunnerError::NotFound(format!(
                    "pipeline '{pipeline_id}' in namespace '{namespace_id}'"
                )),
                _ => RunnerError::Internal(format!("{e}")),
            })?;

        let pipeline_metadata = pipeline::Metadata::try_from(storage_metadata)
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        if pipeline_metadata.state != pipeline::PipelineState::Active {
            return Err(RunnerError::FailedPrecondition(format!(
                "Pipeline is not in state '{}'; cannot start run",
                pipeline::PipelineState::Active
            )));
        }

        let storage_config =
            storage::pipeline_configs::get_latest_live(&conn, namespace_id, pipeline_id).map_err(
                |e| match e {
                    storage::StorageError::NotFound => RunnerError::FailedPrecondition(format!(
                        "Pipeline '{pipeline_id}' has no live config; deploy a config before starting runs"
                    )),
                    _ => RunnerError::Internal(format!("{e}")),
                },
            )?;

        let storage_tasks =
            storage::tasks::list(&conn, namespace_id, pipeline_id, storage_config.version)
                .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        let pipeline_config =
            pipeline_config::Config::from_storage(storage_config.clone(), storage_tasks)
                .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        // The new run id is always the last run's id plus one. The lookup and insert happen
        // under one transaction so that two simultaneous starts can never mint the same id.
        let tx = conn
            .transaction()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        let latest_run_id =
            match storage::runs::get_latest(&tx, namespace_id, pipeline_id) {
                Ok(latest_run) => latest_run.run_id,
                Err(storage::StorageError::NotFound) => 0,
                Err(e) => return Err(RunnerError::Internal(format!("{e}"))),
            };

        let new_run = run::Run::new(
            namespace_id,
            pipeline_id,
            pipeline_config.version,
            (latest_run_id + 1) as u64,
            initiator,
            variables,
        );

        let storage_run: storage::runs::Run = new_run
            .clone()
            .try_into()
            .map_err(|e: anyhow::Error| RunnerError::Internal(format!("{e}")))?;

        match storage::runs::insert(&tx, &storage_run) {
            Ok(_) => {}
            Err(storage::StorageError::Exists) => {
                return Err(RunnerError::AlreadyExists(format!(
                    "run {} for pipeline '{pipeline_id}'",
                    new_run.run_id
                )));
            }
            Err(e) => return Err(RunnerError::Internal(format!("{e}"))),
        }

        tx.commit()
            .map_err(|e| RunnerError::Internal(format!("{e}")))?;

        (pipeline_metadata, pipeline_config, new_run)
    };

    state
        .event_bus
        .publish(Kind::StartedRun {
            namespace_id: namespace_id.into(),
            pipeline_id: pipeline_id.into(),
            run_id: new_run.run_id,
        })
        .await;

    info!(
        namespace_id = namespace_id,
        pipeline_id = pipeline_id,
        run_id = new_run.run_id,
        initiator = new_run.initiator.name,
        "started new run"
    );

    // Now that the run has been created we can start tracking and executing it.
    let state_machine = Arc::new(RunStateMachine::new(
        state.clone(),
        pipeline::Pipeline {
            metadata: pipeline_metadata,
            config: pipeline_config,
        },
        new_run.clone(),
    ));

    // Make sure the pipeline is ready for a new run. The run sits in Pending until a
    // parallelism slot frees up.
    while state_machine.parallelism_limit_exceeded() {
        tokio::time::sleep(PARALLELISM_GATE_INTERVAL).await;
    }

    state
        .in_progress_runs
        .entry(in_progress_runs_key(namespace_id, pipeline_id))
        .and_modify(|value| {
            value.fetch_add(1, Ordering::SeqCst);
        })
        .or_insert_with(|| AtomicU64::from(1));

    // Finally, launch the thread that will run all the task runs for this run.
    tokio::spawn(state_machine.execute());

    Ok(new_run)
}

/// Deliver a cooperative cancellation signal to an in-flight run. `force` shrinks the
/// scheduler's graceful stop window to 500 milliseconds.
///
/// Cancelling a run that has already completed is a no-op.
pub async fn cancel_run(
    state: Arc<RunnerState>,
    namespace_id: &str,
    pipeline_id: &str,
    run_id: u64,
    reason: &str,
    force: bool,
) -> Result<(), RunnerError> {
    let key = active_run_key(namespace_id, pipeline_id, run_id);

    let state_machine = state.active_runs.get(&key).map(|entry| entry.value().clone());

    if let Some(state_machine) = state_machine {
        state_machine.cancel(reason, force).await;
        return Ok(());
    }

    // The run isn't live; it either finished already or never existed.
    let conn = state
        .storage
        .read_conn()
        .map_err(|e| RunnerError::Internal(format!("{e}")))?;

    let storage_run = storage::runs::get(
        &conn,
        namespace_id,
        pipeline_id,
        run_id.try_into().unwrap_or_default(),
    )
    .map_err(|e| match e {
        storage::StorageError::NotFound => RunnerError::NotFound(format!(
            "run {run_id} for pipeline '{pipeline_id}' in namespace '{namespace_id}'"
        )),
        _ => RunnerError::Internal(format!("{e}")),
    })?;

    let run: run::Run = storage_run
        .try_into()
        .map_err(|e: anyhow::Error| RunnerError::Internal(format!("{e}")))?;

    if run.state == run::State::Complete {
        return Ok(());
    }

    Err(RunnerError::Internal(format!(
        "run {run_id} is not complete but has no active state machine; it may have been \
        orphaned by a restart"
    )))
}
