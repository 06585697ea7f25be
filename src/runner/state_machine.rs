//! The per-run state machine. One instance guides a single run and all of its task runs
//! from Pending to a terminal state.
//!
//! Each task gets its own worker which walks a straight line of phases: register, wait on
//! parents, evaluate dependency predicates, interpolate variables, start the container, and
//! monitor it to completion. Workers only communicate through the shared task run map; a
//! failing worker becomes a terminal task run status, never a crashed run.

use crate::models::{
    epoch_milli,
    event::Kind,
    pipeline, run, task,
    task_run::{self, task_run_container_id, task_run_log_path},
    token,
};
use crate::runner::{
    active_run_key, in_progress_runs_key, secrets,
    variables::{combine_variables, interpolate_vars, run_specific_api_key_id},
    RunnerState,
};
use crate::{scheduler, storage, GOFER_EOF};
use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use futures::future::join_all;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{atomic, Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// How long a run's auto-injected API token stays valid, in seconds.
const RUN_TOKEN_EXPIRY: u64 = 48 * 60 * 60;

/// How often workers re-check parent completion and container state.
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

/// Guides a single run and its tasks through their execution. A core construct within the
/// execution model; contains most of the logic of how a run operates as state-machine like
/// actions.
#[derive(Debug)]
pub struct RunStateMachine {
    pub state: Arc<RunnerState>,
    pub pipeline: pipeline::Pipeline,
    pub run: run::Run,

    /// The single mutable projection of the run shared between sibling task workers, keyed
    /// by task id.
    pub task_runs: DashMap<String, task_run::TaskRun>,

    /// Cooperative cancellation flag, read by every worker at phase boundaries.
    pub stop_run: atomic::AtomicBool,

    cancellation_reason: Mutex<Option<String>>,
}

impl RunStateMachine {
    pub fn new(state: Arc<RunnerState>, pipeline: pipeline::Pipeline, run: run::Run) -> Self {
        Self {
            state,
            pipeline,
            run,
            task_runs: DashMap::new(),
            stop_run: false.into(),
            cancellation_reason: Mutex::new(None),
        }
    }

    fn storage_run_id(&self) -> i64 {
        self.run.run_id.try_into().unwrap_or_default()
    }

    /// Returns true if there are more runs in progress than the parallelism limit of the
    /// pipeline allows. A limit of 0 on either level defers to the other; two zeros means
    /// unlimited.
    pub fn parallelism_limit_exceeded(&self) -> bool {
        let pipeline_run_limit = self.pipeline.config.parallelism;
        let global_run_limit = self.state.config.general.run_parallelism_limit;

        let limit = match (pipeline_run_limit, global_run_limit) {
            (0, 0) => return false,
            (0, global) => global,
            (pipeline, 0) => pipeline,
            (pipeline, global) => pipeline.min(global),
        };

        let runs_key = in_progress_runs_key(
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
        );
        let runs_in_progress: u64 = match self.state.in_progress_runs.get(&runs_key) {
            Some(runs_in_progress) => runs_in_progress.value().load(atomic::Ordering::SeqCst),
            None => 0,
        };

        runs_in_progress >= limit
    }

    /// Request cancellation of the run. Flips the cooperative flag for workers that have not
    /// yet started containers and asks the scheduler to stop every currently running
    /// container. Safe to call multiple times.
    pub async fn cancel(&self, reason: &str, force: bool) {
        {
            let mut cancellation_reason = self.cancellation_reason.lock().unwrap();
            if cancellation_reason.is_none() {
                *cancellation_reason = Some(reason.to_string());
            }
        }

        self.stop_run.store(true, atomic::Ordering::SeqCst);

        let timeout = if force {
            Duration::from_millis(500)
        } else {
            Duration::from_secs(self.state.config.general.task_run_stop_timeout)
        };

        // Collect ids first so no map locks are held across scheduler calls.
        let running_containers: Vec<String> = self
            .task_runs
            .iter()
            .filter(|task_run| task_run.value().state == task_run::State::Running)
            .map(|task_run| {
                task_run_container_id(
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    self.run.run_id,
                    &task_run.value().task_run_id,
                )
            })
            .collect();

        for container_id in running_containers {
            if let Err(e) = self
                .state
                .scheduler
                .stop_container(scheduler::StopContainerRequest {
                    id: container_id.clone(),
                    timeout,
                })
                .await
            {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    container_id = container_id,
                    error = %e, "Could not stop container while attempting to cancel run");
            }
        }
    }

    /// Executes the run: spawns the retention janitors, mints the run token if requested,
    /// launches one worker per task, and waits for every task run to reach a terminal state
    /// before finalizing the run. Blocks until the run is Complete.
    pub async fn execute(self: Arc<Self>) {
        self.state.active_runs.insert(
            active_run_key(
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                self.run.run_id,
            ),
            self.clone(),
        );

        // Launch per-run clean up jobs.
        tokio::spawn(self.clone().handle_run_object_expiry());
        tokio::spawn(self.clone().handle_run_log_expiry());

        if self
            .pipeline
            .config
            .tasks
            .values()
            .any(|task| task.inject_api_token)
        {
            if let Err(e) = self.mint_run_token().await {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, "Could not mint api token for run");
            }
        }

        let update_result = {
            match self.state.storage.write_conn() {
                Ok(conn) => storage::runs::update(
                    &conn,
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    self.storage_run_id(),
                    storage::runs::UpdatableFields {
                        state: Some(run::State::Running.to_string()),
                        ..Default::default()
                    },
                )
                .map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = update_result {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                error = %e, "Could not update run while attempting to execute task tree");
            return;
        }

        let mut task_handles = vec![];

        for task in self.pipeline.config.tasks.values() {
            let handle = tokio::spawn(self.clone().launch_task_run(task.clone()));
            task_handles.push(handle);
        }

        // Wait for all the task runs to finish.
        join_all(task_handles).await;

        // Finally process the run now that all the tasks have finished.
        self.process_run_finish().await
    }

    /// Mint the run specific API token: persist its hash, record the token on the run, and
    /// stash the plaintext as a pipeline secret so workers can resolve it through the
    /// regular interpolation path.
    async fn mint_run_token(&self) -> Result<()> {
        let (plaintext, hash) = token::create_new_api_token();

        let new_token = token::Token::new(
            &hash,
            token::TokenType::Run,
            HashSet::from([self.pipeline.metadata.namespace_id.clone()]),
            HashMap::from([
                (
                    "namespace_id".to_string(),
                    self.pipeline.metadata.namespace_id.clone(),
                ),
                (
                    "pipeline_id".to_string(),
                    self.pipeline.metadata.pipeline_id.clone(),
                ),
                ("run_id".to_string(), self.run.run_id.to_string()),
            ]),
            RUN_TOKEN_EXPIRY,
        );

        {
            let conn = self
                .state
                .storage
                .write_conn()
                .context("Could not open connection to database")?;

            storage::tokens::insert(&conn, &new_token.clone().try_into()?)
                .context("Could not insert run token into storage")?;

            storage::runs::update(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                self.storage_run_id(),
                storage::runs::UpdatableFields {
                    token_id: Some(new_token.id.clone()),
                    ..Default::default()
                },
            )
            .context("Could not record token id on run")?;
        }

        secrets::put_pipeline_secret(
            &self.state,
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
            &run_specific_api_key_id(self.run.run_id),
            &plaintext,
            true,
        )
        .await
        .map_err(|e| anyhow::anyhow!("Could not store run token; {e}"))?;

        Ok(())
    }

    /// Check the dependency tree of a task to see if all its parents have finished.
    fn parent_task_runs_complete(
        &self,
        dependency_map: &HashMap<String, task::RequiredParentStatus>,
    ) -> bool {
        for parent_id in dependency_map.keys() {
            let parent = match self.task_runs.get(parent_id) {
                Some(parent) => parent,
                None => return false,
            };

            if parent.state != task_run::State::Complete {
                return false;
            }
        }

        true
    }

    /// Check a dependency tree to see if all parent tasks finished in the required states.
    fn task_dependencies_satisfied(
        &self,
        dependency_map: &HashMap<String, task::RequiredParentStatus>,
    ) -> Result<()> {
        for (parent, required_status) in dependency_map {
            let parent_task_run = match self.task_runs.get(parent) {
                Some(p) => p,
                None => bail!(
                    "Could not find parent dependency in task run list while attempting to \
                    verify task dependency satisfaction"
                ),
            };

            match required_status {
                task::RequiredParentStatus::Unknown => {
                    bail!("Found a parent dependency in state 'Unknown'; Invalid state")
                }
                task::RequiredParentStatus::Any => {
                    if !parent_task_run.status.is_resolved() {
                        bail!(
                            "Parent '{}' has incorrect status '{}' for required 'any' dependency",
                            parent,
                            parent_task_run.status
                        );
                    }
                }
                task::RequiredParentStatus::Success => {
                    if parent_task_run.status != task_run::Status::Successful {
                        bail!(
                            "Parent '{}' has incorrect status '{}' for required 'successful' dependency",
                            parent,
                            parent_task_run.status
                        );
                    }
                }
                task::RequiredParentStatus::Failure => {
                    if parent_task_run.status != task_run::Status::Failed {
                        bail!(
                            "Parent '{}' has incorrect status '{}' for required 'failed' dependency",
                            parent,
                            parent_task_run.status
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Move a task run to a new (non-terminal) state, in the shared map and storage both.
    async fn set_task_run_state(
        &self,
        task_run_id: &str,
        state: task_run::State,
    ) -> Result<()> {
        {
            let conn = self
                .state
                .storage
                .write_conn()
                .context("Could not open connection to database")?;

            storage::task_runs::update(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                self.storage_run_id(),
                task_run_id,
                storage::task_runs::UpdatableFields {
                    state: Some(state.to_string()),
                    ..Default::default()
                },
            )
            .context("Could not update task run state in storage")?;
        }

        self.task_runs.alter(task_run_id, |_, mut value| {
            value.state = state.clone();
            value
        });

        Ok(())
    }

    /// Finalize a task run. Sets the terminal state/status in the shared map and storage and
    /// announces the completion on the event bus.
    async fn set_task_run_complete(
        &self,
        task_run_id: &str,
        exit_code: Option<u8>,
        status: task_run::Status,
        reason: Option<task_run::StatusReason>,
    ) -> Result<()> {
        if !self.task_runs.contains_key(task_run_id) {
            bail!("Could not find task run");
        }

        self.task_runs.alter(task_run_id, |_, mut value| {
            value.state = task_run::State::Complete;
            value.status = status.clone();
            value.exit_code = exit_code;
            value.ended = epoch_milli();
            value
        });

        let status_reason = match reason {
            Some(reason) => Some(
                serde_json::to_string(&reason)
                    .context("Could not parse field 'reason' into storage value")?,
            ),
            None => None,
        };

        {
            let conn = self
                .state
                .storage
                .write_conn()
                .context("Could not open connection to database")?;

            storage::task_runs::update(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                self.storage_run_id(),
                task_run_id,
                storage::task_runs::UpdatableFields {
                    ended: Some(epoch_milli().to_string()),
                    exit_code: exit_code.map(i64::from),
                    state: Some(task_run::State::Complete.to_string()),
                    status: Some(status.to_string()),
                    status_reason,
                    ..Default::default()
                },
            )
            .context("Could not update task run status in storage")?;
        }

        self.state
            .event_bus
            .publish(Kind::CompletedTaskRun {
                namespace_id: self.pipeline.metadata.namespace_id.clone(),
                pipeline_id: self.pipeline.metadata.pipeline_id.clone(),
                run_id: self.run.run_id,
                task_run_id: task_run_id.to_string(),
                status: status.clone(),
            })
            .await;

        Ok(())
    }

    /// Finalize the run itself. Also releases the pipeline's parallelism slot and removes the
    /// run from the active registry.
    async fn set_run_complete(
        &self,
        status: run::Status,
        reason: Option<run::StatusReason>,
    ) -> Result<()> {
        if let Some(counter) = self.state.in_progress_runs.get(&in_progress_runs_key(
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
        )) {
            let _ = counter.value().fetch_update(
                atomic::Ordering::SeqCst,
                atomic::Ordering::SeqCst,
                |value| value.checked_sub(1),
            );
        }

        self.state.active_runs.remove(&active_run_key(
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
            self.run.run_id,
        ));

        let status_reason = match reason {
            Some(reason) => Some(
                serde_json::to_string(&reason)
                    .context("Could not parse field 'reason' into storage value")?,
            ),
            None => None,
        };

        {
            let conn = self
                .state
                .storage
                .write_conn()
                .context("Could not open connection to database")?;

            storage::runs::update(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                self.storage_run_id(),
                storage::runs::UpdatableFields {
                    ended: Some(epoch_milli().to_string()),
                    state: Some(run::State::Complete.to_string()),
                    status: Some(status.to_string()),
                    status_reason,
                    ..Default::default()
                },
            )
            .context("Could not update run status in storage")?;
        }

        self.state
            .event_bus
            .publish(Kind::CompletedRun {
                namespace_id: self.pipeline.metadata.namespace_id.clone(),
                pipeline_id: self.pipeline.metadata.pipeline_id.clone(),
                run_id: self.run.run_id,
                status,
                initiator_type: self.run.initiator.kind.clone(),
                initiator_name: self.run.initiator.name.clone(),
            })
            .await;

        Ok(())
    }

    /// Determines the final run status based on all finished task runs. A run is only
    /// successful if every task run finished Successful or Skipped; any failure outranks any
    /// cancellation.
    async fn process_run_finish(&self) {
        let mut has_failed = false;
        let mut has_cancelled = false;

        for task_run in self.task_runs.iter() {
            match task_run.value().status {
                task_run::Status::Unknown | task_run::Status::Failed => has_failed = true,
                task_run::Status::Cancelled => has_cancelled = true,
                task_run::Status::Successful | task_run::Status::Skipped => {}
            }
        }

        let result = if has_failed {
            self.set_run_complete(
                run::Status::Failed,
                Some(run::StatusReason {
                    reason: run::StatusReasonType::AbnormalExit,
                    description: "One or more task runs failed during execution".into(),
                }),
            )
            .await
        } else if has_cancelled {
            let description = match self.cancellation_reason.lock().unwrap().clone() {
                Some(reason) => {
                    format!("One or more task runs were cancelled during execution; {reason}")
                }
                None => "One or more task runs were cancelled during execution".into(),
            };

            self.set_run_complete(
                run::Status::Cancelled,
                Some(run::StatusReason {
                    reason: run::StatusReasonType::AbnormalExit,
                    description,
                }),
            )
            .await
        } else {
            self.set_run_complete(run::Status::Successful, None).await
        };

        if let Err(e) = result {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                error = %e, "Could not set run finished while attempting to wait for finish");
        }
    }

    /// Registers and launches a brand new task run as part of a larger run for a specific
    /// task. Blocks until the task run has completed.
    async fn launch_task_run(self: Arc<Self>, task: task::Task) {
        // Start by creating a new task run and saving it to the state machine and disk.
        let mut new_task_run = task_run::TaskRun::new(
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
            self.run.run_id,
            task.clone(),
        );

        let env_vars = combine_variables(&self.run, &task);
        new_task_run.variables = env_vars.clone();

        self.task_runs
            .insert(new_task_run.task_run_id.clone(), new_task_run.clone());

        let storage_task_run: storage::task_runs::TaskRun = match new_task_run.clone().try_into()
        {
            Ok(task_run) => task_run,
            Err(e) => {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    task_id = task.id,
                    error = %e, "Could not serialize task run to storage object");
                return;
            }
        };

        let insert_result = {
            match self.state.storage.write_conn() {
                Ok(conn) => storage::task_runs::insert(&conn, &storage_task_run)
                    .map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = insert_result {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                task_id = task.id,
                error = %e, "Could not insert new task run into storage");
            return;
        }

        self.state
            .event_bus
            .publish(Kind::CreatedTaskRun {
                namespace_id: self.pipeline.metadata.namespace_id.clone(),
                pipeline_id: self.pipeline.metadata.pipeline_id.clone(),
                run_id: self.run.run_id,
                task_run_id: task.id.clone(),
            })
            .await;

        // Now we examine the validity of the task run to be started and wait for its
        // dependents to finish running.
        if let Err(e) = self
            .set_task_run_state(&task.id, task_run::State::Waiting)
            .await
        {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                task_id = task.id,
                error = %e, "Could not update task run state to waiting");
            return;
        }

        // First we need to make sure all the parents of the current task are in a finished
        // state. Cancellation can arrive while we wait.
        while !self.parent_task_runs_complete(&task.depends_on) {
            if self.stop_run.load(atomic::Ordering::SeqCst) {
                if let Err(e) = self
                    .set_task_run_complete(
                        &task.id,
                        None,
                        task_run::Status::Cancelled,
                        Some(task_run::StatusReason {
                            reason: task_run::StatusReasonType::Cancelled,
                            description: "The run was cancelled while this task waited on its dependencies".into(),
                        }),
                    )
                    .await
                {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        task_id = task.id,
                        error = %e, "Could not mark task run as cancelled during dependency wait");
                }
                return;
            }

            tokio::time::sleep(MONITOR_INTERVAL).await;
        }

        if let Err(e) = self
            .set_task_run_state(&task.id, task_run::State::Processing)
            .await
        {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                task_id = task.id,
                error = %e, "Could not update task run state to processing");
            return;
        }

        // Then check to make sure that the parents all finished in the required states. If
        // not we mark this task as skipped since its requirements for running weren't met.
        if let Err(e) = self.task_dependencies_satisfied(&task.depends_on) {
            if let Err(e) = self
                .set_task_run_complete(
                    &task.id,
                    None,
                    task_run::Status::Skipped,
                    Some(task_run::StatusReason {
                        reason: task_run::StatusReasonType::FailedPrecondition,
                        description: format!(
                            "Task could not be run due to unmet dependencies; {}",
                            e
                        ),
                    }),
                )
                .await
            {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    task_id = task.id,
                    error = %e, "Could not mark task run as skipped during the processing of task dependencies");
            }
            return;
        }

        // A cancel that raced the dependency wait still has to win before any container is
        // started.
        if self.stop_run.load(atomic::Ordering::SeqCst) {
            if let Err(e) = self
                .set_task_run_complete(
                    &task.id,
                    None,
                    task_run::Status::Cancelled,
                    Some(task_run::StatusReason {
                        reason: task_run::StatusReasonType::Cancelled,
                        description: "The run was cancelled before this task could be scheduled"
                            .into(),
                    }),
                )
                .await
            {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    task_id = task.id,
                    error = %e, "Could not mark task run as cancelled before scheduling");
            }
            return;
        }

        // After this point we're sure the task is in a state to be run. So we attempt to
        // resolve any object/secret store variables. It's important this happens only after
        // a task's parents have already run, so that one task can pass values to downstream
        // tasks. The resolved set is handed to the scheduler only; the stored task run keeps
        // the unresolved references so secrets never land in the database.
        let env_vars = match interpolate_vars(
            &self.state,
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
            Some(self.run.run_id),
            &env_vars,
        )
        .await
        {
            Ok(env_vars) => env_vars,
            Err(e) => {
                if let Err(e) = self
                    .set_task_run_complete(
                        &task.id,
                        None,
                        task_run::Status::Failed,
                        Some(task_run::StatusReason {
                            reason: task_run::StatusReasonType::FailedPrecondition,
                            description: format!(
                                "Task could not be run due to inability to retrieve interpolated variables; {}",
                                e
                            ),
                        }),
                    )
                    .await
                {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        task_id = task.id,
                        error = %e, "Could not mark task run as failed during the processing of task env vars");
                }
                return;
            }
        };

        let container_id = task_run_container_id(
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
            self.run.run_id,
            &task.id,
        );

        if let Err(e) = self
            .state
            .scheduler
            .start_container(scheduler::StartContainerRequest {
                id: container_id.clone(),
                image: task.image.clone(),
                variables: env_vars
                    .into_iter()
                    .map(|var| (var.key, var.value))
                    .collect(),
                registry_auth: task.registry_auth.clone().map(|auth| auth.into()),
                always_pull: task.always_pull,
                networking: None,
                entrypoint: task.entrypoint.clone(),
                command: task.command.clone(),
            })
            .await
        {
            if let Err(e) = self
                .set_task_run_complete(
                    &task.id,
                    None,
                    task_run::Status::Failed,
                    Some(task_run::StatusReason {
                        reason: task_run::StatusReasonType::SchedulerError,
                        description: format!(
                            "Task could not be run due to inability to be scheduled; {}",
                            e
                        ),
                    }),
                )
                .await
            {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    task_id = task.id,
                    error = %e, "Could not mark task run as failed during scheduling of task");
            }
            return;
        }

        let update_result = {
            match self.state.storage.write_conn() {
                Ok(conn) => storage::task_runs::update(
                    &conn,
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    self.storage_run_id(),
                    &task.id,
                    storage::task_runs::UpdatableFields {
                        state: Some(task_run::State::Running.to_string()),
                        started: Some(epoch_milli().to_string()),
                        ..Default::default()
                    },
                )
                .map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = update_result {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                task_id = task.id,
                error = %e, "Could not update task run while attempting to launch container");
            return;
        }

        self.task_runs.alter(&task.id, |_, mut value| {
            value.state = task_run::State::Running;
            value.started = epoch_milli();
            value
        });

        self.state
            .event_bus
            .publish(Kind::StartedTaskRun {
                namespace_id: self.pipeline.metadata.namespace_id.clone(),
                pipeline_id: self.pipeline.metadata.pipeline_id.clone(),
                run_id: self.run.run_id,
                task_run_id: task.id.clone(),
            })
            .await;

        // Block until the task run is finished and log results.
        if let Err(e) = self
            .clone()
            .monitor_task_run(&container_id, &task.id)
            .await
        {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                task_id = task.id,
                error = %e, "Encountered error while waiting for task run to finish");
        }
    }

    /// Tracks state and log progress of a task run, updating it with the resulting state
    /// change(s). Blocks until the task run has reached a terminal state.
    async fn monitor_task_run(
        self: Arc<Self>,
        container_id: &str,
        task_run_id: &str,
    ) -> Result<()> {
        let container_id_clone = container_id.to_owned();
        let task_run_id_clone = task_run_id.to_owned();
        let self_clone = self.clone();

        tokio::spawn(async move {
            self_clone
                .handle_log_updates(container_id_clone, task_run_id_clone)
                .await
        });

        self.wait_task_run_finish(container_id, task_run_id)
            .await
            .context("Encountered error while waiting for task run result")?;

        Ok(())
    }

    /// Polls the scheduler for a container's state until it reaches a terminal state, then
    /// finalizes the task run accordingly.
    async fn wait_task_run_finish(&self, container_id: &str, task_run_id: &str) -> Result<()> {
        loop {
            let response = match self
                .state
                .scheduler
                .get_state(scheduler::GetStateRequest {
                    id: container_id.into(),
                })
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    if let Err(e) = self
                        .set_task_run_complete(
                            task_run_id,
                            None,
                            task_run::Status::Unknown,
                            Some(task_run::StatusReason {
                                reason: task_run::StatusReasonType::SchedulerError,
                                description: "Could not query the scheduler for the task run state"
                                    .into(),
                            }),
                        )
                        .await
                    {
                        error!(error = %e, "Could not update task run while attempting to set run as complete");
                    }
                    bail!("Could not query scheduler for container state; {:#?}", err);
                }
            };

            match response.state {
                scheduler::ContainerState::Unknown => {
                    self.set_task_run_complete(
                        task_run_id,
                        None,
                        task_run::Status::Unknown,
                        Some(task_run::StatusReason {
                            reason: task_run::StatusReasonType::SchedulerError,
                            description: "An unknown error has occurred on the scheduler level; \
                                This should (ideally) never happen."
                                .into(),
                        }),
                    )
                    .await
                    .context("Could not update task run while attempting to set run as complete")?;

                    return Ok(());
                }
                scheduler::ContainerState::Running
                | scheduler::ContainerState::Paused
                | scheduler::ContainerState::Restarting => {
                    tokio::time::sleep(MONITOR_INTERVAL).await;
                    continue;
                }
                scheduler::ContainerState::Cancelled => {
                    self.set_task_run_complete(
                        task_run_id,
                        None,
                        task_run::Status::Cancelled,
                        Some(task_run::StatusReason {
                            reason: task_run::StatusReasonType::Cancelled,
                            description: "The task run was cancelled".into(),
                        }),
                    )
                    .await
                    .context("Could not update task run while attempting to set run as complete")?;

                    return Ok(());
                }
                scheduler::ContainerState::Exited => {
                    // We determine if something worked based on the exit code of the container.
                    let exit_code = response.exit_code.unwrap_or(1);

                    if exit_code == 0 {
                        self.set_task_run_complete(
                            task_run_id,
                            Some(exit_code),
                            task_run::Status::Successful,
                            None,
                        )
                        .await
                        .context(
                            "Could not update task run while attempting to set run as complete",
                        )?;
                    } else {
                        self.set_task_run_complete(
                            task_run_id,
                            Some(exit_code),
                            task_run::Status::Failed,
                            Some(task_run::StatusReason {
                                reason: task_run::StatusReasonType::AbnormalExit,
                                description: "Task run exited with an abnormal exit code".into(),
                            }),
                        )
                        .await
                        .context(
                            "Could not update task run while attempting to set run as complete",
                        )?;
                    }

                    return Ok(());
                }
            }
        }
    }

    /// Streams a container's logs line-by-line into the task run's log file. When the
    /// scheduler closes the stream a sentinel line is appended so readers tailing the file
    /// know no further logs will be written. Errors are logged, never propagated; the file
    /// is best-effort.
    async fn handle_log_updates(self: Arc<Self>, container_id: String, task_run_id: String) {
        let mut log_stream = self.state.scheduler.get_logs(scheduler::GetLogsRequest {
            id: container_id.clone(),
        });

        let path = task_run_log_path(
            &self.state.config.general.task_run_logs_dir,
            &self.pipeline.metadata.namespace_id,
            &self.pipeline.metadata.pipeline_id,
            self.run.run_id,
            &task_run_id,
        );

        let mut file = match tokio::fs::File::create(path.clone()).await {
            Ok(file) => file,
            Err(e) => {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    task_id = &task_run_id,
                    error = %e,
                    path = path.to_string_lossy().to_string(),
                    "Failed to open file for writing while attempting to write logs for container");
                return;
            }
        };

        while let Some(item) = log_stream.next().await {
            let log_object = match item {
                Ok(log_object) => log_object,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        task_id = &task_run_id,
                        error = %e, "Failed to parse log stream; scheduler error encountered");
                    continue;
                }
            };

            let line = match log_object {
                scheduler::Log::Unknown => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        task_id = &task_run_id,
                        "Received malformed log from scheduler (Unknown log type); skipping");
                    continue;
                }
                scheduler::Log::Stdout(log) => log,
                scheduler::Log::Stderr(log) => log,
            };

            if let Err(e) = file.write_all(&line).await {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    task_id = &task_run_id,
                    error = %e, path = path.to_string_lossy().to_string(),
                    "Failed to write log line for container");
            }
        }

        // When the reader is finished we place a special marker to signify that this file is
        // finished being written to. This allows other readers of the file to know the
        // difference between a file that is still being written to and a file that will not
        // be written to any further.
        if let Err(e) = file.write_all(GOFER_EOF.as_bytes()).await {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                task_id = &task_run_id,
                error = %e, path = path.to_string_lossy().to_string(),
                "Failed to write end-of-file marker to container log");
        }
    }

    /// Removes run level objects from the object store once a run is past its expiry
    /// threshold. One-shot; spawned at the start of every run.
    async fn handle_run_object_expiry(self: Arc<Self>) {
        let limit = self.state.config.object_store.run_object_expiry;

        let runs = {
            let conn = match self.state.storage.read_conn() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not establish connection to database while processing run object expiry");
                    return;
                }
            };

            match storage::runs::list(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                0,
                limit as i64 + 1,
                true,
            ) {
                Ok(runs) => runs,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not retrieve runs while processing run object expiry");
                    return;
                }
            }
        };

        // If there aren't enough runs to reach the expiry limit there is nothing to remove.
        if (runs.len() as u64) < limit + 1 {
            return;
        }

        let mut expired_run: run::Run = match runs.last().unwrap().to_owned().try_into() {
            Ok(run) => run,
            Err(e) => {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, "Could not parse run while processing run object expiry");
                return;
            }
        };

        // If the expired run is still in progress we wait for it to be done.
        while expired_run.state != run::State::Complete {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let updated_run = {
                let conn = match self.state.storage.read_conn() {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Could not establish connection to database while processing run object expiry");
                        return;
                    }
                };

                match storage::runs::get(
                    &conn,
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    expired_run.run_id.try_into().unwrap_or_default(),
                ) {
                    Ok(run) => run,
                    Err(e) => {
                        error!(namespace_id = &self.pipeline.metadata.namespace_id,
                            pipeline_id = &self.pipeline.metadata.pipeline_id,
                            run_id = self.run.run_id,
                            error = %e, "Could not get updated run state while processing run object expiry");
                        return;
                    }
                }
            };

            expired_run = match updated_run.try_into() {
                Ok(run) => run,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not parse updated run while processing run object expiry");
                    return;
                }
            };
        }

        if expired_run.store_objects_expired {
            return;
        }

        let expired_run_id: i64 = expired_run.run_id.try_into().unwrap_or_default();

        let objects = {
            let conn = match self.state.storage.read_conn() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Could not establish connection to database while processing run object expiry");
                    return;
                }
            };

            match storage::object_store_run_keys::list(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                expired_run_id,
            ) {
                Ok(objects) => objects,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not list object keys while processing run object expiry");
                    return;
                }
            }
        };

        for object in objects {
            // Delete it from the object store.
            if let Err(e) = self
                .state
                .object_store
                .delete(&crate::models::object::run_object_store_key(
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    expired_run.run_id,
                    &object.key,
                ))
                .await
            {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, "Could not delete object from store while processing run object expiry");
                return;
            }

            // Delete it from the run's records.
            let delete_result = {
                match self.state.storage.write_conn() {
                    Ok(conn) => storage::object_store_run_keys::delete(
                        &conn,
                        &self.pipeline.metadata.namespace_id,
                        &self.pipeline.metadata.pipeline_id,
                        expired_run_id,
                        &object.key,
                    )
                    .map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                }
            };

            if let Err(e) = delete_result {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, "Could not remove object store reference while processing run object expiry");
                return;
            }
        }

        let update_result = {
            match self.state.storage.write_conn() {
                Ok(conn) => storage::runs::update(
                    &conn,
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    expired_run_id,
                    storage::runs::UpdatableFields {
                        store_objects_expired: Some(true),
                        ..Default::default()
                    },
                )
                .map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            }
        };

        if let Err(e) = update_result {
            error!(namespace_id = &self.pipeline.metadata.namespace_id,
                pipeline_id = &self.pipeline.metadata.pipeline_id,
                run_id = self.run.run_id,
                error = %e, "Could not update run while processing run object expiry");
            return;
        }

        self.state
            .event_bus
            .publish(Kind::ExpiredRunObjects {
                namespace_id: self.pipeline.metadata.namespace_id.clone(),
                pipeline_id: self.pipeline.metadata.pipeline_id.clone(),
                run_id: expired_run.run_id,
            })
            .await;
    }

    /// Removes task run log files once their run is past the log retention threshold.
    /// One-shot; spawned at the start of every run.
    async fn handle_run_log_expiry(self: Arc<Self>) {
        let limit = self.state.config.general.task_run_log_expiry;

        let runs = {
            let conn = match self.state.storage.read_conn() {
                Ok(conn) => conn,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not establish connection to database while processing run log expiry");
                    return;
                }
            };

            match storage::runs::list(
                &conn,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                0,
                limit as i64 + 1,
                true,
            ) {
                Ok(runs) => runs,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not retrieve runs while processing run log expiry");
                    return;
                }
            }
        };

        // If there aren't enough runs to reach the expiry limit there is nothing to remove.
        if (runs.len() as u64) < limit + 1 {
            return;
        }

        let mut expired_run: run::Run = match runs.last().unwrap().to_owned().try_into() {
            Ok(run) => run,
            Err(e) => {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, "Could not parse run while processing run log expiry");
                return;
            }
        };

        let expired_run_id: i64 = expired_run.run_id.try_into().unwrap_or_default();

        // If the run is still in progress we wait for it to be done.
        while expired_run.state != run::State::Complete {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let updated_run = {
                let conn = match self.state.storage.read_conn() {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Could not establish connection to database while processing run log expiry");
                        return;
                    }
                };

                match storage::runs::get(
                    &conn,
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    expired_run_id,
                ) {
                    Ok(run) => run,
                    Err(e) => {
                        error!(namespace_id = &self.pipeline.metadata.namespace_id,
                            pipeline_id = &self.pipeline.metadata.pipeline_id,
                            run_id = self.run.run_id,
                            error = %e, "Could not get updated run state while processing run log expiry");
                        return;
                    }
                }
            };

            expired_run = match updated_run.try_into() {
                Ok(run) => run,
                Err(e) => {
                    error!(namespace_id = &self.pipeline.metadata.namespace_id,
                        pipeline_id = &self.pipeline.metadata.pipeline_id,
                        run_id = self.run.run_id,
                        error = %e, "Could not parse updated run while processing run log expiry");
                    return;
                }
            };
        }

        // If the task runs are in progress we wait for them to be finished also.
        let mut chopping_block: HashMap<String, bool> = HashMap::new();

        loop {
            let task_runs = {
                let conn = match self.state.storage.read_conn() {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Could not establish connection to database while processing run log expiry");
                        return;
                    }
                };

                match storage::task_runs::list(
                    &conn,
                    &self.pipeline.metadata.namespace_id,
                    &self.pipeline.metadata.pipeline_id,
                    expired_run_id,
                ) {
                    Ok(task_runs) => task_runs,
                    Err(e) => {
                        error!(namespace_id = &self.pipeline.metadata.namespace_id,
                            pipeline_id = &self.pipeline.metadata.pipeline_id,
                            run_id = self.run.run_id,
                            error = %e, "Could not get task runs while processing run log expiry");
                        return;
                    }
                }
            };

            for task_run in task_runs.iter() {
                let state = match task_run.state.parse::<task_run::State>() {
                    Ok(state) => state,
                    Err(e) => {
                        error!(namespace_id = &self.pipeline.metadata.namespace_id,
                            pipeline_id = &self.pipeline.metadata.pipeline_id,
                            run_id = self.run.run_id,
                            error = %e, storage_state = task_run.state,
                            "Could not parse state while processing run log expiry");
                        continue;
                    }
                };

                // Once a task run is complete it goes on the chopping block.
                if state == task_run::State::Complete {
                    chopping_block.insert(task_run.task_run_id.clone(), task_run.logs_removed);
                }
            }

            if chopping_block.len() != task_runs.len() {
                tokio::time::sleep(MONITOR_INTERVAL).await;
                continue;
            }

            break;
        }

        let mut removed_files = vec![];

        for (task_run_id, logs_removed) in chopping_block {
            if logs_removed {
                continue;
            }

            let log_path = task_run_log_path(
                &self.state.config.general.task_run_logs_dir,
                &self.pipeline.metadata.namespace_id,
                &self.pipeline.metadata.pipeline_id,
                expired_run.run_id,
                &task_run_id,
            );

            if let Err(e) = tokio::fs::remove_file(log_path.clone()).await {
                debug!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, path = ?log_path, "Could not remove task run log file");
            }

            removed_files.push(log_path.to_string_lossy().to_string());

            let update_result = {
                match self.state.storage.write_conn() {
                    Ok(conn) => storage::task_runs::update(
                        &conn,
                        &self.pipeline.metadata.namespace_id,
                        &self.pipeline.metadata.pipeline_id,
                        expired_run_id,
                        &task_run_id,
                        storage::task_runs::UpdatableFields {
                            logs_expired: Some(true),
                            logs_removed: Some(true),
                            ..Default::default()
                        },
                    )
                    .map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                }
            };

            if let Err(e) = update_result {
                error!(namespace_id = &self.pipeline.metadata.namespace_id,
                    pipeline_id = &self.pipeline.metadata.pipeline_id,
                    run_id = self.run.run_id,
                    error = %e, task_id = task_run_id, "Could not update task run while processing run log expiry");
                continue;
            }
        }

        debug!(namespace_id = &self.pipeline.metadata.namespace_id,
            pipeline_id = &self.pipeline.metadata.pipeline_id,
            run_id = self.run.run_id,
            removed_files = ?removed_files, "Removed task run log files");
    }
}
