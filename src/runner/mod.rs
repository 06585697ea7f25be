//! The run core. Converts pipeline configurations plus trigger input into executing runs,
//! drives each run's task containers through the scheduler, and prunes expired run
//! artifacts.
//!
//! There is no global mutable state here; everything the core needs is handed to
//! [`RunnerState`] at construction time and shared via `Arc`.

pub mod objects;
pub mod orchestrator;
pub mod secrets;
pub mod state_machine;
pub mod variables;

use crate::{conf, events, models, object_store, scheduler, secret_store, storage};
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::sync::{atomic, Arc};
use tracing::info;

pub const DEFAULT_NAMESPACE_ID: &str = "default";

/// Caller-facing failures of the run core. Per-task failures never surface here; they become
/// terminal task run statuses instead.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("requested entity not found; {0}")]
    NotFound(String),

    #[error("entity already exists; {0}")]
    AlreadyExists(String),

    #[error("failed precondition; {0}")]
    FailedPrecondition(String),

    #[error("internal error occurred; {0}")]
    Internal(String),
}

/// Convenience function for the composite key for the in_progress_runs mapping in
/// [`RunnerState`].
pub fn in_progress_runs_key(namespace_id: &str, pipeline_id: &str) -> String {
    format!("{}_{}", namespace_id, pipeline_id)
}

/// Composite key for the active run registry in [`RunnerState`].
pub fn active_run_key(namespace_id: &str, pipeline_id: &str, run_id: u64) -> String {
    format!("{}_{}_{}", namespace_id, pipeline_id, run_id)
}

/// Holds all collaborators that need to exist for the entire runtime of the run core.
#[derive(Debug)]
pub struct RunnerState {
    /// The configuration read in at init.
    pub config: conf::RunnerConfig,

    /// Acts as an event bus for the whole application. It is used throughout the core to give
    /// different parts of the application the ability to listen for and respond to events
    /// that might happen in other parts.
    pub event_bus: events::EventBus,

    /// An in-memory count of how many runs each pipeline currently has past the pending
    /// gate. Incremented when a run starts executing, decremented when it completes.
    pub in_progress_runs: DashMap<String, atomic::AtomicU64>,

    /// Every run state machine currently executing, keyed by namespace/pipeline/run.
    /// Cancellation is delivered through this registry as a cooperative signal.
    pub active_runs: DashMap<String, Arc<state_machine::RunStateMachine>>,

    /// Controls if pipelines are allowed to run globally. If this is set to true the service
    /// will not schedule new runs.
    pub ignore_pipeline_run_events: atomic::AtomicBool,

    /// The main backend storage implementation. Most of the core's critical state lives here.
    pub storage: storage::Db,

    /// The mechanism in which the core runs its containers (tasks).
    pub scheduler: Box<dyn scheduler::Scheduler>,

    /// The mechanism in which the core stores pipeline and run level objects.
    pub object_store: Box<dyn object_store::ObjectStore>,

    /// The mechanism in which the core manages pipeline secrets.
    pub secret_store: Box<dyn secret_store::SecretStore>,
}

impl RunnerState {
    pub fn new(
        config: conf::RunnerConfig,
        storage: storage::Db,
        scheduler: Box<dyn scheduler::Scheduler>,
        event_bus: events::EventBus,
        object_store: Box<dyn object_store::ObjectStore>,
        secret_store: Box<dyn secret_store::SecretStore>,
    ) -> Self {
        let ignore_pipeline_run_events =
            atomic::AtomicBool::new(config.general.ignore_pipeline_run_events);

        Self {
            config,
            event_bus,
            in_progress_runs: DashMap::new(),
            active_runs: DashMap::new(),
            ignore_pipeline_run_events,
            storage,
            scheduler,
            object_store,
            secret_store,
        }
    }

    /// The main initialization function for the run core. Builds every subsystem from
    /// configuration and performs the housekeeping that needs to happen before runs can be
    /// accepted.
    pub async fn init(config: conf::RunnerConfig) -> Result<Arc<Self>> {
        let storage =
            storage::Db::new(&config.storage.path).context("Could not initialize storage")?;

        let scheduler = scheduler::new(&config.scheduler)
            .await
            .context("Could not initialize scheduler")?;

        let object_store = object_store::new(&config.object_store)
            .await
            .context("Could not initialize object store")?;

        let secret_store = secret_store::new(&config.secret_store)
            .await
            .context("Could not initialize secret store")?;

        let event_bus = events::EventBus::new(
            storage.clone(),
            config.general.event_log_retention,
            config.general.event_prune_interval,
        );

        std::fs::create_dir_all(&config.general.task_run_logs_dir)
            .context("Could not create task run log directory")?;

        let state = Arc::new(RunnerState::new(
            config,
            storage,
            scheduler,
            event_bus,
            object_store,
            secret_store,
        ));

        create_default_namespace(&state).context("Could not create default namespace")?;

        Ok(state)
    }
}

/// The default namespace is created on every init so that single-tenant installs can ignore
/// namespaces entirely.
fn create_default_namespace(state: &RunnerState) -> Result<()> {
    let namespace = models::namespace::Namespace::new(
        DEFAULT_NAMESPACE_ID,
        "Default",
        "The original namespace created automatically on startup.",
    );

    let conn = state.storage.write_conn()?;

    match storage::namespaces::insert(&conn, &namespace.into()) {
        Ok(_) => {
            info!(namespace_id = DEFAULT_NAMESPACE_ID, "created default namespace");
            Ok(())
        }
        Err(storage::StorageError::Exists) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
