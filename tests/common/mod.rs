//! Shared harness for end-to-end run lifecycle tests. Builds a full runner state backed by
//! temp directories and the in-memory scheduler engine, and seeds pipelines directly through
//! the storage layer.

use gofer::conf;
use gofer::events::EventBus;
use gofer::models::{event, pipeline, pipeline_config, run, task};
use gofer::runner::RunnerState;
use gofer::scheduler::{in_memory, Scheduler};
use gofer::{object_store, secret_store, storage};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const NAMESPACE: &str = "default";

pub struct TestHarness {
    pub state: Arc<RunnerState>,
    pub engine: in_memory::Engine,
    _tmp: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config_overrides(|_| {}).await
    }

    /// Build a harness, letting the caller adjust the config before the state is
    /// constructed.
    pub async fn with_config_overrides(adjust: impl FnOnce(&mut conf::RunnerConfig)) -> Self {
        let tmp = tempfile::tempdir().unwrap();

        let mut config = conf::RunnerConfig {
            general: conf::General {
                log_level: "debug".into(),
                pretty_logging: true,
                event_log_retention: 3600,
                event_prune_interval: 3600,
                run_parallelism_limit: 0,
                task_run_log_expiry: 50,
                task_run_logs_dir: tmp.path().join("logs").to_string_lossy().to_string(),
                task_run_stop_timeout: 30,
                ignore_pipeline_run_events: false,
            },
            storage: conf::Storage {
                path: tmp.path().join("gofer.db").to_string_lossy().to_string(),
            },
            scheduler: conf::Scheduler {
                engine: gofer::scheduler::Engine::InMemory,
            },
            object_store: conf::ObjectStore {
                engine: object_store::Engine::Filesystem,
                pipeline_object_limit: 10,
                run_object_expiry: 50,
                filesystem: Some(object_store::filesystem::Config {
                    path: tmp.path().join("objects").to_string_lossy().to_string(),
                }),
            },
            secret_store: conf::SecretStore {
                engine: secret_store::Engine::Sqlite,
                sqlite: Some(secret_store::sqlite::Config {
                    path: tmp.path().join("secrets.db").to_string_lossy().to_string(),
                    encryption_key: "changemechangemechangemechangeme".into(),
                }),
            },
        };

        adjust(&mut config);

        std::fs::create_dir_all(&config.general.task_run_logs_dir).unwrap();

        let db = storage::Db::new(&config.storage.path).unwrap();

        let engine = in_memory::Engine::new();
        let scheduler: Box<dyn Scheduler> = Box::new(engine.clone());

        let object_store = object_store::new(&config.object_store).await.unwrap();
        let secret_store = secret_store::new(&config.secret_store).await.unwrap();

        let event_bus = EventBus::new(
            db.clone(),
            config.general.event_log_retention,
            config.general.event_prune_interval,
        );

        let state = Arc::new(RunnerState::new(
            config,
            db,
            scheduler,
            event_bus,
            object_store,
            secret_store,
        ));

        let harness = TestHarness {
            state,
            engine,
            _tmp: tmp,
        };

        harness.seed_namespace();
        harness
    }

    fn seed_namespace(&self) {
        let conn = self.state.storage.write_conn().unwrap();

        let namespace = gofer::models::namespace::Namespace::new(
            NAMESPACE,
            "Default",
            "integration test namespace",
        );

        match storage::namespaces::insert(&conn, &namespace.into()) {
            Ok(_) | Err(storage::StorageError::Exists) => {}
            Err(e) => panic!("could not seed namespace; {e}"),
        }
    }

    /// Register a pipeline with a single live config containing the given tasks.
    pub fn seed_pipeline(&self, pipeline_id: &str, parallelism: u64, tasks: Vec<task::Task>) {
        let conn = self.state.storage.write_conn().unwrap();

        let metadata = pipeline::Metadata::new(NAMESPACE, pipeline_id);
        storage::pipeline_metadata::insert(&conn, &metadata.into()).unwrap();

        let mut config =
            pipeline_config::Config::new(NAMESPACE, pipeline_id, 1, pipeline_id, parallelism, tasks);
        config.state = pipeline_config::ConfigState::Live;

        let (storage_config, storage_tasks) = config.to_storage().unwrap();
        storage::pipeline_configs::insert(&conn, &storage_config).unwrap();

        for storage_task in storage_tasks {
            storage::tasks::insert(&conn, &storage_task).unwrap();
        }
    }

    pub fn get_run(&self, pipeline_id: &str, run_id: u64) -> run::Run {
        let conn = self.state.storage.read_conn().unwrap();

        let storage_run =
            storage::runs::get(&conn, NAMESPACE, pipeline_id, run_id as i64).unwrap();

        run::Run::try_from(storage_run).unwrap()
    }

    pub fn get_task_run(
        &self,
        pipeline_id: &str,
        run_id: u64,
        task_id: &str,
    ) -> gofer::models::task_run::TaskRun {
        let conn = self.state.storage.read_conn().unwrap();

        let storage_task_run =
            storage::task_runs::get(&conn, NAMESPACE, pipeline_id, run_id as i64, task_id)
                .unwrap();

        gofer::models::task_run::TaskRun::try_from(storage_task_run).unwrap()
    }

    /// Block until the given run reaches Complete, panicking past the deadline.
    pub async fn wait_run_complete(&self, pipeline_id: &str, run_id: u64, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        loop {
            let run = self.get_run(pipeline_id, run_id);
            if run.state == run::State::Complete {
                return;
            }

            if Instant::now() > deadline {
                panic!("run {run_id} for pipeline '{pipeline_id}' did not complete in time");
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Block until an event matching the predicate shows up in the event log.
    pub async fn wait_for_event(
        &self,
        matches: impl Fn(&event::Event) -> bool,
        timeout: Duration,
    ) -> event::Event {
        let deadline = Instant::now() + timeout;

        loop {
            let events = self.state.event_bus.get_all(false).unwrap();
            if let Some(event) = events.into_iter().find(&matches) {
                return event;
            }

            if Instant::now() > deadline {
                panic!("expected event did not show up in time");
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// The full event log, oldest first.
    pub fn events(&self) -> Vec<event::Event> {
        self.state.event_bus.get_all(false).unwrap()
    }
}

/// The index of the first event matching the predicate, panicking when absent.
pub fn event_position(
    events: &[event::Event],
    matches: impl Fn(&event::Kind) -> bool,
) -> usize {
    events
        .iter()
        .position(|event| matches(&event.kind))
        .expect("expected event missing from log")
}
