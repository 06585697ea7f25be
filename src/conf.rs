//! Service configuration; loaded from an embedded default, optional toml files, and
//! prefixed environment variables, in that order of precedence.

use crate::{object_store, scheduler, secret_store};
use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = include_str!("./default_config.toml");

pub trait ConfigType: Deserialize<'static> {
    fn default_config() -> &'static str;
    fn config_paths() -> Vec<PathBuf>;
    fn env_prefix() -> &'static str;
}

pub struct Configuration<T: ConfigType> {
    _marker: std::marker::PhantomData<T>,
}

impl<T: ConfigType> Configuration<T> {
    pub fn load(path_override: Option<PathBuf>) -> Result<T> {
        let mut config = Figment::new().merge(Toml::string(T::default_config()));

        if let Some(path) = path_override {
            config = config.merge(Toml::file(path));
        } else {
            for path in T::config_paths() {
                config = config.merge(Toml::file(path));
            }
        }

        // The split function below is actually pretty load bearing.
        // We use a double underscore `__` to differentiate the difference between
        // a level of the struct and a key in that same struct when we read in environment variables.
        //
        // For example, if you have a doubly nested struct `general -> log` with a key that also has an
        // underline like `log_level`, when the resolution of configuration happens there is no
        // determinate way to resolve the difference between a key named `general_log_level` and a key
        // that is simply just `level` with the potential to be nested as `general -> log`.
        //
        // To solve this we use a double underscore which denotes the difference between what are actual
        // keys and what are levels of the struct we need to dive into.
        config = config.merge(Env::prefixed(T::env_prefix()).split("__"));
        let parsed_config: T = config.extract()?;

        Ok(parsed_config)
    }
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct RunnerConfig {
    pub general: General,
    pub storage: Storage,
    pub scheduler: Scheduler,
    pub object_store: ObjectStore,
    pub secret_store: SecretStore,
}

impl ConfigType for RunnerConfig {
    fn default_config() -> &'static str {
        DEFAULT_CONFIG
    }

    fn config_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/etc/gofer/gofer.toml"),
            PathBuf::from("gofer.toml"),
        ]
    }

    fn env_prefix() -> &'static str {
        "GOFER_"
    }
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct General {
    /// The entire service's log level.
    pub log_level: String,

    /// Tells the logging package to use human readable output.
    pub pretty_logging: bool,

    /// Controls how long the service will hold onto events before discarding them (in seconds).
    /// This is an important factor in disk space and memory footprint.
    pub event_log_retention: u64,

    /// How often the background process for pruning events should run (in seconds).
    pub event_prune_interval: u64,

    /// The run concurrency limit automatically imposed if the pipeline does not define a limit.
    /// 0 is unlimited.
    pub run_parallelism_limit: u64,

    /// The total amount of runs before logs of the oldest run will be deleted.
    pub task_run_log_expiry: u64,

    /// Directory to store task run log files.
    pub task_run_logs_dir: String,

    /// Time in seconds the scheduler will wait for a task run container to gracefully stop.
    /// When the timeout is reached the container will be forcefully terminated. Force
    /// cancellations override this with a 500 millisecond window.
    pub task_run_stop_timeout: u64,

    /// When set, the service rejects manually started runs and drops extension-fired run
    /// events. Used during maintenance.
    pub ignore_pipeline_run_events: bool,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Storage {
    /// Path to the service's sqlite database.
    pub path: String,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Scheduler {
    /// The scheduler engine used to run containers.
    pub engine: scheduler::Engine,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct ObjectStore {
    /// The object store engine used by the backend.
    pub engine: object_store::Engine,

    /// Pipeline objects last forever but are limited in number. This is the total amount of
    /// items that can be stored per pipeline before the oldest object gets deleted, operating
    /// in a ring buffer fashion.
    pub pipeline_object_limit: u64,

    /// Objects stored at the run level are unlimited in number, but only last for a certain
    /// number of runs. The number below controls how many runs until the run objects of the
    /// oldest run will be deleted.
    ///
    /// Ex. an object stored on run #5 with an expiry of 2 will be deleted on run #7
    /// regardless of run health.
    pub run_object_expiry: u64,

    pub filesystem: Option<object_store::filesystem::Config>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct SecretStore {
    /// The secret store engine used by the backend.
    pub engine: secret_store::Engine,

    pub sqlite: Option<secret_store::sqlite::Config>,
}
