//! The scheduler is the mechanism in which the service runs its containers (tasks).
//!
//! The trait here is the narrow contract the run core consumes: start a container, query its
//! state, stream its logs, and stop it. Concrete engines live in submodules and are selected
//! through configuration.

pub mod in_memory;

use crate::conf;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::pin::Pin;
use std::time::Duration;
use strum::{Display, EnumString};

/// Represents different scheduler failure possibilities.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// Failed to init scheduler due to misconfigured settings, usually from a misconfigured
    /// settings file.
    #[error("could not init scheduler; {0}")]
    FailedSchedulerPrecondition(String),

    /// Failed to start container due to a misconfigured container request.
    #[error("could not init container config; {0}")]
    FailedContainerPrecondition(String),

    /// Failed to communicate with scheduler due to network error or other.
    #[error("could not connect to scheduler; {0}")]
    Connection(String),

    /// Container requested by name could not be found.
    #[error("container not found; {0}")]
    NoSuchContainer(String),

    /// Image requested by name could not be found.
    #[error("container image not found; {0}")]
    NoSuchImage(String),

    /// An unexpected and unknown error has occurred.
    #[error("unexpected scheduler error occurred; {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unknown,
    Running,
    Paused,
    Restarting,
    Cancelled,
    Exited,
}

/// Private repositories sometimes require authentication.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub user: String,
    pub pass: String,
}

impl From<crate::models::RegistryAuth> for RegistryAuth {
    fn from(ra: crate::models::RegistryAuth) -> Self {
        Self {
            user: ra.user,
            pass: ra.pass,
        }
    }
}

#[derive(Debug)]
pub struct StartContainerRequest {
    /// A unique identifier to identify the container with.
    pub id: String,

    /// The image repository and image name; tag can be included.
    pub image: String,

    /// Environment variables to be passed to the container.
    pub variables: HashMap<String, String>,

    /// Registry authentication details.
    pub registry_auth: Option<RegistryAuth>,

    /// Attempt to pull the container from the upstream repository even if it exists already
    /// locally. This is useful if your containers don't use proper tagging or versioning.
    pub always_pull: bool,

    /// Only needed by extension containers; spin the container up with networking enabled so
    /// the service can connect to it on the returned port.
    pub networking: Option<u16>,

    /// Replaces container's entrypoint with a custom one.
    pub entrypoint: Option<Vec<String>>,

    /// Replaces container's cmd instruction with a custom one.
    pub command: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct StartContainerResponse {
    /// An optional, unique way for the scheduler to identify the container. Sometimes the
    /// scheduler will not be able to use the client provided container id as a unique
    /// identifier and will return its own.
    pub scheduler_id: Option<String>,

    /// An endpoint that is only returned for containers with networking set.
    pub url: Option<String>,
}

#[derive(Debug)]
pub struct StopContainerRequest {
    /// A unique identifier to identify the container with.
    pub id: String,

    /// The total time the scheduler should wait for a graceful stop before forcefully
    /// terminating the container.
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct GetStateRequest {
    /// Unique identifier for container to query.
    pub id: String,
}

#[derive(Debug)]
pub struct GetStateResponse {
    /// In the event that the container is in a "complete" state; the exit code of that
    /// container.
    pub exit_code: Option<u8>,

    /// The current state of the container, referencing how complete the container process of
    /// running is.
    pub state: ContainerState,
}

#[derive(Debug)]
pub struct GetLogsRequest {
    /// Unique identifier for container to stream logs for.
    pub id: String,
}

/// Represents a single log line/entry from a particular container.
#[derive(Debug, Clone)]
pub enum Log {
    Unknown,
    Stdout(Bytes),
    Stderr(Bytes),
}

/// The scheduler trait defines what the interface between the run core and a container
/// scheduler should look like.
#[async_trait]
pub trait Scheduler: Debug + Send + Sync {
    /// Start a container based on details passed; should handle pulling and registry auth
    /// of the container image if necessary.
    async fn start_container(
        &self,
        req: StartContainerRequest,
    ) -> Result<StartContainerResponse, SchedulerError>;

    /// Kill a container with an associated timeout if the container does not respond to
    /// graceful shutdown.
    async fn stop_container(&self, req: StopContainerRequest) -> Result<(), SchedulerError>;

    /// Get the current state of a container and potential exit code.
    async fn get_state(&self, req: GetStateRequest) -> Result<GetStateResponse, SchedulerError>;

    /// Returns a stream of logs from the container. The stream closes when the container
    /// terminates.
    fn get_logs(
        &self,
        req: GetLogsRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<Log, SchedulerError>> + Send>>;
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum Engine {
    #[default]
    InMemory,
}

pub async fn new(config: &conf::Scheduler) -> Result<Box<dyn Scheduler>, SchedulerError> {
    #[allow(clippy::match_single_binding)]
    match config.engine {
        Engine::InMemory => Ok(Box::new(in_memory::Engine::new())),
    }
}
