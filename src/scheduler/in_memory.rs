//! A process-local scheduler engine. Containers are simulated in memory with scriptable
//! lifecycles per image. Used for development and for exercising the run core without a real
//! container runtime.

use super::{
    ContainerState, GetLogsRequest, GetStateRequest, GetStateResponse, Log, Scheduler,
    SchedulerError, StartContainerRequest, StartContainerResponse, StopContainerRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripts how a simulated container behaves once started. Behaviors are registered per
/// image; containers of unregistered images run to a successful exit.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Container never exits on its own; it reports Running until stopped.
    pub hold_running: bool,

    /// Exit code reported once the container finishes.
    pub exit_code: u8,

    /// How many state polls report Running before the container exits.
    pub polls_until_exit: u64,

    /// Fail the start call itself, as if the image could not be found.
    pub fail_to_start: bool,

    /// Lines emitted on stdout; the engine newline-terminates each one.
    pub log_lines: Vec<String>,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            hold_running: false,
            exit_code: 0,
            polls_until_exit: 1,
            fail_to_start: false,
            log_lines: vec![],
        }
    }
}

#[derive(Debug)]
struct Container {
    behavior: Behavior,
    #[allow(dead_code)]
    variables: HashMap<String, String>,
    polls: u64,
    stopped: bool,
}

impl Container {
    fn exited(&self) -> bool {
        !self.behavior.hold_running && self.polls >= self.behavior.polls_until_exit
    }
}

#[derive(Debug, Clone, Default)]
pub struct Engine {
    containers: Arc<DashMap<String, Container>>,
    behaviors: Arc<DashMap<String, Behavior>>,
    stop_requests: Arc<Mutex<Vec<(String, Duration)>>>,
}

impl Engine {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register how containers of the given image should behave.
    pub fn set_behavior(&self, image: &str, behavior: Behavior) {
        self.behaviors.insert(image.into(), behavior);
    }

    /// Every stop request the engine has received, in order.
    pub fn stop_requests(&self) -> Vec<(String, Duration)> {
        self.stop_requests.lock().unwrap().clone()
    }

    /// The env map a started container was given. Mostly interesting to tests that assert
    /// variable injection.
    pub fn container_variables(&self, id: &str) -> Option<HashMap<String, String>> {
        self.containers.get(id).map(|c| c.variables.clone())
    }
}

#[async_trait]
impl Scheduler for Engine {
    async fn start_container(
        &self,
        req: StartContainerRequest,
    ) -> Result<StartContainerResponse, SchedulerError> {
        let behavior = self
            .behaviors
            .get(&req.image)
            .map(|b| b.clone())
            .unwrap_or_default();

        if behavior.fail_to_start {
            return Err(SchedulerError::NoSuchImage(req.image.clone()));
        }

        self.containers.insert(
            req.id.clone(),
            Container {
                behavior,
                variables: req.variables,
                polls: 0,
                stopped: false,
            },
        );

        Ok(StartContainerResponse {
            scheduler_id: Some(req.id),
            url: None,
        })
    }

    async fn stop_container(&self, req: StopContainerRequest) -> Result<(), SchedulerError> {
        self.stop_requests
            .lock()
            .unwrap()
            .push((req.id.clone(), req.timeout));

        let mut container = self
            .containers
            .get_mut(&req.id)
            .ok_or_else(|| SchedulerError::NoSuchContainer(req.id.clone()))?;

        // Stopping an already exited container is a no-op; otherwise the container reports
        // Cancelled on the next poll.
        if !container.exited() {
            container.stopped = true;
        }

        Ok(())
    }

    async fn get_state(&self, req: GetStateRequest) -> Result<GetStateResponse, SchedulerError> {
        let mut container = self
            .containers
            .get_mut(&req.id)
            .ok_or_else(|| SchedulerError::NoSuchContainer(req.id.clone()))?;

        if container.stopped {
            return Ok(GetStateResponse {
                exit_code: None,
                state: ContainerState::Cancelled,
            });
        }

        if container.behavior.hold_running {
            return Ok(GetStateResponse {
                exit_code: None,
                state: ContainerState::Running,
            });
        }

        if container.polls >= container.behavior.polls_until_exit {
            return Ok(GetStateResponse {
                exit_code: Some(container.behavior.exit_code),
                state: ContainerState::Exited,
            });
        }

        container.polls += 1;

        Ok(GetStateResponse {
            exit_code: None,
            state: ContainerState::Running,
        })
    }

    fn get_logs(
        &self,
        req: GetLogsRequest,
    ) -> Pin<Box<dyn Stream<Item = Result<Log, SchedulerError>> + Send>> {
        let lines: Vec<Result<Log, SchedulerError>> = match self.containers.get(&req.id) {
            Some(container) => container
                .behavior
                .log_lines
                .iter()
                .map(|line| Ok(Log::Stdout(Bytes::from(format!("{line}\n")))))
                .collect(),
            None => vec![Err(SchedulerError::NoSuchContainer(req.id.clone()))],
        };

        Box::pin(futures::stream::iter(lines))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn containers_run_then_exit() {
        let engine = Engine::new();

        engine
            .start_container(StartContainerRequest {
                id: "container_1".into(),
                image: "ubuntu:latest".into(),
                variables: HashMap::new(),
                registry_auth: None,
                always_pull: false,
                networking: None,
                entrypoint: None,
                command: None,
            })
            .await
            .unwrap();

        let state = engine
            .get_state(GetStateRequest {
                id: "container_1".into(),
            })
            .await
            .unwrap();
        assert_eq!(state.state, ContainerState::Running);

        let state = engine
            .get_state(GetStateRequest {
                id: "container_1".into(),
            })
            .await
            .unwrap();
        assert_eq!(state.state, ContainerState::Exited);
        assert_eq!(state.exit_code, Some(0));
    }

    #[tokio::test]
    async fn stopped_containers_report_cancelled() {
        let engine = Engine::new();
        engine.set_behavior(
            "ubuntu:latest",
            Behavior {
                hold_running: true,
                ..Default::default()
            },
        );

        engine
            .start_container(StartContainerRequest {
                id: "container_1".into(),
                image: "ubuntu:latest".into(),
                variables: HashMap::new(),
                registry_auth: None,
                always_pull: false,
                networking: None,
                entrypoint: None,
                command: None,
            })
            .await
            .unwrap();

        engine
            .stop_container(StopContainerRequest {
                id: "container_1".into(),
                timeout: Duration::from_secs(30),
            })
            .await
            .unwrap();

        let state = engine
            .get_state(GetStateRequest {
                id: "container_1".into(),
            })
            .await
            .unwrap();
        assert_eq!(state.state, ContainerState::Cancelled);

        assert_eq!(engine.stop_requests().len(), 1);
    }

    #[tokio::test]
    async fn behaviors_control_exit_codes() {
        let engine = Engine::new();
        engine.set_behavior(
            "fails:latest",
            Behavior {
                exit_code: 42,
                ..Default::default()
            },
        );

        engine
            .start_container(StartContainerRequest {
                id: "container_1".into(),
                image: "fails:latest".into(),
                variables: HashMap::new(),
                registry_auth: None,
                always_pull: false,
                networking: None,
                entrypoint: None,
                command: None,
            })
            .await
            .unwrap();

        // Drain the running poll, then check the exit.
        engine
            .get_state(GetStateRequest {
                id: "container_1".into(),
            })
            .await
            .unwrap();

        let state = engine
            .get_state(GetStateRequest {
                id: "container_1".into(),
            })
            .await
            .unwrap();
        assert_eq!(state.state, ContainerState::Exited);
        assert_eq!(state.exit_code, Some(42));
    }
}
