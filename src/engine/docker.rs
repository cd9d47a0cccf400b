use async_trait::async_trait;
use bollard::container::{
    Config as DockerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, HostConfig, PortBinding as DockerPortBinding,
    RestartPolicy, RestartPolicyNameEnum,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Datelike, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ContainerInspect, ContainerSummary, CreateContainerSpec, Engine, EngineError, EngineMount,
    EngineState, EngineStatus, ImageInspect, ListFilter,
};
use crate::config::DockerSettings;

/// Engine client backed by a Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the daemon named in `settings`, or the local default socket.
    pub fn connect(settings: &DockerSettings) -> Result<Self, EngineError> {
        let docker = match settings.endpoint.as_deref() {
            Some(endpoint) if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") => {
                let address = endpoint.replacen("tcp://", "http://", 1);
                Docker::connect_with_http(&address, settings.timeout_secs, API_DEFAULT_VERSION)
            }
            Some(endpoint) => {
                let path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);
                Docker::connect_with_socket(path, settings.timeout_secs, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| EngineError::unavailable(format!("failed to connect to Docker: {e}")))?;

        Ok(Self { docker })
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::unavailable(format!("cannot ping Docker daemon: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String, EngineError> {
        debug!(name = %spec.name, image = %spec.image, "Creating container");
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                build_container_config(spec),
            )
            .await
            .map_err(map_error)?;

        for warning in &response.warnings {
            warn!(name = %spec.name, "Docker create warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        debug!(id, "Starting container");
        self.docker
            .start_container::<String>(id, None)
            .await
            .map_err(map_error)
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError> {
        debug!(id, timeout_secs = timeout.as_secs(), "Stopping container");
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        debug!(id, force, "Removing container");
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: true,
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_error)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, EngineError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;
        Ok(convert_inspect(response))
    }

    async fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut filters = HashMap::new();
        if !filter.labels.is_empty() {
            let labels = filter
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>();
            filters.insert("label".to_string(), labels);
        }

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(map_error)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .unwrap_or_default()
                    .first()
                    .cloned()
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                image_id: c.image_id.unwrap_or_default(),
                created: c.created.and_then(|secs| DateTime::from_timestamp(secs, 0)),
                status: c
                    .state
                    .as_deref()
                    .map_or(EngineStatus::Unknown, EngineStatus::from_status),
                labels: c.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, EngineError> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(map_error)?;
        Ok(ImageInspect {
            id: image.id.unwrap_or_default(),
            repo_tags: image.repo_tags.unwrap_or_default(),
            repo_digests: image.repo_digests.unwrap_or_default(),
        })
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let (from_image, tag) = split_reference(reference);
        info!(image = reference, "Pulling image");

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            let progress = progress.map_err(map_error)?;
            if let Some(error) = progress.error {
                return Err(EngineError::daemon(error));
            }
        }
        info!(image = reference, "Image pulled");
        Ok(())
    }
}

fn map_error(err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message),
        BollardError::DockerResponseServerError { message, .. } => EngineError::Daemon(message),
        other => EngineError::Unavailable(other.to_string()),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn non_empty_vec(values: &[String]) -> Option<Vec<String>> {
    (!values.is_empty()).then(|| values.to_vec())
}

fn build_container_config(spec: &CreateContainerSpec) -> DockerConfig<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();
    for binding in &spec.port_bindings {
        let port = format!("{}/{}", binding.container_port, binding.protocol);
        exposed_ports.insert(port.clone(), HashMap::new());
        port_bindings
            .entry(port)
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(DockerPortBinding {
                host_ip: non_empty(&binding.host_ip),
                host_port: Some(binding.host_port.to_string()),
            });
    }

    DockerConfig {
        image: Some(spec.image.clone()),
        hostname: non_empty(&spec.hostname),
        entrypoint: non_empty_vec(&spec.entrypoint),
        cmd: non_empty_vec(&spec.cmd),
        env: Some(spec.env.clone()),
        working_dir: non_empty(&spec.working_dir),
        labels: Some(spec.labels.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        tty: Some(spec.tty),
        open_stdin: Some(spec.open_stdin),
        stdin_once: Some(spec.stdin_once),
        host_config: Some(HostConfig {
            binds: Some(spec.binds.clone()),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            network_mode: non_empty(&spec.network_mode),
            ipc_mode: non_empty(&spec.ipc_mode),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn convert_inspect(response: ContainerInspectResponse) -> ContainerInspect {
    let state = response.state.unwrap_or_default();
    let config = response.config.unwrap_or_default();

    ContainerInspect {
        id: response.id.unwrap_or_default(),
        name: response.name.unwrap_or_default(),
        image: response.image.unwrap_or_default(),
        config_image: config.image.unwrap_or_default(),
        created: parse_timestamp(response.created.as_deref()),
        state: EngineState {
            status: match state.status {
                Some(ContainerStateStatusEnum::CREATED) => EngineStatus::Created,
                Some(ContainerStateStatusEnum::RUNNING) => EngineStatus::Running,
                Some(ContainerStateStatusEnum::PAUSED) => EngineStatus::Paused,
                Some(ContainerStateStatusEnum::RESTARTING) => EngineStatus::Restarting,
                Some(ContainerStateStatusEnum::REMOVING) => EngineStatus::Removing,
                Some(ContainerStateStatusEnum::EXITED) => EngineStatus::Exited,
                Some(ContainerStateStatusEnum::DEAD) => EngineStatus::Dead,
                _ => EngineStatus::Unknown,
            },
            running: state.running.unwrap_or(false),
            restarting: state.restarting.unwrap_or(false),
            oom_killed: state.oom_killed.unwrap_or(false),
            exit_code: state.exit_code.unwrap_or(0),
            error: state.error.unwrap_or_default(),
            started_at: parse_timestamp(state.started_at.as_deref()),
            finished_at: parse_timestamp(state.finished_at.as_deref()),
        },
        labels: config.labels.unwrap_or_default(),
        log_path: response.log_path.unwrap_or_default(),
        mounts: response
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| EngineMount {
                source: m.source.unwrap_or_default(),
                destination: m.destination.unwrap_or_default(),
                rw: m.rw.unwrap_or(false),
                propagation: m.propagation.unwrap_or_default(),
            })
            .collect(),
    }
}

/// Parses a Docker RFC 3339 timestamp. Docker reports unset times as
/// `0001-01-01T00:00:00Z`, which maps to `None`.
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value?).ok()?.with_timezone(&Utc);
    (parsed.year() > 1).then_some(parsed)
}

/// Splits `repo[:tag]` for the pull API. Digest references pass through whole.
fn split_reference(reference: &str) -> (String, String) {
    if reference.contains('@') {
        return (reference.to_string(), String::new());
    }
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (
                reference[..split].to_string(),
                reference[split + 1..].to_string(),
            )
        }
        None => (reference.to_string(), "latest".to_string()),
    }
}
