use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{status, RuntimeService};
use crate::api::{
    ContainerConfig, ContainerStatusRequest, ContainerStatusResponse, CreateContainerRequest,
    CreateContainerResponse, ListContainersRequest, ListContainersResponse, Mount,
    MountPropagation, RemoveContainerRequest, RemoveContainerResponse, StartContainerRequest,
    StartContainerResponse, StopContainerRequest, StopContainerResponse,
};
use crate::cleanup::ContainerCleanupInfo;
use crate::engine::{ContainerInspect, CreateContainerSpec, EngineError, ListFilter};
use crate::error::{Result, ShimError};
use crate::labels::{self, LabelMetadata, CONTAINER_TYPE_LABEL_CONTAINER, CONTAINER_TYPE_LABEL_KEY};
use crate::naming::NativeName;

/// Where the orchestrator expects a container's log: the container's log path
/// under its sandbox's log directory. Empty when no log was requested.
pub fn container_log_path(log_directory: &str, log_path: &str) -> String {
    if log_path.is_empty() {
        return String::new();
    }
    Path::new(log_directory)
        .join(log_path)
        .to_string_lossy()
        .into_owned()
}

/// Docker bind strings, `host:container[:options]`.
pub fn mount_bindings(mounts: &[Mount]) -> Vec<String> {
    mounts
        .iter()
        .map(|m| {
            let mut bind = format!("{}:{}", m.host_path, m.container_path);
            let mut attrs = Vec::new();
            if m.readonly {
                attrs.push("ro");
            }
            // Relabel only on request; otherwise the first container to mount
            // the volume would lock everyone else out.
            if m.selinux_relabel {
                attrs.push("Z");
            }
            match m.propagation {
                MountPropagation::Private => {}
                MountPropagation::Bidirectional => attrs.push("rshared"),
                MountPropagation::HostToContainer => attrs.push("rslave"),
            }
            if !attrs.is_empty() {
                bind.push(':');
                bind.push_str(&attrs.join(","));
            }
            bind
        })
        .collect()
}

fn container_spec(
    pod_sandbox_id: &str,
    config: &ContainerConfig,
    name: String,
    log_path: &str,
) -> CreateContainerSpec {
    let sandbox_mode = format!("container:{pod_sandbox_id}");
    CreateContainerSpec {
        name,
        image: config.image.image.clone(),
        entrypoint: config.command.clone(),
        cmd: config.args.clone(),
        env: config
            .envs
            .iter()
            .map(|kv| format!("{}={}", kv.key, kv.value))
            .collect(),
        working_dir: config.working_dir.clone(),
        labels: LabelMetadata::container(
            pod_sandbox_id,
            log_path,
            &config.labels,
            &config.annotations,
        )
        .to_labels(),
        binds: mount_bindings(&config.mounts),
        network_mode: sandbox_mode.clone(),
        ipc_mode: sandbox_mode,
        tty: config.tty,
        open_stdin: config.stdin,
        stdin_once: config.stdin_once,
        ..Default::default()
    }
}

fn not_found_or(operation: &'static str, id: &str, err: EngineError) -> ShimError {
    if err.is_not_found() {
        ShimError::container_not_found(id)
    } else {
        ShimError::engine(operation, id, err)
    }
}

impl RuntimeService {
    /// Creates an application container inside a sandbox. The container is
    /// not started.
    pub async fn create_container(
        &self,
        cancel: &CancellationToken,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse> {
        let CreateContainerRequest {
            pod_sandbox_id,
            config,
            sandbox_config,
        } = request;

        let name = NativeName::container(&config.metadata, &sandbox_config.metadata);
        name.check_fields()?;
        labels::check_caller_labels(&config.labels)?;
        let name = name.encode();
        let log_path = container_log_path(&sandbox_config.log_directory, &config.log_path);
        let spec = container_spec(&pod_sandbox_id, &config, name, &log_path);
        info!(container = %spec.name, sandbox_id = %pod_sandbox_id, "Creating container");

        let container_id = self
            .create_with_conflict_recovery(cancel, "CreateContainer", spec)
            .await?;
        debug!(container_id = %container_id, "Created container");
        Ok(CreateContainerResponse { container_id })
    }

    /// Starts a created container and links its log where the orchestrator
    /// expects it.
    ///
    /// A failure to create the link is returned, but the container stays
    /// running.
    pub async fn start_container(
        &self,
        cancel: &CancellationToken,
        request: StartContainerRequest,
    ) -> Result<StartContainerResponse> {
        let id = request.container_id;
        let target = id.clone();
        self.dispatch(cancel, "StartContainer", move |engine| async move {
            engine.start_container(&target).await
        })
        .await?
        .map_err(|err| not_found_or("start", &id, err))?;
        info!(container_id = %id, "Started container");

        self.create_log_symlink(cancel, &id).await?;
        Ok(StartContainerResponse {})
    }

    async fn create_log_symlink(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let Some(inspect) = self.inspect_if_present(cancel, "StartContainer", id).await? else {
            debug!(container_id = %id, "Container removed while starting, skipping log symlink");
            return Ok(());
        };

        let expected = LabelMetadata::from_labels(&inspect.labels).log_path;
        if expected.is_empty() {
            debug!(container_id = %id, "No log path requested, skipping log symlink");
            return Ok(());
        }
        if inspect.log_path.is_empty() {
            debug!(container_id = %id, "Engine reports no log file, skipping log symlink");
            return Ok(());
        }

        // Keyed by the full engine ID, whatever prefix the caller used.
        let container_id = inspect.id;
        let _lock = self.cleanup.lock(&container_id).await;
        if self
            .inspect_if_present(cancel, "StartContainer", &container_id)
            .await?
            .is_none()
        {
            debug!(container_id = %container_id, "Container removed while starting, skipping log symlink");
            return Ok(());
        }

        let link = PathBuf::from(expected);
        // A restarted attempt may find its predecessor's link in place.
        if self.fs.remove(&link).await.is_ok() {
            debug!(path = %link.display(), "Cleared existing log symlink");
        }
        self.fs
            .symlink(Path::new(&inspect.log_path), &link)
            .await
            .map_err(|err| ShimError::filesystem("create log symlink", &link, err))?;

        self.cleanup
            .insert(&container_id, ContainerCleanupInfo { log_symlink: link });
        Ok(())
    }

    /// Inspects a container; `None` when the engine no longer knows it.
    async fn inspect_if_present(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        id: &str,
    ) -> Result<Option<ContainerInspect>> {
        let target = id.to_string();
        match self
            .dispatch(cancel, operation, move |engine| async move {
                engine.inspect_container(&target).await
            })
            .await?
        {
            Ok(inspect) => Ok(Some(inspect)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(ShimError::engine("inspect", id, err)),
        }
    }

    /// Stops a container. Stopping an exited container succeeds.
    pub async fn stop_container(
        &self,
        cancel: &CancellationToken,
        request: StopContainerRequest,
    ) -> Result<StopContainerResponse> {
        let id = request.container_id;
        let timeout = Duration::from_secs(u64::try_from(request.timeout).unwrap_or(0));
        let target = id.clone();
        self.dispatch(cancel, "StopContainer", move |engine| async move {
            engine.stop_container(&target, timeout).await
        })
        .await?
        .map_err(|err| not_found_or("stop", &id, err))?;

        info!(container_id = %id, "Stopped container");
        Ok(StopContainerResponse {})
    }

    /// Removes a container and its log symlink.
    ///
    /// The engine removal runs even when the symlink cannot be removed; the
    /// symlink error is returned afterwards.
    pub async fn remove_container(
        &self,
        cancel: &CancellationToken,
        request: RemoveContainerRequest,
    ) -> Result<RemoveContainerResponse> {
        let id = request.container_id;
        if cancel.is_cancelled() {
            return Err(ShimError::cancelled("RemoveContainer"));
        }

        let inspect = self
            .inspect_if_present(cancel, "RemoveContainer", &id)
            .await?
            .ok_or_else(|| ShimError::container_not_found(&id))?;
        let container_id = inspect.id;
        let _lock = self.cleanup.lock(&container_id).await;

        // No entry when another process started the container; the label
        // still says where its link went.
        let link = match self.cleanup.remove(&container_id) {
            Some(info) => Some(info.log_symlink),
            None => {
                let labelled = LabelMetadata::from_labels(&inspect.labels).log_path;
                (!labelled.is_empty()).then(|| PathBuf::from(labelled))
            }
        };

        let mut link_error = None;
        if let Some(link) = link {
            match self.fs.remove(&link).await {
                Ok(()) => debug!(path = %link.display(), "Removed log symlink"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %link.display(), "Log symlink already gone");
                }
                Err(err) => {
                    warn!(container_id = %container_id, path = %link.display(), error = %err, "Failed to remove log symlink");
                    link_error = Some(ShimError::filesystem("remove log symlink", link, err));
                }
            }
        }

        let target = container_id.clone();
        self.dispatch(cancel, "RemoveContainer", move |engine| async move {
            engine.remove_container(&target, true).await
        })
        .await?
        .map_err(|err| not_found_or("remove", &id, err))?;
        info!(container_id = %container_id, "Removed container");

        match link_error {
            Some(err) => Err(err),
            None => Ok(RemoveContainerResponse {}),
        }
    }

    pub async fn container_status(
        &self,
        cancel: &CancellationToken,
        request: ContainerStatusRequest,
    ) -> Result<ContainerStatusResponse> {
        let id = request.container_id;
        let target = id.clone();
        let inspect = self
            .dispatch(cancel, "ContainerStatus", move |engine| async move {
                engine.inspect_container(&target).await
            })
            .await?
            .map_err(|err| not_found_or("inspect", &id, err))?;

        let image = if inspect.image.is_empty() {
            None
        } else {
            let reference = inspect.image.clone();
            match self
                .dispatch(cancel, "ContainerStatus", move |engine| async move {
                    engine.inspect_image(&reference).await
                })
                .await?
            {
                Ok(image) => Some(image),
                Err(err) if err.is_not_found() => {
                    debug!(container_id = %id, image = %inspect.image, "Image no longer present");
                    None
                }
                Err(err) => return Err(ShimError::engine("inspect image", &inspect.image, err)),
            }
        };

        Ok(ContainerStatusResponse {
            status: status::container_status(&inspect, image.as_ref())?,
        })
    }

    pub async fn list_containers(
        &self,
        cancel: &CancellationToken,
        request: ListContainersRequest,
    ) -> Result<ListContainersResponse> {
        let filter = ListFilter::label(CONTAINER_TYPE_LABEL_KEY, CONTAINER_TYPE_LABEL_CONTAINER);
        let summaries = self
            .dispatch(cancel, "ListContainers", move |engine| async move {
                engine.list_containers(&filter).await
            })
            .await?
            .map_err(|err| ShimError::engine("list", "containers", err))?;

        Ok(ListContainersResponse {
            containers: status::list_containers(&summaries, &request.filter.unwrap_or_default()),
        })
    }
}
