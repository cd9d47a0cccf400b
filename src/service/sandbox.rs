use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{status, RuntimeService};
use crate::api::{
    ListPodSandboxRequest, ListPodSandboxResponse, PodSandboxConfig, PodSandboxStatusRequest,
    PodSandboxStatusResponse, RemovePodSandboxRequest, RemovePodSandboxResponse,
    RunPodSandboxRequest, RunPodSandboxResponse, StopPodSandboxRequest, StopPodSandboxResponse,
};
use crate::engine::{CreateContainerSpec, ListFilter, PortBinding};
use crate::error::{Result, ShimError};
use crate::labels::{self, LabelMetadata, CONTAINER_TYPE_LABEL_KEY, CONTAINER_TYPE_LABEL_SANDBOX};
use crate::naming::NativeName;

fn sandbox_spec(config: &PodSandboxConfig, image: &str) -> CreateContainerSpec {
    CreateContainerSpec {
        name: NativeName::sandbox(&config.metadata).encode(),
        image: image.to_string(),
        hostname: config.hostname.clone(),
        labels: LabelMetadata::sandbox(&config.labels, &config.annotations).to_labels(),
        port_bindings: config
            .port_mappings
            .iter()
            .map(|pm| PortBinding {
                container_port: pm.container_port,
                protocol: pm.protocol.to_string(),
                host_ip: pm.host_ip.clone(),
                host_port: pm.host_port,
            })
            .collect(),
        ..Default::default()
    }
}

impl RuntimeService {
    /// Creates and starts the infra object of a new pod sandbox.
    ///
    /// Anything that fails after the object exists removes it again, so a
    /// failed run leaves nothing behind.
    pub async fn run_pod_sandbox(
        &self,
        cancel: &CancellationToken,
        request: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse> {
        NativeName::sandbox(&request.config.metadata).check_fields()?;
        labels::check_caller_labels(&request.config.labels)?;
        let spec = sandbox_spec(&request.config, &self.settings.pause_image);
        info!(sandbox = %spec.name, "Running pod sandbox");

        self.ensure_image(cancel, "RunPodSandbox", &spec.image).await?;
        let id = self
            .create_with_conflict_recovery(cancel, "RunPodSandbox", spec)
            .await?;

        if let Err(err) = self.start_sandbox(cancel, &id).await {
            error!(sandbox_id = %id, error = %err, "Failed to start pod sandbox, removing it");
            if let Err(cleanup) = self.engine.remove_container(&id, true).await {
                warn!(sandbox_id = %id, error = %cleanup, "Failed to remove partially created sandbox");
            }
            return Err(err);
        }

        info!(sandbox_id = %id, "Pod sandbox ready");
        Ok(RunPodSandboxResponse { pod_sandbox_id: id })
    }

    async fn ensure_image(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        image: &str,
    ) -> Result<()> {
        let reference = image.to_string();
        let inspected = self
            .dispatch(cancel, operation, move |engine| async move {
                engine.inspect_image(&reference).await
            })
            .await?;
        match inspected {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {
                info!(image, "Image not present, pulling");
            }
            Err(err) => return Err(ShimError::engine("inspect image", image, err)),
        }

        let reference = image.to_string();
        self.dispatch(cancel, operation, move |engine| async move {
            engine.pull_image(&reference).await
        })
        .await?
        .map_err(|err| ShimError::engine("pull image", image, err))
    }

    async fn start_sandbox(&self, cancel: &CancellationToken, id: &str) -> Result<()> {
        let target = id.to_string();
        self.dispatch(cancel, "RunPodSandbox", move |engine| async move {
            engine.start_container(&target).await
        })
        .await?
        .map_err(|err| ShimError::engine("start", id, err))?;

        let target = id.to_string();
        let inspect = self
            .dispatch(cancel, "RunPodSandbox", move |engine| async move {
                engine.inspect_container(&target).await
            })
            .await?
            .map_err(|err| ShimError::engine("inspect", id, err))?;
        if !inspect.state.running {
            warn!(sandbox_id = %id, status = ?inspect.state.status, "Sandbox infra container is not running after start");
        }
        Ok(())
    }

    /// Stops a sandbox's infra object. Stopping a stopped or missing sandbox
    /// succeeds.
    pub async fn stop_pod_sandbox(
        &self,
        cancel: &CancellationToken,
        request: StopPodSandboxRequest,
    ) -> Result<StopPodSandboxResponse> {
        let id = request.pod_sandbox_id;
        let grace = self.settings.sandbox_stop_grace;
        let target = id.clone();
        let stopped = self
            .dispatch(cancel, "StopPodSandbox", move |engine| async move {
                engine.stop_container(&target, grace).await
            })
            .await?;

        match stopped {
            Ok(()) => info!(sandbox_id = %id, "Stopped pod sandbox"),
            Err(err) if err.is_not_found() => {
                debug!(sandbox_id = %id, "Pod sandbox already gone, nothing to stop");
            }
            Err(err) => return Err(ShimError::engine("stop", id, err)),
        }
        Ok(StopPodSandboxResponse {})
    }

    /// Force-removes a sandbox's infra object. Containers of the sandbox are
    /// not touched.
    pub async fn remove_pod_sandbox(
        &self,
        cancel: &CancellationToken,
        request: RemovePodSandboxRequest,
    ) -> Result<RemovePodSandboxResponse> {
        let id = request.pod_sandbox_id;
        let target = id.clone();
        let removed = self
            .dispatch(cancel, "RemovePodSandbox", move |engine| async move {
                engine.remove_container(&target, true).await
            })
            .await?;

        match removed {
            Ok(()) => info!(sandbox_id = %id, "Removed pod sandbox"),
            Err(err) if err.is_not_found() => {
                debug!(sandbox_id = %id, "Pod sandbox already removed");
            }
            Err(err) => return Err(ShimError::engine("remove", id, err)),
        }
        Ok(RemovePodSandboxResponse {})
    }

    pub async fn pod_sandbox_status(
        &self,
        cancel: &CancellationToken,
        request: PodSandboxStatusRequest,
    ) -> Result<PodSandboxStatusResponse> {
        let id = request.pod_sandbox_id;
        let target = id.clone();
        let inspect = self
            .dispatch(cancel, "PodSandboxStatus", move |engine| async move {
                engine.inspect_container(&target).await
            })
            .await?
            .map_err(|err| {
                if err.is_not_found() {
                    ShimError::sandbox_not_found(&id)
                } else {
                    ShimError::engine("inspect", &id, err)
                }
            })?;

        Ok(PodSandboxStatusResponse {
            status: status::sandbox_status(&inspect)?,
        })
    }

    pub async fn list_pod_sandbox(
        &self,
        cancel: &CancellationToken,
        request: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse> {
        let filter = ListFilter::label(CONTAINER_TYPE_LABEL_KEY, CONTAINER_TYPE_LABEL_SANDBOX);
        let summaries = self
            .dispatch(cancel, "ListPodSandbox", move |engine| async move {
                engine.list_containers(&filter).await
            })
            .await?
            .map_err(|err| ShimError::engine("list", "pod sandboxes", err))?;

        Ok(ListPodSandboxResponse {
            items: status::list_pod_sandboxes(&summaries, &request.filter.unwrap_or_default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{PodSandboxMetadata, PortMapping, Protocol};
    use std::collections::HashMap;

    #[test]
    fn test_sandbox_spec() {
        let config = PodSandboxConfig {
            metadata: PodSandboxMetadata {
                name: "foo".to_string(),
                uid: "1".to_string(),
                namespace: "bar".to_string(),
                attempt: 0,
            },
            hostname: "foo-host".to_string(),
            port_mappings: vec![PortMapping {
                protocol: Protocol::Udp,
                container_port: 53,
                host_port: 5353,
                host_ip: String::new(),
            }],
            labels: HashMap::from([("app".to_string(), "dns".to_string())]),
            ..Default::default()
        };

        let spec = sandbox_spec(&config, "pause:3.9");
        assert_eq!(spec.name, "k8s_POD_foo_bar_1_0");
        assert_eq!(spec.image, "pause:3.9");
        assert_eq!(spec.hostname, "foo-host");
        assert_eq!(spec.port_bindings[0].protocol, "udp");
        assert_eq!(spec.port_bindings[0].host_port, 5353);
        assert_eq!(
            spec.labels.get(CONTAINER_TYPE_LABEL_KEY).map(String::as_str),
            Some("podsandbox")
        );
        assert_eq!(spec.labels.get("app").map(String::as_str), Some("dns"));
    }
}
