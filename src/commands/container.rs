//! Container commands: `create`, `start`, `stop`, `rm`, `inspect`, `ps`.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use podshim::api::{
    Container, ContainerConfig, ContainerFilter, ContainerState, ContainerStatusRequest,
    CreateContainerRequest, ListContainersRequest, PodSandboxConfig, RemoveContainerRequest,
    StartContainerRequest, StopContainerRequest,
};
use podshim::RuntimeService;

use super::{format_timestamp, read_request, short_id};

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Creates a container from TOML container and sandbox configs and prints
/// its ID.
pub(crate) async fn create(
    service: &RuntimeService,
    cancel: &CancellationToken,
    pod_sandbox_id: String,
    config_path: &Path,
    sandbox_config_path: &Path,
) -> Result<()> {
    let config: ContainerConfig = read_request(config_path)?;
    let sandbox_config: PodSandboxConfig = read_request(sandbox_config_path)?;

    let response = service
        .create_container(
            cancel,
            CreateContainerRequest {
                pod_sandbox_id,
                config,
                sandbox_config,
            },
        )
        .await
        .context("Failed to create container")?;

    println!("{}", response.container_id);
    Ok(())
}

pub(crate) async fn start(
    service: &RuntimeService,
    cancel: &CancellationToken,
    container_id: String,
) -> Result<()> {
    service
        .start_container(
            cancel,
            StartContainerRequest {
                container_id: container_id.clone(),
            },
        )
        .await
        .with_context(|| format!("Failed to start container {container_id}"))?;

    println!("{} Started container {}", "✓".green(), container_id.cyan());
    Ok(())
}

pub(crate) async fn stop(
    service: &RuntimeService,
    cancel: &CancellationToken,
    container_id: String,
    timeout_secs: u64,
) -> Result<()> {
    service
        .stop_container(
            cancel,
            StopContainerRequest {
                container_id: container_id.clone(),
                timeout: i64::try_from(timeout_secs).unwrap_or(i64::MAX),
            },
        )
        .await
        .with_context(|| format!("Failed to stop container {container_id}"))?;

    println!("{} Stopped container {}", "✓".green(), container_id.cyan());
    Ok(())
}

pub(crate) async fn remove(
    service: &RuntimeService,
    cancel: &CancellationToken,
    container_id: String,
) -> Result<()> {
    service
        .remove_container(
            cancel,
            RemoveContainerRequest {
                container_id: container_id.clone(),
            },
        )
        .await
        .with_context(|| format!("Failed to remove container {container_id}"))?;

    println!("{} Removed container {}", "✓".green(), container_id.cyan());
    Ok(())
}

/// Prints the container status as JSON.
pub(crate) async fn inspect(
    service: &RuntimeService,
    cancel: &CancellationToken,
    container_id: String,
) -> Result<()> {
    let response = service
        .container_status(cancel, ContainerStatusRequest { container_id })
        .await?;
    println!("{}", serde_json::to_string_pretty(&response.status)?);
    Ok(())
}

pub(crate) async fn list(
    service: &RuntimeService,
    cancel: &CancellationToken,
    pod_sandbox_id: Option<String>,
    state: Option<ContainerState>,
    labels: Vec<(String, String)>,
) -> Result<()> {
    let filter = ContainerFilter {
        pod_sandbox_id: pod_sandbox_id.unwrap_or_default(),
        state,
        label_selector: labels.into_iter().collect::<HashMap<_, _>>(),
        ..Default::default()
    };
    let response = service
        .list_containers(
            cancel,
            ListContainersRequest {
                filter: Some(filter),
            },
        )
        .await?;

    print!("{}", format_table(&response.containers));
    Ok(())
}

// -----------------------------------------------------------------------------
// Formatting
// -----------------------------------------------------------------------------

fn colorize_state(state: ContainerState) -> String {
    let padded = format!("{:<20}", state.to_string());
    match state {
        ContainerState::Running => padded.green().to_string(),
        ContainerState::Created => padded.cyan().to_string(),
        ContainerState::Exited => padded.dimmed().to_string(),
        ContainerState::Unknown => padded.red().to_string(),
    }
}

fn format_table(containers: &[Container]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "{}",
        format!(
            "{:<15}{:<25}{:<25}{:<20}{:<20}{:<10}{}",
            "CONTAINER", "IMAGE", "CREATED", "STATE", "NAME", "ATTEMPT", "POD ID"
        )
        .bold()
    );
    for c in containers {
        let _ = writeln!(
            &mut out,
            "{:<15}{:<25}{:<25}{}{:<20}{:<10}{}",
            short_id(&c.id),
            c.image.image,
            format_timestamp(c.created_at),
            colorize_state(c.state),
            c.metadata.name,
            c.metadata.attempt,
            short_id(&c.pod_sandbox_id)
        );
    }
    out
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use podshim::api::{ContainerMetadata, ImageSpec};

    fn container(id: &str, name: &str, state: ContainerState) -> Container {
        Container {
            id: id.to_string(),
            pod_sandbox_id: "sandbox-0123456789".to_string(),
            metadata: ContainerMetadata {
                name: name.to_string(),
                attempt: 1,
            },
            image: ImageSpec::new("busybox:latest"),
            state,
            ..Default::default()
        }
    }

    #[test]
    fn test_format_table() {
        let output = format_table(&[
            container("aaaa", "web", ContainerState::Running),
            container("bbbb", "sidecar", ContainerState::Exited),
        ]);

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("CONTAINER"));
        assert!(lines[1].contains("web"));
        assert!(lines[1].contains("CONTAINER_RUNNING"));
        assert!(lines[1].contains("busybox:latest"));
        assert!(lines[1].contains("sandbox-01234"));
        assert!(lines[2].contains("sidecar"));
        assert!(lines[2].contains("CONTAINER_EXITED"));
    }

    #[test]
    fn test_unset_creation_time_renders_dash() {
        let output = format_table(&[container("aaaa", "web", ContainerState::Created)]);
        assert!(output.lines().nth(1).unwrap().contains(" - "));
    }
}
