//! Pod sandbox commands: `runp`, `stopp`, `rmp`, `inspectp`, `pods`.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use podshim::api::{
    ListPodSandboxRequest, PodSandbox, PodSandboxConfig, PodSandboxFilter, PodSandboxState,
    PodSandboxStatusRequest, RemovePodSandboxRequest, RunPodSandboxRequest,
    StopPodSandboxRequest,
};
use podshim::RuntimeService;

use super::{format_timestamp, read_request, short_id};

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Runs a sandbox from a TOML `PodSandboxConfig` and prints its ID.
pub(crate) async fn run(
    service: &RuntimeService,
    cancel: &CancellationToken,
    config_path: &Path,
) -> Result<()> {
    let config: PodSandboxConfig = read_request(config_path)?;
    let response = service
        .run_pod_sandbox(
            cancel,
            RunPodSandboxRequest {
                config,
                ..Default::default()
            },
        )
        .await
        .context("Failed to run pod sandbox")?;

    println!("{}", response.pod_sandbox_id);
    Ok(())
}

pub(crate) async fn stop(
    service: &RuntimeService,
    cancel: &CancellationToken,
    pod_sandbox_id: String,
) -> Result<()> {
    service
        .stop_pod_sandbox(
            cancel,
            StopPodSandboxRequest {
                pod_sandbox_id: pod_sandbox_id.clone(),
            },
        )
        .await
        .with_context(|| format!("Failed to stop pod sandbox {pod_sandbox_id}"))?;

    println!("{} Stopped sandbox {}", "✓".green(), pod_sandbox_id.cyan());
    Ok(())
}

pub(crate) async fn remove(
    service: &RuntimeService,
    cancel: &CancellationToken,
    pod_sandbox_id: String,
) -> Result<()> {
    service
        .remove_pod_sandbox(
            cancel,
            RemovePodSandboxRequest {
                pod_sandbox_id: pod_sandbox_id.clone(),
            },
        )
        .await
        .with_context(|| format!("Failed to remove pod sandbox {pod_sandbox_id}"))?;

    println!("{} Removed sandbox {}", "✓".green(), pod_sandbox_id.cyan());
    Ok(())
}

/// Prints the sandbox status as JSON.
pub(crate) async fn inspect(
    service: &RuntimeService,
    cancel: &CancellationToken,
    pod_sandbox_id: String,
) -> Result<()> {
    let response = service
        .pod_sandbox_status(cancel, PodSandboxStatusRequest { pod_sandbox_id })
        .await?;
    println!("{}", serde_json::to_string_pretty(&response.status)?);
    Ok(())
}

pub(crate) async fn list(
    service: &RuntimeService,
    cancel: &CancellationToken,
    state: Option<PodSandboxState>,
    labels: Vec<(String, String)>,
) -> Result<()> {
    let filter = PodSandboxFilter {
        state,
        label_selector: labels.into_iter().collect::<HashMap<_, _>>(),
        ..Default::default()
    };
    let response = service
        .list_pod_sandbox(
            cancel,
            ListPodSandboxRequest {
                filter: Some(filter),
            },
        )
        .await?;

    print!("{}", format_table(&response.items));
    Ok(())
}

// -----------------------------------------------------------------------------
// Formatting
// -----------------------------------------------------------------------------

fn format_table(items: &[PodSandbox]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        &mut out,
        "{}",
        format!(
            "{:<15}{:<25}{:<18}{:<25}{:<18}{}",
            "POD ID", "CREATED", "STATE", "NAME", "NAMESPACE", "ATTEMPT"
        )
        .bold()
    );
    for pod in items {
        let state = format!("{:<18}", pod.state.to_string());
        let state = match pod.state {
            PodSandboxState::Ready => state.green(),
            PodSandboxState::NotReady => state.red(),
        };
        let _ = writeln!(
            &mut out,
            "{:<15}{:<25}{}{:<25}{:<18}{}",
            short_id(&pod.id),
            format_timestamp(pod.created_at),
            state,
            pod.metadata.name,
            pod.metadata.namespace,
            pod.metadata.attempt
        );
    }
    out
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
