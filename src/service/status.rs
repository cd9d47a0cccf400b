//! Translation from engine records to API status records.
//!
//! Everything here is pure: no engine calls, no clock. The handlers fetch the
//! engine records and hand them over.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::{
    Container, ContainerFilter, ContainerState, ContainerStatus, ImageSpec, Mount,
    MountPropagation, PodSandbox, PodSandboxFilter, PodSandboxState, PodSandboxStatus,
};
use crate::engine::{
    ContainerInspect, ContainerSummary, EngineMount, EngineState, EngineStatus, ImageInspect,
};
use crate::error::Result;
use crate::labels::{LabelMetadata, ObjectRole};
use crate::naming::NativeName;

pub const DOCKER_IMAGE_ID_PREFIX: &str = "docker://";
pub const DOCKER_PULLABLE_IMAGE_ID_PREFIX: &str = "docker-pullable://";

pub const REASON_COMPLETED: &str = "Completed";
pub const REASON_ERROR: &str = "Error";
pub const REASON_OOM_KILLED: &str = "OOMKilled";
pub const REASON_CANNOT_RUN: &str = "ContainerCannotRun";

/// Outcome of classifying an engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub state: ContainerState,
    pub reason: &'static str,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Maps an engine state onto the container state machine.
///
/// First match wins:
/// 1. restarting: `Unknown`
/// 2. running: `Running`
/// 3. finish time set, or engine says exited: `Exited` with `OOMKilled`,
///    `Completed` (exit 0) or `Error`
/// 4. non-zero exit code without a finish time: the process never ran;
///    `Exited` with `ContainerCannotRun` and both times pinned to `created`
/// 5. engine says created: `Created`
/// 6. anything else: `Unknown`
pub fn classify(state: &EngineState, created: Option<DateTime<Utc>>) -> Classified {
    let mut out = Classified {
        state: ContainerState::Unknown,
        reason: "",
        started_at: state.started_at,
        finished_at: state.finished_at,
    };

    if state.restarting {
        return out;
    }
    if state.running {
        out.state = ContainerState::Running;
        return out;
    }
    if state.finished_at.is_some() || state.status == EngineStatus::Exited {
        out.state = ContainerState::Exited;
        out.reason = if state.oom_killed {
            REASON_OOM_KILLED
        } else if state.exit_code == 0 {
            REASON_COMPLETED
        } else {
            REASON_ERROR
        };
        return out;
    }
    if state.exit_code != 0 {
        out.state = ContainerState::Exited;
        out.reason = REASON_CANNOT_RUN;
        out.started_at = created;
        out.finished_at = created;
        return out;
    }
    if state.status == EngineStatus::Created {
        out.state = ContainerState::Created;
    }
    out
}

/// Nanoseconds since the Unix epoch; unset times are zero.
pub fn to_nanos(time: Option<DateTime<Utc>>) -> i64 {
    time.and_then(|t| t.timestamp_nanos_opt()).unwrap_or(0)
}

/// Image reference reported back to the orchestrator.
pub fn image_ref(image_id: &str, image: Option<&ImageInspect>) -> String {
    match image.and_then(|i| i.repo_digests.first()) {
        Some(digest) => format!("{DOCKER_PULLABLE_IMAGE_ID_PREFIX}{digest}"),
        None => format!("{DOCKER_IMAGE_ID_PREFIX}{image_id}"),
    }
}

fn to_api_mount(mount: &EngineMount) -> Mount {
    let propagation = match mount.propagation.as_str() {
        "rshared" | "shared" => MountPropagation::Bidirectional,
        "rslave" | "slave" => MountPropagation::HostToContainer,
        _ => MountPropagation::Private,
    };
    Mount {
        container_path: mount.destination.clone(),
        host_path: mount.source.clone(),
        readonly: !mount.rw,
        selinux_relabel: false,
        propagation,
    }
}

/// Builds the full status of a container from its inspection record and,
/// when known, the image it runs.
pub fn container_status(
    inspect: &ContainerInspect,
    image: Option<&ImageInspect>,
) -> Result<ContainerStatus> {
    let name = NativeName::decode(&inspect.name)?;
    let meta = LabelMetadata::from_labels(&inspect.labels);
    let classified = classify(&inspect.state, inspect.created);

    let image_name = image
        .and_then(|i| i.repo_tags.first())
        .cloned()
        .unwrap_or_else(|| inspect.config_image.clone());
    let message = if inspect.state.running {
        String::new()
    } else {
        inspect.state.error.clone()
    };

    Ok(ContainerStatus {
        id: inspect.id.clone(),
        metadata: name.container_metadata(),
        state: classified.state,
        created_at: to_nanos(inspect.created),
        started_at: to_nanos(classified.started_at),
        finished_at: to_nanos(classified.finished_at),
        exit_code: i32::try_from(inspect.state.exit_code).unwrap_or(-1),
        image: ImageSpec::new(image_name),
        image_ref: image_ref(&inspect.image, image),
        reason: classified.reason.to_string(),
        message,
        labels: meta.labels,
        annotations: meta.annotations,
        mounts: inspect.mounts.iter().map(to_api_mount).collect(),
        log_path: meta.log_path,
    })
}

fn summary_state(status: EngineStatus) -> ContainerState {
    match status {
        EngineStatus::Created => ContainerState::Created,
        EngineStatus::Running => ContainerState::Running,
        EngineStatus::Exited => ContainerState::Exited,
        _ => ContainerState::Unknown,
    }
}

/// Projects a listing entry, or `None` if it is not one of our containers.
pub fn to_container(summary: &ContainerSummary) -> Option<Container> {
    let meta = LabelMetadata::from_labels(&summary.labels);
    if !meta.is_ours(ObjectRole::Container) {
        return None;
    }
    let name = match NativeName::decode(&summary.name) {
        Ok(name) => name,
        Err(e) => {
            debug!(id = %summary.id, error = %e, "Skipping container with undecodable name");
            return None;
        }
    };

    Some(Container {
        id: summary.id.clone(),
        pod_sandbox_id: meta.sandbox_id,
        metadata: name.container_metadata(),
        image: ImageSpec::new(summary.image.clone()),
        image_ref: summary.image_id.clone(),
        state: summary_state(summary.status),
        created_at: to_nanos(summary.created),
        labels: meta.labels,
        annotations: meta.annotations,
    })
}

fn labels_match(
    labels: &std::collections::HashMap<String, String>,
    selector: &std::collections::HashMap<String, String>,
) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// True when `container` passes every non-empty field of `filter`.
pub fn container_matches(container: &Container, filter: &ContainerFilter) -> bool {
    container.id.starts_with(&filter.id)
        && (filter.pod_sandbox_id.is_empty() || container.pod_sandbox_id == filter.pod_sandbox_id)
        && filter.state.map_or(true, |state| container.state == state)
        && labels_match(&container.labels, &filter.label_selector)
}

/// Projects, filters and orders an engine listing, newest first.
pub fn list_containers(summaries: &[ContainerSummary], filter: &ContainerFilter) -> Vec<Container> {
    let mut containers: Vec<Container> = summaries
        .iter()
        .filter_map(to_container)
        .filter(|c| container_matches(c, filter))
        .collect();
    containers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    containers
}

/// Builds the status of a sandbox from its infra object's inspection record.
pub fn sandbox_status(inspect: &ContainerInspect) -> Result<PodSandboxStatus> {
    let name = NativeName::decode(&inspect.name)?;
    let meta = LabelMetadata::from_labels(&inspect.labels);
    let state = if inspect.state.running {
        PodSandboxState::Ready
    } else {
        PodSandboxState::NotReady
    };

    Ok(PodSandboxStatus {
        id: inspect.id.clone(),
        metadata: name.sandbox_metadata(),
        state,
        created_at: to_nanos(inspect.created),
        labels: meta.labels,
        annotations: meta.annotations,
    })
}

/// Projects a listing entry, or `None` if it is not one of our sandboxes.
pub fn to_pod_sandbox(summary: &ContainerSummary) -> Option<PodSandbox> {
    let meta = LabelMetadata::from_labels(&summary.labels);
    if !meta.is_ours(ObjectRole::Sandbox) {
        return None;
    }
    let name = NativeName::decode(&summary.name)
        .inspect_err(|e| debug!(id = %summary.id, error = %e, "Skipping sandbox with undecodable name"))
        .ok()?;

    let state = if summary.status == EngineStatus::Running {
        PodSandboxState::Ready
    } else {
        PodSandboxState::NotReady
    };
    Some(PodSandbox {
        id: summary.id.clone(),
        metadata: name.sandbox_metadata(),
        state,
        created_at: to_nanos(summary.created),
        labels: meta.labels,
        annotations: meta.annotations,
    })
}

/// Projects, filters and orders a sandbox listing, newest first.
pub fn list_pod_sandboxes(
    summaries: &[ContainerSummary],
    filter: &PodSandboxFilter,
) -> Vec<PodSandbox> {
    let mut items: Vec<PodSandbox> = summaries
        .iter()
        .filter_map(to_pod_sandbox)
        .filter(|s| {
            s.id.starts_with(&filter.id)
                && filter.state.map_or(true, |state| s.state == state)
                && labels_match(&s.labels, &filter.label_selector)
        })
        .collect();
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::CONTAINER_TYPE_LABEL_KEY;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(secs, 0).single()
    }

    #[test]
    fn test_classify_created() {
        let state = EngineState {
            status: EngineStatus::Created,
            ..Default::default()
        };
        let c = classify(&state, at(1));
        assert_eq!(c.state, ContainerState::Created);
        assert_eq!(c.reason, "");
    }

    #[test]
    fn test_classify_running() {
        let state = EngineState {
            status: EngineStatus::Running,
            running: true,
            started_at: at(2),
            ..Default::default()
        };
        assert_eq!(classify(&state, at(1)).state, ContainerState::Running);
    }

    #[test]
    fn test_classify_restarting_is_unknown() {
        let state = EngineState {
            status: EngineStatus::Restarting,
            running: true,
            restarting: true,
            ..Default::default()
        };
        assert_eq!(classify(&state, at(1)).state, ContainerState::Unknown);
    }

    #[test]
    fn test_classify_exit_reasons() {
        let mut state = EngineState {
            status: EngineStatus::Exited,
            finished_at: at(3),
            ..Default::default()
        };
        assert_eq!(classify(&state, None).reason, REASON_COMPLETED);

        state.exit_code = 137;
        assert_eq!(classify(&state, None).reason, REASON_ERROR);

        state.oom_killed = true;
        let c = classify(&state, None);
        assert_eq!(c.state, ContainerState::Exited);
        assert_eq!(c.reason, REASON_OOM_KILLED);
    }

    #[test]
    fn test_classify_never_ran() {
        let state = EngineState {
            status: EngineStatus::Created,
            exit_code: 127,
            error: "executable file not found".to_string(),
            ..Default::default()
        };
        let c = classify(&state, at(5));
        assert_eq!(c.state, ContainerState::Exited);
        assert_eq!(c.reason, REASON_CANNOT_RUN);
        assert_eq!(c.started_at, at(5));
        assert_eq!(c.finished_at, at(5));
    }

    #[test]
    fn test_classify_other_states_are_unknown() {
        for status in [EngineStatus::Paused, EngineStatus::Dead, EngineStatus::Unknown] {
            let state = EngineState {
                status,
                ..Default::default()
            };
            assert_eq!(classify(&state, None).state, ContainerState::Unknown);
        }
    }

    #[test]
    fn test_to_nanos() {
        assert_eq!(to_nanos(None), 0);
        assert_eq!(to_nanos(at(1)), 1_000_000_000);
    }

    #[test]
    fn test_image_ref() {
        assert_eq!(image_ref("sha256:abc", None), "docker://sha256:abc");

        let image = ImageInspect {
            id: "sha256:abc".to_string(),
            repo_tags: vec!["busybox:latest".to_string()],
            repo_digests: vec!["busybox@sha256:def".to_string()],
        };
        assert_eq!(
            image_ref("sha256:abc", Some(&image)),
            "docker-pullable://busybox@sha256:def"
        );
    }

    fn summary(id: &str, name: &str, created: i64, role: Option<&str>) -> ContainerSummary {
        let mut labels = HashMap::new();
        if let Some(role) = role {
            labels.insert(CONTAINER_TYPE_LABEL_KEY.to_string(), role.to_string());
        }
        ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            image: "busybox".to_string(),
            created: at(created),
            status: EngineStatus::Running,
            labels,
            ..Default::default()
        }
    }

    #[test]
    fn test_list_containers_skips_foreign_and_undecodable() {
        let summaries = vec![
            summary("a", "/k8s_web_pod_ns_uid_0", 1, Some("container")),
            summary("b", "/unrelated", 2, None),
            summary("c", "/bogus", 3, Some("container")),
            summary("d", "/k8s_POD_pod_ns_uid_0", 4, Some("podsandbox")),
        ];
        let listed = list_containers(&summaries, &ContainerFilter::default());
        let ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(listed[0].metadata.name, "web");
    }

    #[test]
    fn test_list_containers_sorts_newest_first_and_filters() {
        let summaries = vec![
            summary("old", "/k8s_a_pod_ns_uid_0", 1, Some("container")),
            summary("new", "/k8s_b_pod_ns_uid_0", 9, Some("container")),
            summary("mid", "/k8s_c_pod_ns_uid_0", 5, Some("container")),
        ];
        let listed = list_containers(&summaries, &ContainerFilter::default());
        let ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let filter = ContainerFilter {
            id: "mi".to_string(),
            ..Default::default()
        };
        assert_eq!(list_containers(&summaries, &filter).len(), 1);

        let filter = ContainerFilter {
            state: Some(ContainerState::Exited),
            ..Default::default()
        };
        assert!(list_containers(&summaries, &filter).is_empty());
    }

    #[test]
    fn test_list_pod_sandboxes() {
        let mut stopped = summary("s2", "/k8s_POD_two_ns_uid2_0", 2, Some("podsandbox"));
        stopped.status = EngineStatus::Exited;
        let summaries = vec![
            summary("s1", "/k8s_POD_one_ns_uid1_0", 1, Some("podsandbox")),
            stopped,
            summary("c1", "/k8s_web_one_ns_uid1_0", 3, Some("container")),
        ];

        let all = list_pod_sandboxes(&summaries, &PodSandboxFilter::default());
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
        assert_eq!(all[1].metadata.name, "one");

        let ready = PodSandboxFilter {
            state: Some(PodSandboxState::Ready),
            ..Default::default()
        };
        let ids: Vec<_> = list_pod_sandboxes(&summaries, &ready)
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["s1"]);
    }
}
