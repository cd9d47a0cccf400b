//! In-memory engine for tests.
//!
//! Behaves like a small Docker daemon: it enforces unique names with
//! Docker's own conflict message, stamps timestamps from an injectable clock,
//! records every call, and can be told to fail the next call of a given kind.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    ContainerInspect, ContainerSummary, CreateContainerSpec, Engine, EngineError, EngineMount,
    EngineState, EngineStatus, ImageInspect, ListFilter,
};
use crate::clock::{Clock, SystemClock};

/// A fake engine. Clones share state.
#[derive(Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Default)]
struct FakeState {
    /// Insertion order doubles as creation order.
    containers: Vec<ContainerInspect>,
    images: Vec<ImageInspect>,
    injected: HashMap<String, EngineError>,
    calls: Vec<String>,
    pulled: Vec<String>,
}

impl FakeState {
    fn find(&self, id: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == id || (!id.is_empty() && c.id.starts_with(id)))
    }

    fn record(&mut self, call: &str) -> Result<(), EngineError> {
        self.calls.push(call.to_string());
        match self.injected.remove(call) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn no_such_container(id: &str) -> EngineError {
    EngineError::not_found(format!("No such container: {id}"))
}

impl FakeEngine {
    /// Creates an empty engine using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty engine stamping times from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next call named `call` fail with `err`.
    ///
    /// Call names: `create`, `start`, `stop`, `remove`, `inspect_container`,
    /// `list`, `inspect_image`, `pull`.
    pub fn inject_error(&self, call: &str, err: EngineError) {
        self.lock().injected.insert(call.to_string(), err);
    }

    /// Adds images to the local store.
    pub fn inject_images(&self, images: Vec<ImageInspect>) {
        self.lock().images.extend(images);
    }

    /// Adds an object that this shim did not create.
    pub fn inject_container(&self, container: ContainerInspect) {
        self.lock().containers.push(container);
    }

    /// Overrides where the engine claims to write an object's log.
    pub fn set_log_path(&self, id: &str, path: &str) {
        let mut state = self.lock();
        if let Some(i) = state.find(id) {
            state.containers[i].log_path = path.to_string();
        }
    }

    /// Names of all calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Images pulled so far.
    pub fn pulled(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    /// Number of objects currently known to the engine.
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FakeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeEngine")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String, EngineError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.record("create")?;

        let name = format!("/{}", spec.name);
        if let Some(existing) = state.containers.iter().find(|c| c.name == name) {
            return Err(EngineError::daemon(format!(
                "Conflict. The container name \"{name}\" is already in use by container \"{}\". \
                 You have to remove (or rename) that container to be able to reuse that name.",
                existing.id
            )));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let mounts = spec
            .binds
            .iter()
            .filter_map(|bind| {
                let mut parts = bind.split(':');
                let source = parts.next()?.to_string();
                let destination = parts.next()?.to_string();
                let options = parts.next().unwrap_or("");
                Some(EngineMount {
                    source,
                    destination,
                    rw: !options.split(',').any(|o| o == "ro"),
                    propagation: options
                        .split(',')
                        .find(|o| o.contains("private") || o.contains("shared") || o.contains("slave"))
                        .unwrap_or("")
                        .to_string(),
                })
            })
            .collect();

        state.containers.push(ContainerInspect {
            id: id.clone(),
            name,
            image: spec.image.clone(),
            config_image: spec.image.clone(),
            created: Some(now),
            state: EngineState {
                status: EngineStatus::Created,
                ..Default::default()
            },
            labels: spec.labels.clone(),
            log_path: format!("/var/lib/docker/containers/{id}/{id}-json.log"),
            mounts,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.record("start")?;
        let i = state.find(id).ok_or_else(|| no_such_container(id))?;

        let container = &mut state.containers[i];
        container.state.status = EngineStatus::Running;
        container.state.running = true;
        container.state.started_at = Some(now);
        container.state.finished_at = None;
        container.state.exit_code = 0;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), EngineError> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.record("stop")?;
        let i = state.find(id).ok_or_else(|| no_such_container(id))?;

        let container = &mut state.containers[i];
        if container.state.running {
            container.state.status = EngineStatus::Exited;
            container.state.running = false;
            container.state.finished_at = Some(now);
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.record("remove")?;
        let i = state.find(id).ok_or_else(|| no_such_container(id))?;

        if state.containers[i].state.running && !force {
            return Err(EngineError::daemon(format!(
                "You cannot remove a running container {id}. Stop the container before \
                 attempting removal or force remove"
            )));
        }
        state.containers.remove(i);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, EngineError> {
        let mut state = self.lock();
        state.record("inspect_container")?;
        let i = state.find(id).ok_or_else(|| no_such_container(id))?;
        Ok(state.containers[i].clone())
    }

    async fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut state = self.lock();
        state.record("list")?;

        // Newest first, like Docker.
        Ok(state
            .containers
            .iter()
            .rev()
            .filter(|c| {
                filter
                    .labels
                    .iter()
                    .all(|(k, v)| c.labels.get(k) == Some(v))
            })
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.config_image.clone(),
                image_id: String::new(),
                created: c.created,
                status: c.state.status,
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, EngineError> {
        let mut state = self.lock();
        state.record("inspect_image")?;
        state
            .images
            .iter()
            .find(|image| image.id == reference || image.repo_tags.iter().any(|t| t == reference))
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("No such image: {reference}")))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.record("pull")?;
        state.pulled.push(reference.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::Utc;

    fn spec(name: &str) -> CreateContainerSpec {
        CreateContainerSpec {
            name: name.to_string(),
            image: "busybox".to_string(),
            binds: vec!["/host:/data:ro".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle_stamps_times_from_clock() {
        let clock = FakeClock::new(Utc::now());
        let engine = FakeEngine::with_clock(Arc::new(clock.clone()));

        let id = engine.create_container(&spec("a")).await.unwrap();
        let created = clock.now();
        clock.step(chrono::Duration::seconds(5));
        engine.start_container(&id).await.unwrap();
        let started = clock.now();
        clock.step(chrono::Duration::seconds(5));
        engine.stop_container(&id, Duration::ZERO).await.unwrap();

        let inspect = engine.inspect_container(&id).await.unwrap();
        assert_eq!(inspect.name, "/a");
        assert_eq!(inspect.created, Some(created));
        assert_eq!(inspect.state.started_at, Some(started));
        assert_eq!(inspect.state.finished_at, Some(clock.now()));
        assert_eq!(inspect.state.status, EngineStatus::Exited);
        assert!(!inspect.mounts[0].rw);
        assert!(inspect.log_path.ends_with("-json.log"));
    }

    #[tokio::test]
    async fn test_duplicate_name_reports_conflict() {
        let engine = FakeEngine::new();
        let id = engine.create_container(&spec("dup")).await.unwrap();
        let err = engine.create_container(&spec("dup")).await.unwrap_err();
        assert!(err.to_string().contains("is already in use by container"));
        assert!(err.to_string().contains(&id));
    }

    #[tokio::test]
    async fn test_injected_error_fires_once() {
        let engine = FakeEngine::new();
        engine.inject_error("create", EngineError::daemon("random error"));

        assert!(engine.create_container(&spec("x")).await.is_err());
        assert!(engine.create_container(&spec("x")).await.is_ok());
        assert_eq!(engine.calls(), vec!["create", "create"]);
    }

    #[tokio::test]
    async fn test_remove_missing_container() {
        let engine = FakeEngine::new();
        let err = engine.remove_container("nope", true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_by_label_newest_first() {
        let engine = FakeEngine::new();
        let mut first = spec("first");
        first.labels.insert("role".to_string(), "x".to_string());
        let mut second = spec("second");
        second.labels.insert("role".to_string(), "x".to_string());

        engine.create_container(&first).await.unwrap();
        engine.create_container(&spec("other")).await.unwrap();
        engine.create_container(&second).await.unwrap();

        let listed = engine
            .list_containers(&ListFilter::label("role", "x"))
            .await
            .unwrap();
        let names: Vec<_> = listed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["/second", "/first"]);
    }
}
