//! Container engine seam.
//!
//! The shim talks to the engine only through [`Engine`], using engine-neutral
//! records. [`DockerEngine`] drives a real Docker daemon via bollard;
//! [`FakeEngine`] keeps everything in memory for tests.

mod docker;
mod fake;

pub use docker::DockerEngine;
pub use fake::FakeEngine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Errors reported by an engine client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The referenced object does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The daemon answered with an error. The message is kept verbatim since
    /// some failures are only recognisable by their text.
    #[error("{0}")]
    Daemon(String),

    /// The daemon could not be reached or its answer could not be read.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Creates a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a `Daemon` error.
    pub fn daemon(message: impl Into<String>) -> Self {
        Self::Daemon(message.into())
    }

    /// Creates an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// True when the error says the object does not exist.
    ///
    /// Older daemons only say so in the message text.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Daemon(message) => {
                message.contains("No such container") || message.contains("No such image")
            }
            Self::Unavailable(_) => false,
        }
    }
}

/// A host port published for a container port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: i32,
    /// `tcp`, `udp` or `sctp`.
    pub protocol: String,
    pub host_ip: String,
    pub host_port: i32,
}

/// Everything needed to create one engine object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub working_dir: String,
    pub labels: HashMap<String, String>,
    /// Docker bind strings, `host:container[:options]`.
    pub binds: Vec<String>,
    pub port_bindings: Vec<PortBinding>,
    /// Empty for the engine default.
    pub network_mode: String,
    pub ipc_mode: String,
    pub tty: bool,
    pub open_stdin: bool,
    pub stdin_once: bool,
}

/// Coarse engine status of an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    #[default]
    Unknown,
}

impl EngineStatus {
    /// Parses the engine's status word (`running`, `exited`, ...).
    pub fn from_status(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

/// Runtime state flags reported by inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineState {
    pub status: EngineStatus,
    pub running: bool,
    pub restarting: bool,
    pub oom_killed: bool,
    pub exit_code: i64,
    /// Engine-side error message, e.g. why the process could not start.
    pub error: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A mount as the engine reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineMount {
    pub source: String,
    pub destination: String,
    pub rw: bool,
    pub propagation: String,
}

/// Full inspection record of one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInspect {
    pub id: String,
    /// Engine name; Docker prefixes it with `/`.
    pub name: String,
    /// Image ID the object runs.
    pub image: String,
    /// Image reference the object was created from.
    pub config_image: String,
    pub created: Option<DateTime<Utc>>,
    pub state: EngineState,
    pub labels: HashMap<String, String>,
    /// Where the engine writes the object's log. Empty if unknown.
    pub log_path: String,
    pub mounts: Vec<EngineMount>,
}

/// Listing entry for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub image_id: String,
    pub created: Option<DateTime<Utc>>,
    pub status: EngineStatus,
    pub labels: HashMap<String, String>,
}

/// Inspection record of an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInspect {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub repo_digests: Vec<String>,
}

/// Filter applied by the engine when listing. Every label must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub labels: HashMap<String, String>,
}

impl ListFilter {
    /// Filter on a single label.
    pub fn label(key: &str, value: &str) -> Self {
        Self {
            labels: HashMap::from([(key.to_string(), value.to_string())]),
        }
    }
}

/// Generic container engine client. Implementations must be safe to share
/// between concurrent requests.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Creates an object and returns its engine-assigned ID.
    async fn create_container(&self, spec: &CreateContainerSpec) -> Result<String, EngineError>;

    /// Starts a created object.
    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Stops a running object, killing it after `timeout`. Stopping an
    /// already-stopped object succeeds.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), EngineError>;

    /// Removes an object and its anonymous volumes.
    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// Returns the full inspection record of an object.
    async fn inspect_container(&self, id: &str) -> Result<ContainerInspect, EngineError>;

    /// Lists all objects, running or not, that match `filter`.
    async fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Inspects an image by ID or reference.
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect, EngineError>;

    /// Pulls an image into the local store.
    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;
}
