//! Pod sandbox and container lifecycle over a container engine.
//!
//! [`RuntimeService`] is the shim itself. Each request handler:
//! - builds engine calls from the naming codec and label store,
//! - runs every engine call as its own task raced against the caller's
//!   cancellation token,
//! - keeps the cleanup table in step with the log symlinks it creates.
//!
//! Sandbox operations live in `sandbox`, container operations in `container`,
//! and the pure engine-to-API translation in `status`.

mod conflict;
mod container;
mod sandbox;
pub mod status;

pub use conflict::conflicting_container_id;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cleanup::CleanupTable;
use crate::config::Config;
use crate::engine::{CreateContainerSpec, Engine, EngineError};
use crate::error::{Result, ShimError};
use crate::naming;
use crate::os::Filesystem;

/// Tunables of the runtime service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Image run by every sandbox infra object.
    pub pause_image: String,
    /// Grace period when stopping a sandbox.
    pub sandbox_stop_grace: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RuntimeSettings {
    fn from(config: &Config) -> Self {
        Self {
            pause_image: config.sandbox.pause_image.clone(),
            sandbox_stop_grace: Duration::from_secs(config.sandbox.stop_grace_secs),
        }
    }
}

/// The pod runtime shim.
pub struct RuntimeService {
    engine: Arc<dyn Engine>,
    fs: Arc<dyn Filesystem>,
    cleanup: CleanupTable,
    settings: RuntimeSettings,
}

impl RuntimeService {
    /// Creates a service over the given engine and filesystem.
    pub fn new(
        engine: Arc<dyn Engine>,
        fs: Arc<dyn Filesystem>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            engine,
            fs,
            cleanup: CleanupTable::new(),
            settings,
        }
    }

    /// Cleanup bookkeeping for started containers.
    pub fn cleanup_table(&self) -> &CleanupTable {
        &self.cleanup
    }

    /// Service settings.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Runs one engine call as a separate task and waits for it or for
    /// cancellation, whichever comes first.
    ///
    /// A cancelled call keeps running in the background; its result is
    /// dropped. The outer error is only ever `Cancelled`.
    async fn dispatch<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        call: F,
    ) -> Result<std::result::Result<T, EngineError>>
    where
        F: FnOnce(Arc<dyn Engine>) -> Fut,
        Fut: Future<Output = std::result::Result<T, EngineError>> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ShimError::cancelled(operation));
        }

        let task = tokio::spawn(call(Arc::clone(&self.engine)));
        tokio::select! {
            joined = task => Ok(joined.unwrap_or_else(|e| {
                Err(EngineError::unavailable(format!("engine call aborted: {e}")))
            })),
            () = cancel.cancelled() => {
                warn!(operation, "Request cancelled while waiting for the engine");
                Err(ShimError::cancelled(operation))
            }
        }
    }

    async fn create_once(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        spec: CreateContainerSpec,
    ) -> Result<std::result::Result<String, EngineError>> {
        self.dispatch(cancel, operation, move |engine| async move {
            engine.create_container(&spec).await
        })
        .await
    }

    /// Creates an engine object, recovering once from a stale-name conflict.
    ///
    /// On conflict the stale object is removed. If that succeeds, or the object
    /// is already gone, the create is retried once under a randomized name,
    /// since the daemon may still hold the original one. Whenever recovery does
    /// not end in a successful create, the original error is returned.
    async fn create_with_conflict_recovery(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        spec: CreateContainerSpec,
    ) -> Result<String> {
        let name = spec.name.clone();
        let original = match self.create_once(cancel, operation, spec.clone()).await? {
            Ok(id) => return Ok(id),
            Err(err) => err,
        };

        let Some(stale_id) = conflicting_container_id(&original.to_string()).map(str::to_string)
        else {
            return Err(ShimError::engine("create", name, original));
        };

        warn!(name = %name, stale_id = %stale_id, "Name conflict on create, removing stale container");
        let target = stale_id.clone();
        let removed = self
            .dispatch(cancel, operation, move |engine| async move {
                engine.remove_container(&target, true).await
            })
            .await?;

        match removed {
            Ok(()) => info!(stale_id = %stale_id, "Removed conflicting container"),
            Err(err) if err.is_not_found() => {
                info!(stale_id = %stale_id, "Conflicting container already gone");
            }
            Err(err) => {
                warn!(stale_id = %stale_id, error = %err, "Failed to remove conflicting container");
                return Err(ShimError::engine("create", name, original));
            }
        }

        let retry = CreateContainerSpec {
            name: naming::randomize(&name),
            ..spec
        };
        info!(name = %retry.name, "Retrying create under a randomized name");
        match self.create_once(cancel, operation, retry).await? {
            Ok(id) => Ok(id),
            Err(err) => {
                warn!(name = %name, error = %err, "Create retry after conflict failed");
                Err(ShimError::engine("create", name, original))
            }
        }
    }
}

impl std::fmt::Debug for RuntimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeService")
            .field("cleanup", &self.cleanup)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FakeEngine;
    use crate::os::FakeFs;

    fn service(engine: &FakeEngine) -> RuntimeService {
        RuntimeService::new(
            Arc::new(engine.clone()),
            Arc::new(FakeFs::new()),
            RuntimeSettings::default(),
        )
    }

    fn spec(name: &str) -> CreateContainerSpec {
        CreateContainerSpec {
            name: name.to_string(),
            image: "busybox".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_refuses_when_already_cancelled() {
        let engine = FakeEngine::new();
        let svc = service(&engine);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = svc
            .create_once(&cancel, "CreateContainer", spec("k8s_a_b_c_d_0"))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_with_live_stale_object_is_replaced() {
        let engine = FakeEngine::new();
        let svc = service(&engine);
        let cancel = CancellationToken::new();

        let stale = svc
            .create_with_conflict_recovery(&cancel, "CreateContainer", spec("k8s_a_b_c_d_0"))
            .await
            .unwrap();
        let fresh = svc
            .create_with_conflict_recovery(&cancel, "CreateContainer", spec("k8s_a_b_c_d_0"))
            .await
            .unwrap();

        assert_ne!(stale, fresh);
        assert_eq!(engine.calls(), vec!["create", "create", "remove", "create"]);
        assert_eq!(engine.container_count(), 1);

        let inspect = engine.inspect_container(&fresh).await.unwrap();
        assert!(inspect.name.starts_with("/k8s_a_b_c_d_0_"));
    }

    #[tokio::test]
    async fn test_non_conflict_error_is_not_retried() {
        let engine = FakeEngine::new();
        let svc = service(&engine);
        engine.inject_error("create", EngineError::daemon("random error"));

        let err = svc
            .create_with_conflict_recovery(
                &CancellationToken::new(),
                "CreateContainer",
                spec("k8s_a_b_c_d_0"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.engine_source().unwrap().to_string(), "random error");
        assert_eq!(engine.calls(), vec!["create"]);
    }
}
