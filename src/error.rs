//! Domain-specific error types for shim operations.
//!
//! Typed errors let the caller tell a missing object from an engine failure
//! without parsing message strings. Name conflicts never appear here: they are
//! recovered from inside `CreateContainer`, and a failed recovery surfaces the
//! original engine error.

use std::path::PathBuf;

use crate::engine::EngineError;

/// Convenience alias used across the crate.
pub type Result<T, E = ShimError> = std::result::Result<T, E>;

/// Errors returned by runtime service operations.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// No sandbox or container with the given ID exists.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// An engine name could not be decoded into its logical identity.
    #[error("malformed name {name:?}: {reason}")]
    MalformedName { name: String, reason: String },

    /// A caller label cannot be stored without losing information.
    #[error("invalid label {key:?}: {reason}")]
    InvalidLabel { key: String, reason: String },

    /// The engine rejected or failed an operation.
    #[error("failed to {operation} {target}: {source}")]
    Engine {
        operation: &'static str,
        target: String,
        #[source]
        source: EngineError,
    },

    /// A log symlink could not be created or removed.
    #[error("failed to {operation} {}: {source}", path.display())]
    Filesystem {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The caller cancelled the request before the engine answered.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ShimError {
    /// Creates a `NotFound` error for a container.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "container",
            id: id.into(),
        }
    }

    /// Creates a `NotFound` error for a pod sandbox.
    pub fn sandbox_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "pod sandbox",
            id: id.into(),
        }
    }

    /// Creates a `MalformedName` error.
    pub fn malformed_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidLabel` error.
    pub fn invalid_label(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLabel {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an engine error with the operation and target it came from.
    pub fn engine(operation: &'static str, target: impl Into<String>, source: EngineError) -> Self {
        Self::Engine {
            operation,
            target: target.into(),
            source,
        }
    }

    /// Wraps a filesystem error with the path it concerned.
    pub fn filesystem(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Filesystem {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Creates a `Cancelled` error.
    pub fn cancelled(operation: &'static str) -> Self {
        Self::Cancelled { operation }
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true if this is a filesystem error.
    pub fn is_filesystem(&self) -> bool {
        matches!(self, Self::Filesystem { .. })
    }

    /// Returns the underlying engine error, if any.
    pub fn engine_source(&self) -> Option<&EngineError> {
        match self {
            Self::Engine { source, .. } => Some(source),
            _ => None,
        }
    }
}
