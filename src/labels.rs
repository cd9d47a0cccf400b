//! Structured metadata carried in engine labels.
//!
//! The engine only offers a flat string map per object. [`LabelMetadata`] is
//! the typed view of that map: which role the object plays, the sandbox it
//! belongs to, where its log symlink goes, plus the caller's own labels and
//! annotations.
//!
//! Annotations share the flat map under the `annotation.` prefix, so a caller
//! label with that prefix, or one named like a reserved key, would not read
//! back as written. [`check_caller_labels`] turns those away at create time.

use std::collections::HashMap;

use crate::error::{Result, ShimError};

/// Marks an object as created by this shim and records its role.
pub const CONTAINER_TYPE_LABEL_KEY: &str = "io.kubernetes.docker.type";

/// Role value for sandbox infra objects.
pub const CONTAINER_TYPE_LABEL_SANDBOX: &str = "podsandbox";

/// Role value for application containers.
pub const CONTAINER_TYPE_LABEL_CONTAINER: &str = "container";

/// ID of the sandbox that owns a container.
pub const SANDBOX_ID_LABEL_KEY: &str = "io.kubernetes.sandbox.id";

/// Fully qualified path of the container log symlink.
pub const CONTAINER_LOG_PATH_LABEL_KEY: &str = "io.kubernetes.container.logpath";

/// Prefix under which caller annotations are stored.
pub const ANNOTATION_PREFIX: &str = "annotation.";

const INTERNAL_LABEL_KEYS: &[&str] = &[
    CONTAINER_TYPE_LABEL_KEY,
    SANDBOX_ID_LABEL_KEY,
    CONTAINER_LOG_PATH_LABEL_KEY,
];

/// Role recorded in the type label.
/// Rejects caller labels that would not survive a write and read back.
pub fn check_caller_labels(labels: &HashMap<String, String>) -> Result<()> {
    for key in labels.keys() {
        if key.starts_with(ANNOTATION_PREFIX) {
            return Err(ShimError::invalid_label(
                key,
                format!("the {ANNOTATION_PREFIX:?} prefix is reserved for annotations"),
            ));
        }
        if INTERNAL_LABEL_KEYS.contains(&key.as_str()) {
            return Err(ShimError::invalid_label(key, "reserved for runtime metadata"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRole {
    Sandbox,
    Container,
}

impl ObjectRole {
    /// Label value for this role.
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Sandbox => CONTAINER_TYPE_LABEL_SANDBOX,
            Self::Container => CONTAINER_TYPE_LABEL_CONTAINER,
        }
    }

    fn from_label(value: &str) -> Option<Self> {
        match value {
            CONTAINER_TYPE_LABEL_SANDBOX => Some(Self::Sandbox),
            CONTAINER_TYPE_LABEL_CONTAINER => Some(Self::Container),
            _ => None,
        }
    }
}

/// Typed view of an object's label set.
///
/// Reading never fails: a missing key reads as `None` or an empty string, so
/// objects created by someone else simply come back without a role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMetadata {
    pub role: Option<ObjectRole>,
    /// Owning sandbox. Empty for sandboxes themselves.
    pub sandbox_id: String,
    /// Expected log symlink path. Empty when the caller asked for no log.
    pub log_path: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

impl LabelMetadata {
    /// Metadata for a sandbox infra object.
    pub fn sandbox(
        labels: &HashMap<String, String>,
        annotations: &HashMap<String, String>,
    ) -> Self {
        Self {
            role: Some(ObjectRole::Sandbox),
            labels: labels.clone(),
            annotations: annotations.clone(),
            ..Self::default()
        }
    }

    /// Metadata for an application container.
    pub fn container(
        sandbox_id: &str,
        log_path: &str,
        labels: &HashMap<String, String>,
        annotations: &HashMap<String, String>,
    ) -> Self {
        Self {
            role: Some(ObjectRole::Container),
            sandbox_id: sandbox_id.to_string(),
            log_path: log_path.to_string(),
            labels: labels.clone(),
            annotations: annotations.clone(),
        }
    }

    /// Flattens the record into the label set attached at create time.
    ///
    /// Reserved keys win over caller labels with the same name.
    pub fn to_labels(&self) -> HashMap<String, String> {
        let mut out = self.labels.clone();
        for (key, value) in &self.annotations {
            out.insert(format!("{ANNOTATION_PREFIX}{key}"), value.clone());
        }
        if let Some(role) = self.role {
            out.insert(CONTAINER_TYPE_LABEL_KEY.to_string(), role.as_label().to_string());
        }
        if !self.sandbox_id.is_empty() {
            out.insert(SANDBOX_ID_LABEL_KEY.to_string(), self.sandbox_id.clone());
        }
        if !self.log_path.is_empty() {
            out.insert(CONTAINER_LOG_PATH_LABEL_KEY.to_string(), self.log_path.clone());
        }
        out
    }

    /// Recovers the record from an object's label set.
    pub fn from_labels(labels: &HashMap<String, String>) -> Self {
        let mut meta = Self {
            role: labels
                .get(CONTAINER_TYPE_LABEL_KEY)
                .and_then(|v| ObjectRole::from_label(v)),
            sandbox_id: labels.get(SANDBOX_ID_LABEL_KEY).cloned().unwrap_or_default(),
            log_path: labels
                .get(CONTAINER_LOG_PATH_LABEL_KEY)
                .cloned()
                .unwrap_or_default(),
            ..Self::default()
        };

        for (key, value) in labels {
            if INTERNAL_LABEL_KEYS.contains(&key.as_str()) {
                continue;
            }
            if let Some(annotation) = key.strip_prefix(ANNOTATION_PREFIX) {
                meta.annotations.insert(annotation.to_string(), value.clone());
            } else {
                meta.labels.insert(key.clone(), value.clone());
            }
        }
        meta
    }

    /// True when the labels mark an object this shim created with `role`.
    pub fn is_ours(&self, role: ObjectRole) -> bool {
        self.role == Some(role)
    }
}
