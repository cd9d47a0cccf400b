//! Engine-native names for sandboxes and containers.
//!
//! Docker has a single flat namespace, so the logical identity of every object
//! is folded into its name:
//!
//! ```text
//! k8s_<name>_<sandbox name>_<namespace>_<sandbox uid>_<attempt>
//! ```
//!
//! Sandboxes use the reserved name `POD`. Names created while recovering from
//! a naming conflict carry one extra random field.

use std::fmt;

use crate::api::{ContainerMetadata, PodSandboxMetadata};
use crate::error::{Result, ShimError};

/// Prefix of every name this shim creates.
pub const NAME_PREFIX: &str = "k8s";

/// Separator between name fields.
pub const NAME_DELIMITER: &str = "_";

/// Logical name given to the infra object backing a sandbox.
pub const SANDBOX_CONTAINER_NAME: &str = "POD";

/// Number of fields in a canonical name.
pub const NAME_FIELDS: usize = 6;

/// Number of fields in a name that went through [`randomize`].
pub const RANDOMIZED_NAME_FIELDS: usize = NAME_FIELDS + 1;

/// Which kind of object a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The infra object holding a pod's namespaces.
    Sandbox,
    /// An application container inside a sandbox.
    Container,
}

/// Decoded logical identity of an engine object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeName {
    pub role: Role,
    /// Container name, or [`SANDBOX_CONTAINER_NAME`] for sandboxes.
    pub name: String,
    pub sandbox_name: String,
    pub namespace: String,
    pub sandbox_uid: String,
    pub attempt: u32,
}

impl NativeName {
    /// Identity of the infra object for a sandbox.
    pub fn sandbox(metadata: &PodSandboxMetadata) -> Self {
        Self {
            role: Role::Sandbox,
            name: SANDBOX_CONTAINER_NAME.to_string(),
            sandbox_name: metadata.name.clone(),
            namespace: metadata.namespace.clone(),
            sandbox_uid: metadata.uid.clone(),
            attempt: metadata.attempt,
        }
    }

    /// Identity of an application container inside a sandbox.
    pub fn container(container: &ContainerMetadata, sandbox: &PodSandboxMetadata) -> Self {
        Self {
            role: Role::Container,
            name: container.name.clone(),
            sandbox_name: sandbox.name.clone(),
            namespace: sandbox.namespace.clone(),
            sandbox_uid: sandbox.uid.clone(),
            attempt: container.attempt,
        }
    }

    /// Joins the identity into the engine name.
    ///
    /// No field may contain [`NAME_DELIMITER`], or the name decodes into
    /// different fields. [`NativeName::check_fields`] enforces that.
    pub fn encode(&self) -> String {
        let attempt = self.attempt.to_string();
        let fields: [&str; NAME_FIELDS] = [
            NAME_PREFIX,
            &self.name,
            &self.sandbox_name,
            &self.namespace,
            &self.sandbox_uid,
            &attempt,
        ];
        fields.join(NAME_DELIMITER)
    }

    /// Fails when a field contains [`NAME_DELIMITER`].
    pub fn check_fields(&self) -> Result<()> {
        let fields = [
            ("name", &self.name),
            ("sandbox name", &self.sandbox_name),
            ("namespace", &self.namespace),
            ("sandbox uid", &self.sandbox_uid),
        ];
        match fields
            .iter()
            .find(|(_, value)| value.contains(NAME_DELIMITER))
        {
            Some((field, value)) => Err(ShimError::malformed_name(
                self.encode(),
                format!("{field} {value:?} contains {NAME_DELIMITER:?}"),
            )),
            None => Ok(()),
        }
    }

    /// Splits an engine name back into its identity.
    ///
    /// Docker reports names with a leading `/`, which is ignored.
    pub fn decode(native: &str) -> Result<Self> {
        let trimmed = native.strip_prefix('/').unwrap_or(native);
        let parts: Vec<&str> = trimmed.split(NAME_DELIMITER).collect();

        if parts.len() != NAME_FIELDS && parts.len() != RANDOMIZED_NAME_FIELDS {
            return Err(ShimError::malformed_name(
                native,
                format!(
                    "expected {NAME_FIELDS} or {RANDOMIZED_NAME_FIELDS} fields, found {}",
                    parts.len()
                ),
            ));
        }
        if parts[0] != NAME_PREFIX {
            return Err(ShimError::malformed_name(
                native,
                format!("missing {NAME_PREFIX:?} prefix"),
            ));
        }

        let attempt = parts[5].parse::<u32>().map_err(|e| {
            ShimError::malformed_name(native, format!("invalid attempt {:?}: {e}", parts[5]))
        })?;

        let role = if parts[1] == SANDBOX_CONTAINER_NAME {
            Role::Sandbox
        } else {
            Role::Container
        };

        Ok(Self {
            role,
            name: parts[1].to_string(),
            sandbox_name: parts[2].to_string(),
            namespace: parts[3].to_string(),
            sandbox_uid: parts[4].to_string(),
            attempt,
        })
    }

    /// Container metadata carried by the name.
    pub fn container_metadata(&self) -> ContainerMetadata {
        ContainerMetadata {
            name: self.name.clone(),
            attempt: self.attempt,
        }
    }

    /// Sandbox metadata carried by the name.
    pub fn sandbox_metadata(&self) -> PodSandboxMetadata {
        PodSandboxMetadata {
            name: self.sandbox_name.clone(),
            uid: self.sandbox_uid.clone(),
            namespace: self.namespace.clone(),
            attempt: self.attempt,
        }
    }
}

impl fmt::Display for NativeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Appends a random field so a create can bypass a name the engine still holds.
pub fn randomize(name: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{name}{NAME_DELIMITER}{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox_metadata() -> PodSandboxMetadata {
        PodSandboxMetadata {
            name: "foo".to_string(),
            uid: "1".to_string(),
            namespace: "bar".to_string(),
            attempt: 0,
        }
    }

    #[test]
    fn test_container_name_layout() {
        let container = ContainerMetadata {
            name: "sidecar".to_string(),
            attempt: 3,
        };
        let name = NativeName::container(&container, &sandbox_metadata());
        assert_eq!(name.encode(), "k8s_sidecar_foo_bar_1_3");
    }

    #[test]
    fn test_sandbox_name_layout() {
        let name = NativeName::sandbox(&sandbox_metadata());
        assert_eq!(name.encode(), "k8s_POD_foo_bar_1_0");
        assert_eq!(name.role, Role::Sandbox);
    }

    #[test]
    fn test_decode_recovers_identity() {
        let container = ContainerMetadata {
            name: "web".to_string(),
            attempt: 7,
        };
        let name = NativeName::container(&container, &sandbox_metadata());
        let decoded = NativeName::decode(&format!("/{}", name.encode())).unwrap();
        assert_eq!(decoded, name);
        assert_eq!(decoded.container_metadata(), container);
        assert_eq!(decoded.sandbox_metadata().name, "foo");
    }

    #[test]
    fn test_decode_sandbox_role() {
        let decoded = NativeName::decode("k8s_POD_foo_bar_1_2").unwrap();
        assert_eq!(decoded.role, Role::Sandbox);
        assert_eq!(decoded.sandbox_metadata().attempt, 2);
    }

    #[test]
    fn test_attempts_never_collide() {
        let sandbox = sandbox_metadata();
        let first = ContainerMetadata {
            name: "app".to_string(),
            attempt: 0,
        };
        let second = ContainerMetadata {
            name: "app".to_string(),
            attempt: 1,
        };
        assert_ne!(
            NativeName::container(&first, &sandbox).encode(),
            NativeName::container(&second, &sandbox).encode()
        );
    }

    #[test]
    fn test_randomized_name_decodes() {
        let name = randomize("k8s_app_foo_bar_1_0");
        assert_eq!(name.split(NAME_DELIMITER).count(), RANDOMIZED_NAME_FIELDS);
        let decoded = NativeName::decode(&name).unwrap();
        assert_eq!(decoded.name, "app");
        assert_eq!(decoded.attempt, 0);
    }

    #[test]
    fn test_decode_rejects_wrong_field_count() {
        let err = NativeName::decode("k8s_app_foo").unwrap_err();
        assert!(matches!(err, ShimError::MalformedName { .. }));
    }

    #[test]
    fn test_check_fields_rejects_delimiter() {
        let sandbox = sandbox_metadata();
        assert!(NativeName::sandbox(&sandbox).check_fields().is_ok());

        let mut bad = sandbox.clone();
        bad.namespace = "kube_system".to_string();
        let err = NativeName::sandbox(&bad).check_fields().unwrap_err();
        assert!(err.to_string().contains("namespace \"kube_system\""));

        let container = ContainerMetadata {
            name: "log_shipper".to_string(),
            attempt: 0,
        };
        assert!(NativeName::container(&container, &sandbox)
            .check_fields()
            .is_err());
    }

    #[test]
    fn test_decode_rejects_foreign_prefix() {
        assert!(NativeName::decode("/compose_app_foo_bar_1_0").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_attempt() {
        let err = NativeName::decode("k8s_app_foo_bar_1_x").unwrap_err();
        assert!(err.to_string().contains("invalid attempt"));
    }
}
