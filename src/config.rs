use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShimError};

const CONFIG_FILE: &str = "podshim.toml";

/// Shim configuration, read from `podshim.toml`. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub docker: DockerSettings,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub container: ContainerSettings,
}

/// How to reach the Docker daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerSettings {
    /// Daemon endpoint, e.g. "unix:///var/run/docker.sock"
    /// - Default: bollard's local defaults (`DOCKER_HOST` or the standard socket)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_docker_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Image run by the infra object of every sandbox
    #[serde(default = "default_pause_image")]
    pub pause_image: String,

    /// Seconds a sandbox gets to exit before it is killed
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            pause_image: default_pause_image(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Stop timeout used by the CLI when none is given
    #[serde(default = "default_stop_grace")]
    pub default_stop_timeout_secs: u64,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            default_stop_timeout_secs: default_stop_grace(),
        }
    }
}

// Default value functions
fn default_docker_timeout() -> u64 {
    120
}

fn default_pause_image() -> String {
    "registry.k8s.io/pause:3.9".to_string()
}

fn default_stop_grace() -> u64 {
    10
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ShimError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| ShimError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Default location: `podshim.toml` in the working directory if present,
    /// else under the user's config directory.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .map(|dir| dir.join("podshim").join(CONFIG_FILE))
            .unwrap_or(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.docker.endpoint, None);
        assert_eq!(config.docker.timeout_secs, 120);
        assert_eq!(config.sandbox.pause_image, "registry.k8s.io/pause:3.9");
        assert_eq!(config.sandbox.stop_grace_secs, 10);
        assert_eq!(config.container.default_stop_timeout_secs, 10);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[docker]
endpoint = "unix:///run/docker.sock"

[sandbox]
pause_image = "example.com/pause:1.0"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.docker.endpoint.as_deref(),
            Some("unix:///run/docker.sock")
        );
        assert_eq!(config.docker.timeout_secs, 120);
        assert_eq!(config.sandbox.pause_image, "example.com/pause:1.0");
        assert_eq!(config.sandbox.stop_grace_secs, 10);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[docker]\ntimeout_secs = \"soon\"\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ShimError::Config(_)));
        assert!(err.to_string().contains("failed to parse"));
    }
}
