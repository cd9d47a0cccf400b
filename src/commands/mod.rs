//! CLI command implementations.
//!
//! Each submodule drives one side of the runtime service. Formatting is pure
//! and returns strings; IO happens only at the top of each command.

pub mod container;
pub mod sandbox;

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

use podshim::config::Config;
use podshim::engine::DockerEngine;
use podshim::os::RealFs;
use podshim::{RuntimeService, RuntimeSettings};

/// Connects to the configured Docker daemon and builds the service over it.
pub(crate) async fn connect(config: &Config) -> Result<RuntimeService> {
    let engine = DockerEngine::connect(&config.docker).context("Failed to connect to Docker")?;
    engine
        .ping()
        .await
        .context("Docker daemon is not reachable")?;

    Ok(RuntimeService::new(
        Arc::new(engine),
        Arc::new(RealFs),
        RuntimeSettings::from(config),
    ))
}

/// Reads a request body from a TOML file.
pub(crate) fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parses a `key=value` label selector argument.
pub(crate) fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label '{s}', expected key=value")),
    }
}

/// Renders a nanosecond timestamp for tables; unset is `-`.
pub(crate) fn format_timestamp(nanos: i64) -> String {
    if nanos == 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp_nanos(nanos)
        .format("%Y-%m-%d %H:%M:%S UTC")
        .to_string()
}

/// First 13 characters of an engine ID, like `docker ps`.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..13).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(
            parse_label("app=web"),
            Ok(("app".to_string(), "web".to_string()))
        );
        assert_eq!(
            parse_label("empty="),
            Ok(("empty".to_string(), String::new()))
        );
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=web").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "-");
        assert_eq!(format_timestamp(1_000_000_000), "1970-01-01 00:00:01 UTC");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789abc");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_read_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pod.toml");
        std::fs::write(&path, "hostname = \"web\"\n[metadata]\nname = \"foo\"\n").unwrap();

        let config: podshim::api::PodSandboxConfig = read_request(&path).unwrap();
        assert_eq!(config.hostname, "web");
        assert_eq!(config.metadata.name, "foo");

        let missing = read_request::<podshim::api::PodSandboxConfig>(&dir.path().join("nope.toml"));
        assert!(missing.is_err());
    }
}
