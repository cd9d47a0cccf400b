//! Integration tests for the podshim CLI.
//!
//! These run the actual binary. None of them needs a Docker daemon: they stop
//! at argument parsing or configuration loading.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the podshim binary.
#[allow(deprecated)]
fn podshim() -> Command {
    let mut cmd = Command::cargo_bin("podshim").expect("failed to find podshim binary");
    cmd.env_remove("PODSHIM_CONFIG");
    cmd
}

/// Writes `content` as a config file in a fresh directory.
fn config_file(content: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("podshim.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    let output = podshim().arg("--help").assert().success().get_output().clone();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("podshim"));
    for command in [
        "runp", "stopp", "rmp", "inspectp", "pods", "create", "start", "stop", "rm", "inspect",
        "ps",
    ] {
        assert!(stdout.contains(command), "help is missing {command}");
    }
}

#[test]
fn test_version_shows_version() {
    podshim()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("podshim"));
}

#[test]
fn test_create_help_shows_arguments() {
    podshim()
        .args(["create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("POD_SANDBOX_ID"))
        .stdout(predicate::str::contains("SANDBOX_CONFIG"));
}

#[test]
fn test_ps_help_shows_filters() {
    podshim()
        .args(["ps", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--pod"))
        .stdout(predicate::str::contains("--state"))
        .stdout(predicate::str::contains("--label"));
}

#[test]
fn test_global_flags_in_help() {
    podshim()
        .args(["pods", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbose"))
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--log-format"));
}

// -----------------------------------------------------------------------------
// Argument errors
// -----------------------------------------------------------------------------

#[test]
fn test_unknown_command_suggests_help() {
    podshim()
        .arg("nonexistent")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--help"));
}

#[test]
fn test_malformed_label_is_rejected() {
    podshim()
        .args(["ps", "--label", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn test_invalid_state_is_rejected() {
    podshim()
        .args(["ps", "--state", "paused"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown container state"));
}

#[test]
fn test_invalid_pod_state_shows_options() {
    podshim()
        .args(["pods", "--state", "sleeping"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ready"))
        .stderr(predicate::str::contains("not-ready"));
}

#[test]
fn test_stop_requires_container_id() {
    podshim()
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONTAINER_ID"));
}

// -----------------------------------------------------------------------------
// Configuration errors
// -----------------------------------------------------------------------------

#[test]
fn test_invalid_config_fails_before_connecting() {
    let (_dir, path) = config_file("[docker]\ntimeout_secs = \"soon\"\n");

    podshim()
        .arg("--config")
        .arg(&path)
        .arg("ps")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"))
        .stderr(predicate::str::contains("failed to parse"));
}

#[test]
fn test_config_from_environment() {
    let (_dir, path) = config_file("not toml at all [");

    podshim()
        .env("PODSHIM_CONFIG", &path)
        .arg("pods")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
