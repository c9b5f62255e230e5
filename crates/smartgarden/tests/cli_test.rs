//! Integration tests for the `smartgarden` CLI binary.
//!
//! Argument parsing, help output, completions, config handling and error
//! exit codes. None of these reach the network.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `smartgarden` binary with env isolation.
///
/// Clears the `SMARTGARDEN_*` variables and points config directories at
/// a nonexistent path so tests never touch the user's real configuration.
fn smartgarden_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("smartgarden");
    cmd.env("HOME", "/tmp/smartgarden-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/smartgarden-cli-test-nonexistent")
        .env_remove("SMARTGARDEN_CONFIG")
        .env_remove("SMARTGARDEN_APPLICATION_KEY")
        .env_remove("SMARTGARDEN_APPLICATION_SECRET")
        .env_remove("SMARTGARDEN_APPLICATION_SECRET_ENV")
        .env_remove("SMARTGARDEN_LOCATION_ID")
        .env_remove("SMARTGARDEN_TIMEOUT_SECS")
        .env_remove("SMARTGARDEN_GUARD_WINDOW_SECS")
        .env_remove("RUST_LOG");
    cmd
}

/// Same, with `--config` pointing into `dir`.
fn with_config(dir: &Path) -> assert_cmd::Command {
    let mut cmd = smartgarden_cmd();
    cmd.arg("--config").arg(dir.join("config.toml"));
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = smartgarden_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    smartgarden_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("GARDENA")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("command"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("status")),
    );
}

#[test]
fn version_flag() {
    smartgarden_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("smartgarden"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn completions_bash() {
    smartgarden_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn completions_zsh() {
    smartgarden_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Argument errors ─────────────────────────────────────────────────

#[test]
fn invalid_subcommand() {
    let output = smartgarden_cmd().arg("foobar").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("foobar"));
}

#[test]
fn unknown_command_name_is_a_usage_error() {
    let output = smartgarden_cmd()
        .args(["command", "valve-1", "explode"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("unknown command 'explode'"));
}

#[test]
fn invalid_output_format() {
    let output = smartgarden_cmd()
        .args(["--output", "xml", "devices", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("possible values"));
}

// ── Credentials ─────────────────────────────────────────────────────

#[test]
fn devices_list_without_key_is_an_auth_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = with_config(dir.path())
        .args(["devices", "list"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    let text = combined_output(&output);
    assert!(text.contains("No application key"), "{text}");
    assert!(text.contains("config init"), "{text}");
}

#[test]
fn global_flags_parse_before_credentials_check() {
    let dir = tempfile::tempdir().unwrap();
    with_config(dir.path())
        .args(["-o", "json", "-v", "--timeout", "5", "-l", "loc-1", "status"])
        .assert()
        .code(3);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_path_honors_flag() {
    let dir = tempfile::tempdir().unwrap();
    with_config(dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn config_show_without_file_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    with_config(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mowerDefaultDurationMinutes = 60"));
}

#[test]
fn config_set_persists_and_shows() {
    let dir = tempfile::tempdir().unwrap();
    with_config(dir.path())
        .args(["config", "set", "applicationKey", "app-123"])
        .assert()
        .success();
    with_config(dir.path())
        .args(["config", "set", "guardWindowSecs", "25"])
        .assert()
        .success();

    let written = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
    assert!(written.contains("applicationKey = \"app-123\""));
    assert!(written.contains("guardWindowSecs = 25"));

    let output = with_config(dir.path())
        .args(["-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["applicationKey"], "app-123");
    assert_eq!(shown["guardWindowSecs"], 25);
}

#[test]
fn config_show_masks_plaintext_secret() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "applicationKey = \"k\"\napplicationSecret = \"hunter2\"\n",
    )
    .unwrap();
    with_config(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn config_set_rejects_invalid_value() {
    let dir = tempfile::tempdir().unwrap();
    let output = with_config(dir.path())
        .args(["config", "set", "mowerDefaultDurationMinutes", "0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("config.toml").exists());
}

#[test]
fn config_set_rejects_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    with_config(dir.path())
        .args(["config", "set", "colour", "red"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown config key"));
}
