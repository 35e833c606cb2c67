//! Integration tests for the `netconf` CLI binary.
//!
//! Argument parsing, help output, error exit codes, and a round trip
//! against `netconf serve` on a loopback port.
#![allow(clippy::unwrap_used)]

use std::io::{BufRead, BufReader};
use std::process::{Child, Stdio};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `netconf` binary with env isolation.
fn netconf_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("netconf");
    cmd.env("HOME", "/tmp/netconf-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/netconf-cli-test-nonexistent")
        .env_remove("NETCONF_PROFILE")
        .env_remove("NETCONF_HOST")
        .env_remove("NETCONF_PORT")
        .env_remove("NETCONF_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Kills the simulator when the test ends.
struct Simulator {
    child: Child,
    port: u16,
}

impl Drop for Simulator {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn start_simulator(extra: &[&str]) -> Simulator {
    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_netconf"))
        .args(["serve", "--listen", "127.0.0.1:0"])
        .args(extra)
        .env("HOME", "/tmp/netconf-cli-test-nonexistent")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).unwrap();
    let port = line
        .trim()
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or_else(|| panic!("unexpected serve banner: {line:?}"));
    Simulator { child, port }
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = netconf_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_flag() {
    netconf_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("NETCONF")
            .and(predicate::str::contains("capabilities"))
            .and(predicate::str::contains("get-config"))
            .and(predicate::str::contains("edit"))
            .and(predicate::str::contains("serve")),
    );
}

#[test]
fn test_version_flag() {
    netconf_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netconf"));
}

#[test]
fn test_completions_bash() {
    netconf_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Errors ──────────────────────────────────────────────────────────

#[test]
fn test_no_device_is_usage_error() {
    let output = netconf_cmd().arg("capabilities").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("No device selected"));
}

#[test]
fn test_unknown_profile_is_usage_error() {
    let output = netconf_cmd()
        .args(["--profile", "missing", "capabilities"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("missing"));
}

#[test]
fn test_merge_without_file_is_rejected() {
    let output = netconf_cmd()
        .args([
            "--host",
            "127.0.0.1",
            "edit",
            "--path",
            "/{urn:example}users",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--file"));
}

#[test]
fn test_invalid_path_is_rejected() {
    let output = netconf_cmd()
        .args(["--host", "127.0.0.1", "edit", "--path", "users", "--operation", "delete"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_refused_connection_exit_code() {
    // Bind then drop to find a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let output = netconf_cmd()
        .args(["--host", "127.0.0.1", "--port", &port.to_string(), "capabilities"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
}

// ── Against the simulator ───────────────────────────────────────────

#[test]
fn test_capabilities_against_simulator() {
    let sim = start_simulator(&["--candidate"]);

    netconf_cmd()
        .args(["--host", "127.0.0.1", "--port", &sim.port.to_string()])
        .args(["--output", "json", "capabilities"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"framing\": \"chunked\"")
                .and(predicate::str::contains("urn:ietf:params:netconf:capability:candidate:1.0"))
                .and(predicate::str::contains("\"write_strategy\": \"candidate\"")),
        );
}

#[test]
fn test_edit_then_read_back() {
    let sim = start_simulator(&["--candidate", "--list-key", "{urn:example}user=name"]);
    let port = sim.port.to_string();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("ann.xml");
    std::fs::write(
        &file,
        r#"<user xmlns="urn:example"><name>ann</name><role>admin</role></user>"#,
    )
    .unwrap();

    netconf_cmd()
        .args(["--host", "127.0.0.1", "--port", &port, "edit"])
        .args(["--path", "/{urn:example}users/user[name=ann]", "--operation", "replace"])
        .arg("--file")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("via candidate"));

    netconf_cmd()
        .args(["--host", "127.0.0.1", "--port", &port, "get-config"])
        .args(["--path", "/{urn:example}users/user[name=ann]"])
        .assert()
        .success()
        .stdout(predicate::str::contains("admin"));
}
