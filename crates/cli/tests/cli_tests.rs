//! CLI integration tests

use std::process::Command;

fn drsctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_drsctl"))
}

#[test]
fn test_cli_help() {
    let output = drsctl()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Dynamic Resource Scheduler"),
        "Should show app name"
    );
    assert!(stdout.contains("nodes"), "Should show nodes command");
    assert!(stdout.contains("choose"), "Should show choose command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("health"), "Should show health command");
}

#[test]
fn test_cli_version() {
    let output = drsctl()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("drsctl"), "Should show binary name");
}

#[test]
fn test_nodes_help() {
    let output = drsctl()
        .args(["nodes", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Nodes help should succeed");
    assert!(stdout.contains("--agents"), "Should show agents option");
    assert!(stdout.contains("--scaled"), "Should show scaled option");
}

#[test]
fn test_choose_requires_pod() {
    let output = drsctl()
        .arg("choose")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Choose without a pod should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("<POD>"), "Should name the missing argument");
}

#[test]
fn test_malformed_agent_is_rejected() {
    let output = drsctl()
        .args(["nodes", "--agents", "not-an-endpoint"])
        .env_remove("DRS_AGENTS")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("name=host:port"));
}

#[test]
fn test_choose_against_unreachable_scheduler_fails() {
    let output = drsctl()
        .args(["--scheduler-url", "http://127.0.0.1:9", "choose", "web-1"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
}
