//! Integration tests for the `relay route` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn example_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join("relay.example.toml")
}

fn route_json(extra: &[&str]) -> serde_json::Value {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    let assert =
        cmd.arg("route").arg(example_config()).args(extra).arg("--json").assert().success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_route_dispatches_to_a_mock_backend() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("route")
        .arg(example_config())
        .arg("--message")
        .arg("hello there")
        .assert()
        .success()
        .stdout(predicate::str::contains("Served by:"))
        .stdout(predicate::str::contains("Mock response from"))
        .stdout(predicate::str::contains("hello there"));
}

#[test]
fn test_route_json_result() {
    let json = route_json(&["--message", "hello there"]);

    let backend = json["backend_id"].as_str().unwrap();
    assert!(["acme:swift", "nimbus:lens", "acme:sage"].contains(&backend), "served by {backend}");
    assert_eq!(json["fallback_chain_used"].as_array().unwrap().len(), 1);
    assert_eq!(json["decision"]["selected"], backend);
    assert!(json["output_text"].as_str().unwrap().contains("hello there"));
}

#[test]
fn test_route_dry_run_respects_vision_requirement() {
    let json = route_json(&["--message", "describe this photo", "--vision", "--dry-run"]);

    let selected = json["decision"]["selected"].as_str().unwrap();
    assert_ne!(selected, "acme:swift");
    assert!(["nimbus:lens", "acme:sage"].contains(&selected), "selected {selected}");
    let caps = json["requirements"]["required_capabilities"].as_array().unwrap();
    assert!(caps.iter().any(|c| c == "vision"));
}

#[test]
fn test_route_dry_run_shows_evaluations() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("route")
        .arg(example_config())
        .args(["--category", "coding", "--message", "fix the failing test", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("relay route (dry run)"))
        .stdout(predicate::str::contains("Selected:"))
        .stdout(predicate::str::contains("acme:sage"))
        .stdout(predicate::str::contains("Mock response from").not());
}

#[test]
fn test_route_zero_budget_forces_fallback() {
    let json =
        route_json(&["--category", "coding", "--message", "fix it", "--budget", "0", "--dry-run"]);

    assert_eq!(json["decision"]["kind"], "forced_fallback");
    assert_eq!(json["decision"]["selected"], "acme:sage");
    assert!(json["decision"]["fallback_chain"].as_array().unwrap().is_empty());
}

#[test]
fn test_route_rejects_unknown_category() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("route")
        .arg(example_config())
        .args(["--category", "poetry", "--message", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown task category 'poetry'"));
}

#[test]
fn test_route_requires_message() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("route")
        .arg(example_config())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--message"));
}
