//! Integration tests for the `relay stats` and `relay health` commands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn example_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join("relay.example.toml")
}

#[test]
fn test_stats_table() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("stats")
        .arg(example_config())
        .assert()
        .success()
        .stdout(predicate::str::contains("relay stats"))
        .stdout(predicate::str::contains("nimbus:lens"))
        .stdout(predicate::str::contains("0/100"))
        .stdout(predicate::str::contains("closed"));
}

#[test]
fn test_stats_json() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    let assert = cmd.arg("stats").arg(example_config()).arg("--json").assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["registry_version"], 0);
    assert_eq!(json["window_secs"], 60);
    let backends = json["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 4);
    assert_eq!(backends[1]["profile"]["id"], "acme:swift");
    assert_eq!(backends[1]["usage"]["requests_per_window"], 500);
}

#[test]
fn test_health_all_mock_backends_are_healthy() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    let assert = cmd.arg("health").arg(example_config()).arg("--json").assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["backends"].as_array().unwrap().iter().all(|b| b["ok"] == true));
}

#[test]
fn test_health_without_connections_fails() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[[backends]]
id = "acme:offline"
context_window = 8192
input_price_per_1k = 0.0
output_price_per_1k = 0.0
requests_per_minute = 100
tokens_per_minute = 100000
quality = 0.6
speed = 0.9
"#
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("health")
        .arg(file.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("unhealthy"))
        .stdout(predicate::str::contains("no backend connection registered"))
        .stderr(predicate::str::contains("No backend passed its health check"));
}
