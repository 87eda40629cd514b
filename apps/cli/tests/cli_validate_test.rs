//! Integration tests for the `relay validate` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn example_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join("relay.example.toml")
}

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
fn test_validate_example_config() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("validate")
        .arg(example_config())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("4 (4 connected)"))
        .stdout(predicate::str::contains("local:router"));
}

#[test]
fn test_validate_json_output() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    let assert = cmd.arg("validate").arg(example_config()).arg("--json").assert().success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["backends"], 4);
    assert_eq!(json["escalation_selector"], "local:router");
    assert_eq!(json["categories"].as_array().unwrap().len(), 4);
}

#[test]
fn test_validate_rejects_bad_weights() {
    let file = write_config(
        r#"
[weights]
quality = 0.5
cost = 0.5
speed = 0.5

[[backends]]
id = "local:echo"
context_window = 8192
input_price_per_1k = 0.0
output_price_per_1k = 0.0
requests_per_minute = 100
tokens_per_minute = 100000
quality = 0.6
speed = 0.9
"#,
    );

    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("validate")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("weights must sum to 1.0"));
}

#[test]
fn test_validate_rejects_unknown_selector() {
    let file = write_config(
        r#"
[escalation]
selector = "ghost:router"

[[backends]]
id = "local:echo"
context_window = 8192
input_price_per_1k = 0.0
output_price_per_1k = 0.0
requests_per_minute = 100
tokens_per_minute = 100000
quality = 0.6
speed = 0.9
"#,
    );

    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("validate")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost:router"));
}

#[test]
fn test_validate_missing_file() {
    let mut cmd = Command::cargo_bin("relay").unwrap();
    cmd.arg("validate")
        .arg("/nonexistent/relay.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read configuration file"));
}
