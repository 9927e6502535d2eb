//! Smoke tests -- verify the binary runs and each subcommand wires up.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

/// Small hyperparameters so a full training cycle finishes quickly in debug builds.
const FAST_CONFIG: &str = r#"
[engine]
seed = 11

[engine.autoencoder]
epochs = 5

[engine.forest]
num_trees = 20

[engine.cnn]
epochs = 1
max_training_windows = 32

[logging]
level = "warn"
"#;

fn write_fast_config(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("sentinelx.toml");
    std::fs::write(&path, FAST_CONFIG).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("sentinelx")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("anomaly detection for satellite telemetry"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("sentinelx")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sentinelx"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "train", "simulate", "generate"] {
        Command::cargo_bin("sentinelx")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_generate_writes_labeled_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("corpus.json");

    Command::cargo_bin("sentinelx")
        .unwrap()
        .args(["generate", "--samples", "50", "--labeled", "--seed", "3", "--output"])
        .arg(&out)
        .assert()
        .success();

    let body: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 55);
    assert!(rows.iter().any(|r| r["shape"] == "power"));
    assert!(rows[0]["sample"]["solarPanelEfficiency"].is_number());
}

#[test]
fn test_train_json_reports_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fast_config(&dir);

    let output = Command::cargo_bin("sentinelx")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["train", "--samples", "200", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let metrics: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(metrics["samplesProcessed"], 220);
    let accuracy = metrics["accuracy"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&accuracy));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[engine.fusion]\nmin_votes = 9\n").unwrap();

    Command::cargo_bin("sentinelx")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .args(["train", "--samples", "20"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid engine section"));
}
