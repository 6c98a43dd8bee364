use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Command pointed at a config file inside `dir` so the user's own config is never read
fn shardline(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("shardline").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("config.toml"))
        .env_remove("SHARDLINE_LOG_LEVEL")
        .env_remove("SHARDLINE_LOG_FORMAT")
        .env_remove("SHARDLINE_METRICS_ENABLED");
    cmd
}

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("shardline").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shardline 0.1.0"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("shardline").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Route rate-limit buckets"))
        .stdout(predicate::str::contains("simulate-routes"));
}

#[test]
fn test_cli_unknown_subcommand() {
    let mut cmd = Command::cargo_bin("shardline").unwrap();
    cmd.arg("spawn-vm")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_show_config_defaults() {
    let dir = TempDir::new().unwrap();
    shardline(&dir)
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[rate_limit]"))
        .stdout(predicate::str::contains("initial_capacity = 16"))
        .stdout(predicate::str::contains("hold_timeout_secs = 30"));
}

#[test]
fn test_cli_show_config_from_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[gateway]\nmax_concurrency = 16\n",
    )
    .unwrap();

    shardline(&dir)
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_concurrency = 16"));
}

#[test]
fn test_cli_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[rate_limit]\ninitial_capacity = 3\n",
    )
    .unwrap();

    shardline(&dir)
        .arg("show-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("power of two"));
}

#[test]
fn test_cli_simulate_routes() {
    let dir = TempDir::new().unwrap();
    let output = shardline(&dir)
        .args(["simulate-routes", "--routes", "6", "--buckets", "2", "--rounds", "2"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["granted"], 12);
    assert_eq!(report["refused"], 0);
    assert_eq!(report["stats"]["live_slots"], 2);
    assert_eq!(report["stats"]["routes"], 6);
}

#[test]
fn test_cli_simulate_identify() {
    let dir = TempDir::new().unwrap();
    let output = shardline(&dir)
        .args([
            "simulate-identify",
            "--shards",
            "3",
            "--concurrency",
            "3",
            "--cooldown-ms",
            "10",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let shards: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shards.len(), 3);
    assert_eq!(shards[2]["bucket"], 2);
}

#[test]
fn test_cli_simulate_routes_reports_capacity_metric() {
    let dir = TempDir::new().unwrap();
    shardline(&dir)
        .env("SHARDLINE_METRICS_ENABLED", "true")
        .args(["simulate-routes", "--routes", "4"])
        .assert()
        .success()
        .stderr(predicate::str::contains("ratelimit_container_capacity 16"));
}
