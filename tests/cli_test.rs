#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod common;

fn estimate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("estimate").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .arg("--storage-path")
        .arg(dir.path().join("store"))
        .env("NO_COLOR", "1")
        .env_remove("ESTIMATE_AUTH_TOKEN")
        .env_remove("ESTIMATE_STORAGE_PATH")
        .env_remove("ESTIMATE_DAILY_LIMIT");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("estimate").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("sessions"))
        .stdout(predicate::str::contains("quota"));
}

#[test]
fn test_quota_reports_configured_limit() {
    let dir = TempDir::new().unwrap();
    estimate(&dir)
        .env("ESTIMATE_DAILY_LIMIT", "3")
        .arg("quota")
        .assert()
        .success()
        .stdout(predicate::str::contains("3 of 3 estimates left today."));
}

#[test]
fn test_quota_reset() {
    let dir = TempDir::new().unwrap();
    estimate(&dir)
        .args(["quota", "--reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Quota reset."))
        .stdout(predicate::str::contains("11 of 11 estimates left today."));
}

#[test]
fn test_quota_with_token_has_no_limit() {
    let dir = TempDir::new().unwrap();
    estimate(&dir)
        .env("ESTIMATE_AUTH_TOKEN", "secret")
        .arg("quota")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in: no daily limit."));
}

#[test]
fn test_quota_reads_limit_from_config_file() {
    let (dir, config_path) = common::temp_config_file("quota:\n  daily_limit: 5\n");
    let mut cmd = Command::cargo_bin("estimate").unwrap();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--storage-path")
        .arg(dir.path().join("store"))
        .env("NO_COLOR", "1")
        .env_remove("ESTIMATE_AUTH_TOKEN")
        .env_remove("ESTIMATE_DAILY_LIMIT")
        .arg("quota")
        .assert()
        .success()
        .stdout(predicate::str::contains("5 of 5 estimates left today."));
}

#[test]
fn test_invalid_config_file_fails() {
    let (_dir, config_path) = common::temp_config_file("quota: [not, a, map]\n");
    let mut cmd = Command::cargo_bin("estimate").unwrap();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("quota")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}
