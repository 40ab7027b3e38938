//! Smoke tests for the wpt-diff CLI
//!
//! None of these reach the network or launch a browser: every case fails
//! or finishes during argument and config validation.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin until assert_cmd is updated
#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get a command for the wpt-diff binary
fn wpt_diff() -> Command {
    Command::cargo_bin("wpt-diff").expect("wpt-diff binary should exist")
}

// ============================================================================
// Basic CLI Tests
// ============================================================================

#[test]
fn test_version_flag() {
    wpt_diff()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.4.0"));
}

#[test]
fn test_help_flag() {
    wpt_diff()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Web Platform Tests"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn test_no_args_shows_help() {
    wpt_diff().assert().failure();
}

#[test]
fn test_run_subcommand_help() {
    wpt_diff()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--under-proxy"))
        .stdout(predicate::str::contains("--output-failed"))
        .stdout(predicate::str::contains("--resume-from"));
}

#[test]
fn test_list_subcommand_help() {
    wpt_diff()
        .args(["list", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--total-shards"));
}

// ============================================================================
// Argument Validation
// ============================================================================

#[test]
fn test_shard_without_total_rejected() {
    let dir = TempDir::new().unwrap();
    wpt_diff()
        .current_dir(dir.path())
        .args(["list", "--shard", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--shard requires --total-shards"));
}

#[test]
fn test_shard_out_of_range_rejected() {
    let dir = TempDir::new().unwrap();
    wpt_diff()
        .current_dir(dir.path())
        .args(["run", "--shard", "5", "--total-shards", "4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid argument"));
}

#[test]
fn test_invalid_max_tests_rejected() {
    wpt_diff()
        .args(["run", "--max-tests", "plenty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("all"));
}

#[test]
fn test_invalid_config_file_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "[wpt\nmax_tests = ").unwrap();
    wpt_diff()
        .args(["list", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_invalid_url_in_config_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "[wpt.urls]\napi_base_url = \"wpt.fyi\"\n").unwrap();
    wpt_diff()
        .args(["list", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid URL"));
}
