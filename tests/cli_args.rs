//! Argument-surface tests for the `tilefetch` binary. No network, no GIS
//! session; everything here must fail or print before the pipeline starts.

use assert_cmd::Command;
use predicates::prelude::*;

fn tilefetch() -> Command {
    Command::cargo_bin("tilefetch").expect("binary builds")
}

#[test]
fn test_help_lists_required_options() {
    tilefetch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--product"))
        .stdout(predicate::str::contains("--output-directory"))
        .stdout(predicate::str::contains("--keep-sources"));
}

#[test]
fn test_missing_product_fails_with_usage() {
    tilefetch()
        .args(["--output-directory", "/tmp/tiles", "--output", "elevation"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--product"));
}

#[test]
fn test_invalid_bbox_is_rejected_before_startup() {
    tilefetch()
        .args([
            "--product",
            "ned",
            "--output-directory",
            "/tmp/tiles",
            "--output",
            "elevation",
            "--bbox",
            "-78.0,36.0,-79.0,37.0",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("min corner"));
}

#[test]
fn test_unknown_product_is_rejected() {
    tilefetch()
        .args([
            "--product",
            "srtm",
            "--output-directory",
            "/tmp/tiles",
            "--output",
            "elevation",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
