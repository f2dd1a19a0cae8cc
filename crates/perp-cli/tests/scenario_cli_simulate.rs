//! Scenario: `perp simulate`.
//!
//! # Invariants under test
//!
//! 1. stdout is a single JSON report: the config hash plus one entry per
//!    step, rejections included.
//! 2. Unused config keys only warn by default.
//! 3. `--strict` turns unused config keys into a failure.
//! 4. An unreadable script fails the command.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn repo_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(rel)
}

#[test]
#[allow(deprecated)]
fn sample_script_produces_json_report() {
    let out = Command::cargo_bin("perp")
        .unwrap()
        .arg("simulate")
        .arg("--config")
        .arg(repo_path("config/base.yaml"))
        .arg("--script")
        .arg(repo_path("scripts/deposit-redeem.yaml"))
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["config_hash"].as_str().unwrap().len(), 64);

    let steps = report["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 7);
    assert_eq!(steps[0]["action"], "deposit");
    assert_eq!(steps[2]["state"]["total_supply"], "10000");
    assert_eq!(steps[2]["state"]["long"]["collateral"], "5000");
    assert_eq!(steps[3]["ok"], false);
    assert!(steps[3]["error"]
        .as_str()
        .unwrap()
        .contains("exceeds limit 90000"));
    assert_eq!(steps[6]["amount"], "10000");
    assert_eq!(steps[6]["state"]["total_supply"], "0");
}

#[test]
#[allow(deprecated)]
fn unused_keys_warn_unless_strict() {
    let dir = tempfile::tempdir().unwrap();
    let overlay = dir.path().join("extra.yaml");
    fs::write(&overlay, "vault:\n  strategy: \"delta-neutral\"\n").unwrap();

    Command::cargo_bin("perp")
        .unwrap()
        .arg("simulate")
        .arg("--config")
        .arg(repo_path("config/base.yaml"))
        .arg(&overlay)
        .arg("--script")
        .arg(repo_path("scripts/deposit-redeem.yaml"))
        .assert()
        .success()
        .stderr(predicate::str::contains("/vault/strategy"));

    Command::cargo_bin("perp")
        .unwrap()
        .arg("simulate")
        .arg("--config")
        .arg(repo_path("config/base.yaml"))
        .arg(&overlay)
        .arg("--script")
        .arg(repo_path("scripts/deposit-redeem.yaml"))
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_UNUSED_KEYS"));
}

#[test]
#[allow(deprecated)]
fn missing_script_fails() {
    Command::cargo_bin("perp")
        .unwrap()
        .arg("simulate")
        .arg("--config")
        .arg(repo_path("config/base.yaml"))
        .arg("--script")
        .arg("/nonexistent/script.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read script"));
}
