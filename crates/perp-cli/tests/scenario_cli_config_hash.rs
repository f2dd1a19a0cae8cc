//! Scenario: `perp config-hash`.
//!
//! # Invariants under test
//!
//! 1. Output is `config_hash=<64 hex>` followed by the canonical JSON.
//! 2. The hash is stable across runs for the same layers.
//! 3. An overlay changes only the keys it names, and the hash with it.
//! 4. A missing layer fails the command.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::PathBuf;
use std::process::Command;

fn config_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config")
        .join(name)
}

fn base_yaml() -> PathBuf {
    config_path("base.yaml")
}

fn hash_line(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[test]
#[allow(deprecated)]
fn prints_hash_then_canonical_json() {
    let out = Command::cargo_bin("perp")
        .unwrap()
        .arg("config-hash")
        .arg(base_yaml())
        .output()
        .unwrap();
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let mut lines = stdout.lines();
    let hash = lines.next().unwrap().strip_prefix("config_hash=").unwrap();
    assert_eq!(hash.len(), 64);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

    let json: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
    assert_eq!(json["vault"]["target_leverage"], "4");
}

#[test]
#[allow(deprecated)]
fn hash_is_stable_between_runs() {
    let run = || {
        Command::cargo_bin("perp")
            .unwrap()
            .arg("config-hash")
            .arg(base_yaml())
            .output()
            .unwrap()
    };
    assert_eq!(hash_line(&run().stdout), hash_line(&run().stdout));
}

#[test]
#[allow(deprecated)]
fn overlay_changes_hash_and_only_its_keys() {
    let base = Command::cargo_bin("perp")
        .unwrap()
        .arg("config-hash")
        .arg(base_yaml())
        .output()
        .unwrap();
    let layered = Command::cargo_bin("perp")
        .unwrap()
        .arg("config-hash")
        .arg(base_yaml())
        .arg(config_path("tight-short.yaml"))
        .output()
        .unwrap();
    assert!(layered.status.success());
    assert_ne!(hash_line(&base.stdout), hash_line(&layered.stdout));

    let stdout = String::from_utf8_lossy(&layered.stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(stdout.lines().nth(1).unwrap()).unwrap();
    assert_eq!(json["markets"]["short"]["maker_limit"], "100");
    assert_eq!(json["markets"]["long"]["maker_limit"], "1000");
    assert_eq!(json["markets"]["short"]["payoff"], "short");
}

#[test]
#[allow(deprecated)]
fn missing_layer_fails() {
    Command::cargo_bin("perp")
        .unwrap()
        .arg("config-hash")
        .arg(base_yaml())
        .arg("/nonexistent/overlay.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("overlay.yaml"));
}
