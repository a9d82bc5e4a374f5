//! `iapq replay` prints the scenario report as JSON on stdout.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn testkit_scenario(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../iapq-testkit/scenarios")
        .join(name)
}

#[test]
fn replay_prints_report_json() {
    let out = Command::cargo_bin("iapq")
        .unwrap()
        .args(["replay", "--strict", "--scenario"])
        .arg(testkit_scenario("single_payment.yaml"))
        .output()
        .unwrap();
    assert!(out.status.success(), "replay must succeed");

    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["name"], "single_payment");
    assert_eq!(report["acknowledgments"]["paper:txn:000001"], 1);
    assert_eq!(report["engine"]["pending_payments"], 0);
}

#[test]
fn replay_uses_layered_config() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = dir.path().join("engine.yaml");
    fs::write(&cfg, "engine:\n  allow_store_payments: true\n").unwrap();

    Command::cargo_bin("iapq")
        .unwrap()
        .args(["replay", "--config"])
        .arg(&cfg)
        .arg("--scenario")
        .arg(testkit_scenario("store_payment.yaml"))
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""allowed":true"#));
}

#[test]
fn replay_reports_bad_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("bad.yaml");
    fs::write(
        &script,
        "name: bad\nsteps:\n  - op: settle\n    state: purchased\n",
    )
    .unwrap();

    Command::cargo_bin("iapq")
        .unwrap()
        .args(["replay", "--scenario"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no enqueued payment"));
}
