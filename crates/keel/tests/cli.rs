//! End-to-end CLI smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn keel(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("keel").unwrap();
    cmd.current_dir(dir);
    // Keep discovery inside the sandbox even when the test host has a
    // .keel directory in some ancestor.
    cmd.env("KEEL_DIR", dir.join(".keel"));
    cmd
}

#[test]
fn init_create_list_close() {
    let dir = tempfile::tempdir().unwrap();

    keel(dir.path())
        .args(["init", "--prefix", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));

    let out = keel(dir.path())
        .args(["--json", "create", "Fix the flaky test", "--priority", "1"])
        .assert()
        .success();
    let issue: serde_json::Value =
        serde_json::from_slice(&out.get_output().stdout).expect("create emits JSON");
    let id = issue["id"].as_str().unwrap().to_owned();
    assert!(id.starts_with("demo-"));

    keel(dir.path())
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fix the flaky test"));

    keel(dir.path())
        .args(["ready"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&id));

    keel(dir.path())
        .args(["close", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Closed"));

    // Closing again is a per-item conflict.
    keel(dir.path())
        .args(["close", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already closed"));

    // The summary was refreshed by the mutations.
    let summary = std::fs::read_to_string(dir.path().join(".keel/context.md")).unwrap();
    assert!(summary.starts_with("# Project summary"));
}

#[test]
fn claim_conflict_surfaces_code_in_json() {
    let dir = tempfile::tempdir().unwrap();
    keel(dir.path()).args(["init"]).assert().success();

    let out = keel(dir.path())
        .args(["--json", "create", "contended"])
        .assert()
        .success();
    let issue: serde_json::Value = serde_json::from_slice(&out.get_output().stdout).unwrap();
    let id = issue["id"].as_str().unwrap().to_owned();

    keel(dir.path())
        .args(["claim", &id, "--assignee", "agent-a"])
        .assert()
        .success();

    keel(dir.path())
        .args(["--json", "claim", &id, "--assignee", "agent-b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"code\": \"conflict\""));
}

#[test]
fn outside_a_project_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("keel").unwrap();
    cmd.current_dir(dir.path());
    cmd.env_remove("KEEL_DIR");
    cmd.args(["list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(".keel"));
}

#[test]
fn types_and_guide_render() {
    let dir = tempfile::tempdir().unwrap();
    keel(dir.path()).args(["init"]).assert().success();

    keel(dir.path())
        .args(["types", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bug"));

    keel(dir.path())
        .args(["explain", "bug", "verifying"])
        .assert()
        .success()
        .stdout(predicate::str::contains("category wip"));

    keel(dir.path())
        .args(["guide", "planning"])
        .assert()
        .success()
        .stdout(predicate::str::contains("three levels"));
}
