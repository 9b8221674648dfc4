// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const CONFIG: &str = r#"
job:
  org: org
  repo: repo
  namespace: ci-op-1234
build:
  build_root:
    tag: manual
  binary_build_commands: make build
  images:
    - from: bin
      to: name
  tests:
    - as: unit
      commands: make test
"#;

fn project(config: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stepflow.yaml"), config).unwrap();
    dir
}

fn stepflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("stepflow").unwrap();
    cmd.current_dir(dir)
        .env_remove("STEPFLOW_CONFIG")
        .env_remove("STEPFLOW_BACKEND")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn graph_prints_consumer_producer_pairs() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("src [input:root]"))
        .stdout(predicate::str::contains("bin src"))
        .stdout(predicate::str::contains("[images] [output:stable:name]"));
}

#[test]
fn graph_text_lists_execution_order() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .args(["graph", "--format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. [input:root]"))
        .stdout(predicate::str::contains("bin [depends: src]"));
}

#[test]
fn validate_accepts_config() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid!"));
}

#[test]
fn validate_rejects_unknown_target() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .args(["validate", "--target", "nope"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("nope"));
}

#[test]
fn dry_run_previews_without_running_tests() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would apply"))
        .stdout(predicate::str::contains("Pipeline finished"))
        .stdout(predicate::str::contains("Tests:").not());
}

#[test]
fn run_executes_pipeline_in_memory() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ [images]"))
        .stdout(predicate::str::contains("- unit"));
}

#[test]
fn run_target_skips_unrelated_steps() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .args(["run", "--target", "bin"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ bin"))
        .stdout(predicate::str::contains("Tests:").not());
}

#[test]
fn run_with_unknown_target_fails() {
    let dir = project(CONFIG);

    stepflow(dir.path())
        .args(["run", "--target", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Pipeline configuration is invalid"));
}

#[test]
fn missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();

    stepflow(dir.path())
        .arg("validate")
        .assert()
        .failure();
}

#[test]
fn config_flag_selects_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("pipeline.toml"),
        r#"
[job]
org = "org"
repo = "repo"
namespace = "ci-op-1"

[build.build_root]
tag = "manual"
"#,
    )
    .unwrap();

    stepflow(dir.path())
        .args(["-c", "pipeline.toml", "graph"])
        .assert()
        .success()
        .stdout(predicate::str::contains("src [input:root]"));
}

#[test]
fn shell_backend_reports_failing_test() {
    let dir = project(&CONFIG.replace("commands: make test", "commands: exit 3"));

    stepflow(dir.path())
        .args(["run", "--backend", "shell"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("✓ [images]"))
        .stderr(predicate::str::contains("Step 'unit' failed"))
        .stderr(predicate::str::contains("--target unit"));
}
