//! End-to-end CLI tests for the repofetch binary.

#![allow(deprecated)]

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use support::hub::{MockHub, file};
use tempfile::TempDir;

/// Binary with an empty config home and no token in the environment.
fn repofetch(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("repofetch").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("HF_TOKEN")
        .env_remove("HUGGINGFACE_TOKEN")
        .env_remove("HF_ENDPOINT")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    repofetch(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("List, explore and download"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    repofetch(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("repofetch"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    repofetch(&home)
        .args(["list", "a/b", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_path_traversal_prints_error_json() {
    let home = TempDir::new().unwrap();
    let assert = repofetch(&home)
        .args(["-q", "list", "../etc/passwd"])
        .assert()
        .failure();
    let output = assert.get_output();
    assert_eq!(output.status.code(), Some(1));

    let error = stdout_json(output);
    assert_eq!(error["code"], "PATH_TRAVERSAL");
    assert!(error["suggestions"].as_array().is_some_and(|s| !s.is_empty()));
}

#[test]
fn test_binary_rejects_invalid_config_file() {
    let home = TempDir::new().unwrap();
    std::fs::create_dir_all(home.path().join("repofetch")).unwrap();
    std::fs::write(home.path().join("repofetch/config.toml"), "concurrency = 0\n").unwrap();

    repofetch(&home)
        .args(["list", "a/b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[tokio::test]
async fn test_binary_list_against_mock_hub() {
    let Some(hub) = MockHub::start().await else {
        return;
    };
    hub.tree("", json!([file("config.json", 2), file("model.onnx", 4)]))
        .await;
    let home = TempDir::new().unwrap();

    let assert = repofetch(&home)
        .args(["-q", "--endpoint", &hub.uri(), "list", "owner/repo", "-i", "*.onnx"])
        .assert()
        .success();

    let result = stdout_json(assert.get_output());
    assert_eq!(result["repo_id"], "owner/repo");
    assert_eq!(result["files"][0]["path"], "model.onnx");
    assert_eq!(result["stats"]["returned_files"], 1);
}

#[tokio::test]
async fn test_binary_download_partial_success_exits_zero() {
    let Some(hub) = MockHub::start().await else {
        return;
    };
    hub.tree("", json!([file("ok.txt", 2), file("gone.txt", 2)]))
        .await;
    hub.file("ok.txt", b"ok", 1).await;
    hub.file_status("gone.txt", 404).await;
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let assert = repofetch(&home)
        .args(["-q", "--endpoint", &hub.uri(), "download", "owner/repo"])
        .arg(out.path())
        .args(["-r", "0"])
        .assert()
        .success();

    let result = stdout_json(assert.get_output());
    assert_eq!(result["stats"]["completed"], 1);
    assert_eq!(result["stats"]["failed"], 1);
    assert_eq!(std::fs::read(out.path().join("ok.txt")).unwrap(), b"ok");
}

#[tokio::test]
async fn test_binary_download_all_failed_exits_one() {
    let Some(hub) = MockHub::start().await else {
        return;
    };
    hub.tree("", json!([file("gone.txt", 2)])).await;
    hub.file_status("gone.txt", 404).await;
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let assert = repofetch(&home)
        .args(["-q", "--endpoint", &hub.uri(), "download", "owner/repo"])
        .arg(out.path())
        .assert()
        .failure();

    let output = assert.get_output();
    assert_eq!(output.status.code(), Some(1));
    let error = stdout_json(output);
    assert_eq!(error["code"], "NOT_FOUND");
    assert_eq!(error["details"]["failures"][0]["path"], "gone.txt");
}
