//! Smoke tests for the Thingverse CLI.
//!
//! These tests verify basic CLI functionality without a running service:
//! - `thingverse --version` and `--help`
//! - `thingverse config` resolution order and token masking
//! - argument errors exit non-zero before any request is made

mod common;

use common::TestEnv;
use predicates::prelude::*;
use serde_json::Value;

fn config_json(env: &TestEnv, args: &[&str]) -> Value {
    let output = env.tv().args(args).arg("config").output().unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_version_flag() {
    TestEnv::new()
        .tv()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("thingverse"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_flag() {
    TestEnv::new()
        .tv()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("signals"));
}

#[test]
fn test_missing_subcommand_fails() {
    TestEnv::new().tv().assert().failure();
}

#[test]
fn test_config_defaults() {
    let env = TestEnv::new();
    let config = config_json(&env, &[]);
    assert_eq!(config["meta_host"]["value"], "http://localhost:5556/");
    assert_eq!(config["meta_host"]["source"], "default");
    assert_eq!(config["tsb_host"]["value"], "http://localhost:5555/ts/");
    assert_eq!(config["batch_size"]["value"], 80);
    assert!(config["token"].is_null());
}

#[test]
fn test_config_service_host_variables() {
    let env = TestEnv::new();
    let output = env
        .tv()
        .env("METAFLOW_SERVICE_HOST", "metaflow")
        .env("TSB_SERVICE_PORT", "7000")
        .arg("config")
        .output()
        .unwrap();
    let config: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["meta_host"]["value"], "http://metaflow:5556/");
    assert_eq!(config["tsb_host"]["value"], "http://localhost:7000/ts/");
}

#[test]
fn test_config_precedence() {
    let env = TestEnv::new().with_config(
        "meta-host \"https://file.example/meta/\"\n\
         tsb-host \"https://file.example/tsb/\"\n\
         default-dt \"PT1H\"\n\
         batch-size 20\n",
    );
    let output = env
        .tv()
        .env("THINGVERSE_TSB_HOST", "https://env.example/tsb/")
        .args(["--token", "abcdefghijklmnopqrstuvwxyz", "config"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let config: Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(config["meta_host"]["value"], "https://file.example/meta/");
    assert!(
        config["meta_host"]["source"]
            .as_str()
            .unwrap()
            .starts_with("file:")
    );
    assert_eq!(config["tsb_host"]["value"], "https://env.example/tsb/");
    assert_eq!(config["tsb_host"]["source"], "env:THINGVERSE_TSB_HOST");
    assert_eq!(config["token"]["value"], "abcd...wxyz");
    assert_eq!(config["token"]["source"], "cli");
    assert_eq!(config["default_dt"]["value"], "PT1H");
    assert_eq!(config["batch_size"]["value"], 20);
}

#[test]
fn test_config_human_output_masks_token() {
    TestEnv::new()
        .tv()
        .env("THINGVERSE_TOKEN", "abcdefghijklmnopqrstuvwxyz")
        .args(["-H", "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("token: abcd...wxyz (env:THINGVERSE_TOKEN)"))
        .stdout(predicate::str::contains("abcdefghijklmnop").not());
}

#[test]
fn test_invalid_config_file_is_reported() {
    TestEnv::new()
        .with_config("batch-size 0\n")
        .tv()
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_fetch_rejects_bad_start() {
    TestEnv::new()
        .tv()
        .args(["-H", "fetch", "--start", "yesterday-ish", "FA"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}
