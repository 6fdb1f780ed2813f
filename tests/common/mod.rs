//! Common test utilities for thingverse integration tests.
//!
//! Provides in-memory service fakes for library tests and `TestEnv`, an
//! isolated config directory for CLI tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;

use assert_cmd::Command;
use serde_json::{Map, Value, json};
pub use tempfile::TempDir;
use thingverse::{Error, MetadataService, Params, Result, TimeSeriesService};

/// Metadata service answering from canned payloads.
#[derive(Default)]
pub struct MemoryMeta {
    by_path: HashMap<String, Value>,
    trees: HashMap<String, Value>,
    pub requests: RefCell<Vec<Params>>,
}

impl MemoryMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path=<path>` lookups with `thing`.
    pub fn thing(mut self, path: &str, thing: Value) -> Self {
        self.by_path.insert(path.to_string(), thing);
        self
    }

    /// Answer tree queries for `uuid` with `tree`.
    pub fn tree(mut self, uuid: &str, tree: Value) -> Self {
        self.trees.insert(uuid.to_string(), tree);
        self
    }
}

impl MetadataService for MemoryMeta {
    fn get(&self, params: &Params) -> Result<Value> {
        self.requests.borrow_mut().push(params.clone());
        if params.contains("parts") {
            if let Some(tree) = params.get("uuid").and_then(|u| self.trees.get(u)) {
                return Ok(tree.clone());
            }
        }
        if let Some(thing) = params.get("path").and_then(|p| self.by_path.get(p)) {
            return Ok(thing.clone());
        }
        Ok(json!([]))
    }

    fn update(&self, thing: &Value) -> Result<Value> {
        Ok(thing.clone())
    }

    fn delete(&self, thing: &Value) -> Result<Value> {
        Ok(thing.clone())
    }
}

/// Time series service merging the rows of the requested uuids per time.
#[derive(Default)]
pub struct MemoryTsb {
    rows: HashMap<String, Vec<Map<String, Value>>>,
    failing: Vec<String>,
    pub requests: RefCell<Vec<Params>>,
}

impl MemoryTsb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(mut self, uuid: &str, rows: Value) -> Self {
        let rows = rows
            .as_array()
            .map(|items| items.iter().filter_map(|r| r.as_object().cloned()).collect())
            .unwrap_or_default();
        self.rows.insert(uuid.to_string(), rows);
        self
    }

    pub fn failing(mut self, uuid: &str) -> Self {
        self.failing.push(uuid.to_string());
        self
    }

    /// Number of uuids in each query so far.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.requests
            .borrow()
            .iter()
            .map(|p| p.get("uuid").map(|u| u.split(',').count()).unwrap_or(0))
            .collect()
    }
}

impl TimeSeriesService for MemoryTsb {
    fn query(&self, params: &Params) -> Result<Vec<Map<String, Value>>> {
        self.requests.borrow_mut().push(params.clone());
        let uuids: Vec<&str> = params
            .get("uuid")
            .map(|u| u.split(',').collect())
            .unwrap_or_default();
        if uuids.iter().any(|u| self.failing.iter().any(|f| f == u)) {
            return Err(Error::RemoteService {
                message: "internal server error".to_string(),
                trace_id: Some("trace-test".to_string()),
                req_args: None,
            });
        }
        let mut out: Vec<Map<String, Value>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for uuid in uuids {
            for row in self.rows.get(uuid).into_iter().flatten() {
                let time = row.get("time").map(|t| t.to_string()).unwrap_or_default();
                match index.get(&time) {
                    Some(&i) => out[i].extend(row.clone()),
                    None => {
                        index.insert(time, out.len());
                        out.push(row.clone());
                    }
                }
            }
        }
        Ok(out)
    }

    fn inserted(&self, params: &Params) -> Result<Vec<Map<String, Value>>> {
        self.requests.borrow_mut().push(params.clone());
        Ok(Vec::new())
    }
}

/// A CLI environment with its own config directory.
///
/// Service host variables are cleared so that only what a test sets is
/// visible to the binary.
pub struct TestEnv {
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Write `content` to `thingverse/config.kdl` below the config dir.
    pub fn with_config(self, content: &str) -> Self {
        let dir = self.config_dir.path().join("thingverse");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.kdl"), content).unwrap();
        self
    }

    /// Get a Command for the thingverse binary with isolated config.
    pub fn tv(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_thingverse"));
        cmd.env("XDG_CONFIG_HOME", self.config_dir.path());
        cmd.env("HOME", self.config_dir.path());
        for var in [
            "THINGVERSE_META_HOST",
            "THINGVERSE_TSB_HOST",
            "THINGVERSE_TOKEN",
            "METAFLOW_SERVICE_HOST",
            "METAFLOW_SERVICE_PORT",
            "TSB_SERVICE_HOST",
            "TSB_SERVICE_PORT",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
