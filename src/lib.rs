//! Thingverse - object oriented access to the Thing universe.
//!
//! This library provides the core functionality for the `thingverse` CLI tool:
//! typed entities fetched from the metadata service, resolution of platform
//! trees into flat lists of time series, and retrieval of signal data into
//! time aligned tables.

pub mod assemble;
pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod models;
pub mod table;
pub mod things;

pub use assemble::{QualityFilter, ShipDataRequest, assemble, available_parameters, get_ship_data};
pub use client::{MetadataService, Params, TimeSeriesService};
pub use fetch::{HeaderNaming, TimeSeriesQuery, fetch};
pub use models::tree::{SeriesCatalog, ThingTree, get_all_time_series};
pub use models::{Dispatched, Thing, ThingType, dispatch};
pub use table::SignalTable;

/// Test utilities shared by unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use serde_json::{Map, Value, json};

    use crate::client::{MetadataService, Params, TimeSeriesService};
    use crate::{Error, Result};

    /// In-memory metadata service.
    ///
    /// GET requests are answered from a list of canned responses keyed by a
    /// single query parameter; every request is recorded for inspection.
    #[derive(Default)]
    pub struct FakeMeta {
        pub responses: Vec<(String, String, Value)>,
        pub trees: HashMap<String, Value>,
        pub requests: RefCell<Vec<Params>>,
        pub updates: RefCell<Vec<Value>>,
        pub deletes: RefCell<Vec<Value>>,
        next_uuid: RefCell<u32>,
    }

    impl FakeMeta {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer GETs carrying `key=value` with `t`.
        pub fn respond(mut self, key: &str, value: &str, t: Value) -> Self {
            self.responses.push((key.to_string(), value.to_string(), t));
            self
        }

        /// Answer tree queries (`uuid=<uuid>&parts=N`) with `tree`.
        pub fn tree(mut self, uuid: &str, tree: Value) -> Self {
            self.trees.insert(uuid.to_string(), tree);
            self
        }
    }

    impl MetadataService for FakeMeta {
        fn get(&self, params: &Params) -> Result<Value> {
            self.requests.borrow_mut().push(params.clone());
            if params.get("parts").is_some() {
                if let Some(uuid) = params.get("uuid") {
                    if let Some(tree) = self.trees.get(uuid) {
                        return Ok(tree.clone());
                    }
                }
            }
            for (key, value, t) in &self.responses {
                if params.get(key) == Some(value.as_str()) {
                    return Ok(t.clone());
                }
            }
            Ok(json!([]))
        }

        fn update(&self, thing: &Value) -> Result<Value> {
            self.updates.borrow_mut().push(thing.clone());
            let mut saved = thing.clone();
            if saved.get("uuid").is_none() {
                let mut next = self.next_uuid.borrow_mut();
                *next += 1;
                saved["uuid"] = json!(format!("new-{}", *next));
            }
            Ok(saved)
        }

        fn delete(&self, thing: &Value) -> Result<Value> {
            self.deletes.borrow_mut().push(thing.clone());
            Ok(thing.clone())
        }
    }

    /// In-memory time series service returning rows per uuid.
    ///
    /// Rows of all requested uuids are merged per `time`, one output row
    /// per distinct time in first-seen order.
    #[derive(Default)]
    pub struct FakeTsb {
        pub rows: HashMap<String, Vec<Map<String, Value>>>,
        pub inserted_rows: Vec<Map<String, Value>>,
        pub failing: Vec<String>,
        pub requests: RefCell<Vec<Params>>,
    }

    impl FakeTsb {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register rows (as JSON objects) served for `uuid`.
        pub fn series(mut self, uuid: &str, rows: Value) -> Self {
            self.rows.insert(uuid.to_string(), objects(rows));
            self
        }

        /// Rows served by the insert-time endpoint.
        pub fn with_inserted(mut self, rows: Value) -> Self {
            self.inserted_rows = objects(rows);
            self
        }

        /// Make every query touching `uuid` fail with a remote error.
        pub fn failing(mut self, uuid: &str) -> Self {
            self.failing.push(uuid.to_string());
            self
        }
    }

    impl TimeSeriesService for FakeTsb {
        fn query(&self, params: &Params) -> Result<Vec<Map<String, Value>>> {
            self.requests.borrow_mut().push(params.clone());
            let uuids: Vec<&str> = params
                .get("uuid")
                .map(|u| u.split(',').collect())
                .unwrap_or_default();
            if uuids.iter().any(|u| self.failing.iter().any(|f| f == u)) {
                return Err(Error::RemoteService {
                    message: "series unavailable".to_string(),
                    trace_id: Some("trace-1".to_string()),
                    req_args: None,
                });
            }
            let mut out: Vec<Map<String, Value>> = Vec::new();
            let mut by_time: HashMap<String, usize> = HashMap::new();
            for uuid in uuids {
                for row in self.rows.get(uuid).into_iter().flatten() {
                    let time = row.get("time").map(|t| t.to_string()).unwrap_or_default();
                    match by_time.get(&time) {
                        Some(&i) => out[i].extend(row.clone()),
                        None => {
                            by_time.insert(time, out.len());
                            out.push(row.clone());
                        }
                    }
                }
            }
            Ok(out)
        }

        fn inserted(&self, params: &Params) -> Result<Vec<Map<String, Value>>> {
            self.requests.borrow_mut().push(params.clone());
            Ok(self.inserted_rows.clone())
        }
    }

    fn objects(rows: Value) -> Vec<Map<String, Value>> {
        match rows {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|row| match row {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Library-level error type for Thingverse operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// An entity payload carried a type tag outside the known set.
    #[error("{0} is not a valid thing type")]
    EntityType(String),

    /// A dispatch input was neither a tagged object nor a list of them.
    #[error("Unknown data type passed, must be a thing object or a list of thing objects: {0}")]
    EntityShape(String),

    /// A lookup that must be unique matched several entities.
    #[error("Thing not unique, {count} things match search {params}")]
    AmbiguousEntity { count: usize, params: String },

    /// A tree referenced a uuid that the walk never materialised.
    #[error("Inconsistent thing tree: part {0} could not be resolved")]
    TreeConsistency(String),

    /// Non-success answer from the metadata or time series service.
    #[error(
        "Error calling API: {message}.\n\nPlease contact support for assistance and include the following trace id: {}",
        .trace_id.as_deref().unwrap_or("none")
    )]
    RemoteService {
        message: String,
        trace_id: Option<String>,
        req_args: Option<serde_json::Value>,
    },

    /// The request never produced an HTTP status (DNS, connect, TLS...).
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for Thingverse operations.
pub type Result<T> = std::result::Result<T, Error>;
