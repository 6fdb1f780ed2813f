//! Blocking HTTP client for the time series ("tsb") service.

use serde_json::{Map, Value};
use tracing::debug;

use super::{Params, RequestHeaders, TimeSeriesService, call_error};
use crate::{Error, Result};

/// Path (relative to the tsb host) of the insert-time query.
pub const INSERTED_PATH: &str = "time-series-by-insert-time";

/// Time series service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTimeSeriesService {
    host: String,
    headers: RequestHeaders,
    agent: ureq::Agent,
}

impl HttpTimeSeriesService {
    /// Create a client for `host` (e.g. `http://localhost:5555/ts/`).
    pub fn new(host: impl Into<String>, headers: RequestHeaders) -> Self {
        Self {
            host: host.into(),
            headers,
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// URL of the insert-time endpoint below the configured host.
    pub fn inserted_url(&self) -> String {
        if self.host.ends_with('/') {
            format!("{}{}", self.host, INSERTED_PATH)
        } else {
            format!("{}/{}", self.host, INSERTED_PATH)
        }
    }

    fn get_rows(&self, url: &str, params: &Params) -> Result<Vec<Map<String, Value>>> {
        let (trace_id, headers) = self.headers.for_request();
        let mut request = self.agent.get(url);
        for (name, value) in &headers {
            request = request.set(name, value);
        }
        for (key, value) in params.iter() {
            request = request.query(key, value);
        }
        debug!(url, params = %params, trace_id = %trace_id, "time series query");

        let response = request.call().map_err(|e| call_error(e, &trace_id))?;
        let body: Value = response.into_json()?;
        rows_from_body(body, &trace_id)
    }
}

impl TimeSeriesService for HttpTimeSeriesService {
    fn query(&self, params: &Params) -> Result<Vec<Map<String, Value>>> {
        self.get_rows(&self.host, params)
    }

    fn inserted(&self, params: &Params) -> Result<Vec<Map<String, Value>>> {
        self.get_rows(&self.inserted_url(), params)
    }
}

/// Rows of a tsb response.
///
/// Data normally arrives under `t`; the insert-time endpoint answers with a
/// bare list. A `null` `t` is no data. Any other body is an error answer
/// from the service, even with a 200 status.
pub(crate) fn rows_from_body(body: Value, trace_id: &str) -> Result<Vec<Map<String, Value>>> {
    let rows = match body {
        Value::Object(mut map) => match map.remove("t") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(unexpected_body(
                    format!("Unexpected time series payload: {}", other),
                    None,
                    trace_id,
                ));
            }
            None => {
                let message = match map.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => Value::Object(map.clone()).to_string(),
                };
                return Err(unexpected_body(message, map.remove("req_args"), trace_id));
            }
        },
        Value::Array(rows) => rows,
        other => {
            return Err(unexpected_body(
                format!("Unexpected time series response: {}", other),
                None,
                trace_id,
            ));
        }
    };
    Ok(rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

fn unexpected_body(message: String, req_args: Option<Value>, trace_id: &str) -> Error {
    Error::RemoteService {
        message,
        trace_id: Some(trace_id.to_string()),
        req_args,
    }
}
