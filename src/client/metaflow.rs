//! Blocking HTTP client for the metadata ("metaflow") service.
//!
//! - `GET <host>?<params>` returns `{"t": <thing | [thing] | tree>}`
//! - `PUT <host>` with a thing body creates or updates it
//! - `DELETE <host>` with a thing body deletes it
//!
//! A body without `t` is an error even when the HTTP status is 200.

use serde_json::Value;
use tracing::{debug, error};

use super::{MetadataService, PUB_DETAIL, Params, RequestHeaders, call_error};
use crate::{Error, Result};

/// Metadata service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataService {
    host: String,
    headers: RequestHeaders,
    agent: ureq::Agent,
}

impl HttpMetadataService {
    /// Create a client for `host` (e.g. `http://localhost:5556/`).
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

    /// URL and parameters for a GET.
    ///
    /// The public detail endpoint addresses a thing by path segment, so a
    /// `uuid` parameter moves into the URL there.
    pub fn request_target(&self, params: &Params) -> (String, Params) {
        let mut params = params.clone();
        if self.host.starts_with(PUB_DETAIL) {
            if let Some(uuid) = params.remove("uuid") {
                return (format!("{}{}", self.host, uuid), params);
            }
        }
        (self.host.clone(), params)
    }

    fn send_body(&self, method: &str, thing: &Value) -> Result<(Value, String)> {
        let (trace_id, headers) = self.headers.for_request();
        let mut request = self.agent.request(method, &self.host);
        for (name, value) in &headers {
            request = request.set(name, value);
        }
        debug!(method, host = %self.host, trace_id = %trace_id, "metadata request");

        let response = request
            .send_json(thing)
            .map_err(|e| call_error(e, &trace_id))?;
        let body: Value = response.into_json()?;
        Ok((body, trace_id))
    }
}

impl MetadataService for HttpMetadataService {
    fn get(&self, params: &Params) -> Result<Value> {
        let (url, query) = self.request_target(params);
        let (trace_id, headers) = self.headers.for_request();

        let mut request = self.agent.get(&url);
        for (name, value) in &headers {
            request = request.set(name, value);
        }
        for (key, value) in query.iter() {
            request = request.query(key, value);
        }
        debug!(url = %url, params = %query, trace_id = %trace_id, "metadata query");

        let response = request.call().map_err(|e| call_error(e, &trace_id))?;
        let body: Value = response.into_json()?;
        take_t(body).ok_or_else(|| Error::RemoteService {
            message: format!("Could not find metadata for requested parameters {}", params),
            trace_id: Some(trace_id),
            req_args: Some(params.to_value()),
        })
    }

    fn update(&self, thing: &Value) -> Result<Value> {
        let (body, trace_id) = self.send_body("PUT", thing)?;
        if let Some(t) = body.get("t") {
            return Ok(t.clone());
        }
        error!(thing = %thing, "was not able to update thing");
        let message = if body.get("code").is_some() {
            "PUT method not available through endpoint".to_string()
        } else {
            body.to_string()
        };
        Err(Error::RemoteService {
            message,
            trace_id: Some(trace_id),
            req_args: Some(body),
        })
    }

    fn delete(&self, thing: &Value) -> Result<Value> {
        let (body, trace_id) = self.send_body("DELETE", thing)?;
        if let Some(t) = body.get("t") {
            return Ok(t.clone());
        }
        error!(thing = %thing, "error when trying to delete thing");
        Err(Error::RemoteService {
            message: body.to_string(),
            trace_id: Some(trace_id),
            req_args: None,
        })
    }
}

/// Extract the `t` payload of a service response.
pub(crate) fn take_t(body: Value) -> Option<Value> {
    match body {
        Value::Object(mut map) => map.remove("t"),
        _ => None,
    }
}
