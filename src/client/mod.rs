//! Service seams for the metadata and time series back-ends.
//!
//! The rest of the crate talks to the remote services only through the
//! [`MetadataService`] and [`TimeSeriesService`] traits. The blocking HTTP
//! implementations live in [`metaflow`] and [`tsb`]; tests substitute
//! in-memory fakes.

pub mod metaflow;
pub mod tsb;

use serde_json::{Map, Value};

use crate::{Error, Result};

pub use metaflow::HttpMetadataService;
pub use tsb::HttpTimeSeriesService;

/// Client version tag sent with every request.
pub const USER_AGENT: &str = concat!("thingverse/", env!("CARGO_PKG_VERSION"));

/// Header carrying the per-request trace identifier.
pub const TRACE_ID_HEADER: &str = "Trace-Id";

/// Maximum number of uuids sent in one request; URL length is limited.
pub const MAX_UUIDS_PER_REQUEST: usize = 80;

/// Public API base for the ferrybox deployment.
pub const PUBLIC_API_BASE: &str = "https://ferrybox-api.niva.no";

/// Public metadata endpoint.
pub const PUB_META: &str = "https://ferrybox-api.niva.no/v1/metaflow/";

/// Public vessel listing endpoint.
pub const PUB_PLATFORM: &str = "https://ferrybox-api.niva.no/v1/vessels";

/// Public detail endpoint; takes the uuid as the last path segment.
pub const PUB_DETAIL: &str = "https://ferrybox-api.niva.no/v1/details/";

/// Public time series endpoint.
pub const PUB_TSB: &str = "https://ferrybox-api.niva.no/v1/tsb/";

/// Ordered query parameters for a service request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Create an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Params::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Set `key`, replacing an earlier value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Look up the value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    /// Merge `other` into `self`; values in `other` win.
    pub fn extend(&mut self, other: &Params) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// JSON object form, used as request context in errors.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }
}

impl std::fmt::Display for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{}", parts.join("&"))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// The metadata ("metaflow") service.
///
/// Every method returns the content of the `t` key of the response body.
pub trait MetadataService {
    /// Query things; the result is a thing, a list of things, or a tree.
    fn get(&self, params: &Params) -> Result<Value>;

    /// Create (no uuid) or update (uuid present) a thing.
    fn update(&self, thing: &Value) -> Result<Value>;

    /// Delete a thing; the server keeps `part_of` links consistent.
    fn delete(&self, thing: &Value) -> Result<Value>;
}

/// The time series ("tsb") service.
pub trait TimeSeriesService {
    /// Query signal rows; every row carries a `time` key.
    fn query(&self, params: &Params) -> Result<Vec<Map<String, Value>>>;

    /// Query rows by insertion time (`time-series-by-insert-time`).
    fn inserted(&self, params: &Params) -> Result<Vec<Map<String, Value>>>;
}

/// Credentials and trace headers shared by both HTTP clients.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    /// Bearer token passed through unmodified; internal deployments omit it.
    pub bearer_token: Option<String>,
}

impl RequestHeaders {
    pub fn new(bearer_token: Option<String>) -> Self {
        Self { bearer_token }
    }

    /// Headers for one request, with a freshly generated trace id.
    pub fn for_request(&self) -> (String, Vec<(&'static str, String)>) {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let mut headers = vec![
            (TRACE_ID_HEADER, trace_id.clone()),
            ("User-Agent", USER_AGENT.to_string()),
        ];
        if let Some(ref token) = self.bearer_token {
            let value = if token.starts_with("Bearer ") {
                token.clone()
            } else {
                format!("Bearer {}", token)
            };
            headers.push(("Authorization", value));
        }
        (trace_id, headers)
    }
}

/// Turn a non-success HTTP response into [`Error::RemoteService`].
///
/// JSON bodies contribute their `message` and `req_args`; anything else is
/// carried verbatim.
pub(crate) fn remote_error(code: u16, response: ureq::Response, trace_id: &str) -> Error {
    let is_json = response.content_type().contains("application/json");
    let body = response.into_string().unwrap_or_default();
    if is_json {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&body) {
            let message = match map.get("message") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => Value::Object(map.clone()).to_string(),
            };
            return Error::RemoteService {
                message,
                trace_id: Some(trace_id.to_string()),
                req_args: map.get("req_args").cloned(),
            };
        }
    }
    Error::RemoteService {
        message: format!("HTTP {}: {}", code, body),
        trace_id: Some(trace_id.to_string()),
        req_args: None,
    }
}

/// Map a ureq failure to the crate error type.
pub(crate) fn call_error(err: ureq::Error, trace_id: &str) -> Error {
    match err {
        ureq::Error::Status(code, response) => remote_error(code, response, trace_id),
        ureq::Error::Transport(t) => Error::Transport(t.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_set_replaces_in_place() {
        let mut params = Params::new().with("path", "FA").with("ttype", "vessel");
        params.set("path", "TF");

        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("path", "TF"), ("ttype", "vessel")]);
    }

    #[test]
    fn test_params_remove_and_display() {
        let mut params: Params = [("uuid", "abc"), ("parts", "100")].into_iter().collect();
        assert_eq!(params.remove("uuid"), Some("abc".to_string()));
        assert_eq!(params.remove("uuid"), None);
        assert_eq!(params.to_string(), "parts=100");
    }

    #[test]
    fn test_params_extend_overrides() {
        let mut params = Params::new().with("ttype", "vessel").with("path", "FA");
        params.extend(&Params::new().with("path", "TF").with("parts", 1));

        assert_eq!(params.get("path"), Some("TF"));
        assert_eq!(params.get("parts"), Some("1"));
        assert_eq!(params.to_value()["ttype"], "vessel");
    }

    #[test]
    fn test_request_headers_carry_trace_and_version() {
        let (trace_id, headers) = RequestHeaders::default().for_request();

        assert!(uuid::Uuid::parse_str(&trace_id).is_ok());
        assert!(headers.contains(&(TRACE_ID_HEADER, trace_id.clone())));
        assert!(headers.iter().any(|(k, v)| *k == "User-Agent" && v.starts_with("thingverse/")));
        assert!(!headers.iter().any(|(k, _)| *k == "Authorization"));
    }

    #[test]
    fn test_request_headers_pass_token_through() {
        let headers = RequestHeaders::new(Some("Bearer abc.def".to_string()));
        let (_, headers) = headers.for_request();
        assert!(headers.contains(&("Authorization", "Bearer abc.def".to_string())));

        let headers = RequestHeaders::new(Some("abc.def".to_string()));
        let (_, headers) = headers.for_request();
        assert!(headers.contains(&("Authorization", "Bearer abc.def".to_string())));
    }

    #[test]
    fn test_trace_ids_are_unique_per_request() {
        let headers = RequestHeaders::default();
        let (a, _) = headers.for_request();
        let (b, _) = headers.for_request();
        assert_ne!(a, b);
    }
}
