//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. `THINGVERSE_*` environment variables
//! 3. config.kdl (`~/.config/thingverse/config.kdl`)
//! 4. Built-in defaults
//!
//! The built-in hosts point at the internal deployment and are assembled
//! from the `METAFLOW_SERVICE_*` and `TSB_SERVICE_*` variables.

use std::path::Path;

use serde_json::{Value, json};

use crate::Result;
use crate::client::MAX_UUIDS_PER_REQUEST;
use crate::config::schema::{ThingverseConfig, config_path};

/// Environment variable overriding the metadata host.
pub const META_HOST_ENV: &str = "THINGVERSE_META_HOST";
/// Environment variable overriding the time series host.
pub const TSB_HOST_ENV: &str = "THINGVERSE_TSB_HOST";
/// Environment variable holding the bearer token.
pub const TOKEN_ENV: &str = "THINGVERSE_TOKEN";

pub const METAFLOW_SERVICE_HOST_ENV: &str = "METAFLOW_SERVICE_HOST";
pub const METAFLOW_SERVICE_PORT_ENV: &str = "METAFLOW_SERVICE_PORT";
pub const TSB_SERVICE_HOST_ENV: &str = "TSB_SERVICE_HOST";
pub const TSB_SERVICE_PORT_ENV: &str = "TSB_SERVICE_PORT";

const DEFAULT_SERVICE_HOST: &str = "localhost";
const DEFAULT_METAFLOW_PORT: &str = "5556";
const DEFAULT_TSB_PORT: &str = "5555";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config file
    File(String),
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::File(path) => write!(f, "file:{}", path),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub meta_host: Resolved<String>,
    pub tsb_host: Resolved<String>,
    pub token: Option<Resolved<String>>,
    pub default_dt: Option<Resolved<String>>,
    pub batch_size: Resolved<usize>,
}

impl ResolvedConfig {
    pub fn meta_host(&self) -> &str {
        &self.meta_host.value
    }

    pub fn tsb_host(&self) -> &str {
        &self.tsb_host.value
    }

    /// Get the token value, if set.
    pub fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|r| r.value.as_str())
    }

    pub fn default_dt(&self) -> Option<&str> {
        self.default_dt.as_ref().map(|r| r.value.as_str())
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.value
    }

    /// Get the masked token for display purposes.
    pub fn masked_token(&self) -> Option<String> {
        self.token.as_ref().map(|r| mask(&r.value))
    }

    /// Values and sources as JSON; the token is masked.
    pub fn to_json(&self) -> Value {
        let entry = |value: Value, source: &ValueSource| {
            json!({"value": value, "source": source.to_string()})
        };
        json!({
            "meta_host": entry(json!(self.meta_host.value), &self.meta_host.source),
            "tsb_host": entry(json!(self.tsb_host.value), &self.tsb_host.source),
            "token": self.token.as_ref().map(|t| entry(json!(mask(&t.value)), &t.source)),
            "default_dt": self.default_dt.as_ref().map(|d| entry(json!(d.value), &d.source)),
            "batch_size": entry(json!(self.batch_size.value), &self.batch_size.source),
        })
    }
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        let head: String = chars.iter().take(4).collect();
        format!("{}...", head)
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub meta_host: Option<String>,
    pub tsb_host: Option<String>,
    pub token: Option<String>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta_host(mut self, host: impl Into<String>) -> Self {
        self.meta_host = Some(host.into());
        self
    }

    pub fn with_tsb_host(mut self, host: impl Into<String>) -> Self {
        self.tsb_host = Some(host.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Internal metadata host built from `METAFLOW_SERVICE_HOST`/`_PORT`.
pub fn default_meta_host<F>(env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let host = env(METAFLOW_SERVICE_HOST_ENV).unwrap_or_else(|| DEFAULT_SERVICE_HOST.to_string());
    let port = env(METAFLOW_SERVICE_PORT_ENV).unwrap_or_else(|| DEFAULT_METAFLOW_PORT.to_string());
    format!("http://{}:{}/", host, port)
}

/// Internal time series host built from `TSB_SERVICE_HOST`/`_PORT`.
pub fn default_tsb_host<F>(env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let host = env(TSB_SERVICE_HOST_ENV).unwrap_or_else(|| DEFAULT_SERVICE_HOST.to_string());
    let port = env(TSB_SERVICE_PORT_ENV).unwrap_or_else(|| DEFAULT_TSB_PORT.to_string());
    format!("http://{}:{}/ts/", host, port)
}

/// Resolve configuration from explicit inputs.
///
/// `file_path` only labels values taken from `file`. `env` looks up
/// environment variables; empty values count as unset.
pub fn resolve<F>(
    file: &ThingverseConfig,
    file_path: Option<&Path>,
    overrides: &ConfigOverrides,
    env: F,
) -> ResolvedConfig
where
    F: Fn(&str) -> Option<String>,
{
    let env = |name: &str| env(name).filter(|v| !v.is_empty());
    let file_source = || {
        ValueSource::File(
            file_path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config.kdl".to_string()),
        )
    };
    let pick = |cli: &Option<String>, var: &str, from_file: &Option<String>| {
        if let Some(value) = cli {
            Some(Resolved::new(value.clone(), ValueSource::CliFlag))
        } else if let Some(value) = env(var) {
            Some(Resolved::new(value, ValueSource::EnvVar(var.to_string())))
        } else {
            from_file
                .as_ref()
                .map(|value| Resolved::new(value.clone(), file_source()))
        }
    };

    let meta_host = pick(&overrides.meta_host, META_HOST_ENV, &file.meta_host)
        .unwrap_or_else(|| Resolved::new(default_meta_host(env), ValueSource::Default));
    let tsb_host = pick(&overrides.tsb_host, TSB_HOST_ENV, &file.tsb_host)
        .unwrap_or_else(|| Resolved::new(default_tsb_host(env), ValueSource::Default));
    let token = pick(&overrides.token, TOKEN_ENV, &file.token);

    let default_dt = file
        .default_dt
        .as_ref()
        .map(|dt| Resolved::new(dt.clone(), file_source()));
    let batch_size = match file.batch_size {
        Some(size) => Resolved::new(size, file_source()),
        None => Resolved::new(MAX_UUIDS_PER_REQUEST, ValueSource::Default),
    };

    ResolvedConfig {
        meta_host,
        tsb_host,
        token,
        default_dt,
        batch_size,
    }
}

/// Resolve configuration from the default config file and the process
/// environment.
pub fn resolve_config(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let path = config_path();
    let file = match &path {
        Some(path) => ThingverseConfig::load(path)?,
        None => ThingverseConfig::new(),
    };
    Ok(resolve(&file, path.as_deref(), overrides, |name| {
        std::env::var(name).ok()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn file_config() -> ThingverseConfig {
        ThingverseConfig {
            meta_host: Some("https://file-meta/".to_string()),
            tsb_host: Some("https://file-tsb/".to_string()),
            token: Some("file-token".to_string()),
            default_dt: Some("PT1H".to_string()),
            batch_size: Some(20),
        }
    }

    #[test]
    fn test_value_source_display() {
        assert_eq!(
            format!("{}", ValueSource::EnvVar("FOO".to_string())),
            "env:FOO"
        );
        assert_eq!(format!("{}", ValueSource::File("/x".to_string())), "file:/x");
        assert_eq!(format!("{}", ValueSource::CliFlag), "cli");
        assert_eq!(format!("{}", ValueSource::Default), "default");
    }

    #[test]
    fn test_resolve_defaults() {
        let config = resolve(
            &ThingverseConfig::new(),
            None,
            &ConfigOverrides::new(),
            env_of(&[]),
        );

        assert_eq!(config.meta_host(), "http://localhost:5556/");
        assert_eq!(config.tsb_host(), "http://localhost:5555/ts/");
        assert_eq!(config.meta_host.source, ValueSource::Default);
        assert!(config.token.is_none());
        assert!(config.default_dt.is_none());
        assert_eq!(config.batch_size(), 80);
    }

    #[test]
    fn test_default_hosts_follow_service_env() {
        let env = env_of(&[
            ("METAFLOW_SERVICE_HOST", "metaflow"),
            ("METAFLOW_SERVICE_PORT", "80"),
            ("TSB_SERVICE_HOST", "tsb"),
        ]);
        let config = resolve(&ThingverseConfig::new(), None, &ConfigOverrides::new(), env);
        assert_eq!(config.meta_host(), "http://metaflow:80/");
        assert_eq!(config.tsb_host(), "http://tsb:5555/ts/");
        assert_eq!(config.tsb_host.source, ValueSource::Default);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = PathBuf::from("/etc/thingverse/config.kdl");
        let config = resolve(&file_config(), Some(&path), &ConfigOverrides::new(), env_of(&[]));

        assert_eq!(config.meta_host(), "https://file-meta/");
        assert_eq!(
            config.meta_host.source,
            ValueSource::File("/etc/thingverse/config.kdl".to_string())
        );
        assert_eq!(config.token(), Some("file-token"));
        assert_eq!(config.default_dt(), Some("PT1H"));
        assert_eq!(config.batch_size(), 20);
    }

    #[test]
    fn test_env_overrides_file() {
        let env = env_of(&[
            ("THINGVERSE_META_HOST", "https://env-meta/"),
            ("THINGVERSE_TOKEN", ""),
        ]);
        let config = resolve(&file_config(), None, &ConfigOverrides::new(), env);

        assert_eq!(config.meta_host(), "https://env-meta/");
        assert_eq!(
            config.meta_host.source,
            ValueSource::EnvVar("THINGVERSE_META_HOST".to_string())
        );
        assert_eq!(config.token(), Some("file-token"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_of(&[("THINGVERSE_TSB_HOST", "https://env-tsb/")]);
        let overrides = ConfigOverrides::new()
            .with_tsb_host("https://cli-tsb/")
            .with_token("cli-token");
        let config = resolve(&file_config(), None, &overrides, env);

        assert_eq!(config.tsb_host(), "https://cli-tsb/");
        assert_eq!(config.tsb_host.source, ValueSource::CliFlag);
        assert_eq!(config.token(), Some("cli-token"));
    }

    #[test]
    fn test_masked_token() {
        let overrides = ConfigOverrides::new().with_token("abcdefghijklmnopqrstuvwxyz");
        let config = resolve(&ThingverseConfig::new(), None, &overrides, env_of(&[]));
        assert_eq!(config.masked_token().as_deref(), Some("abcd...wxyz"));

        let short = ConfigOverrides::new().with_token("abcdef");
        let config = resolve(&ThingverseConfig::new(), None, &short, env_of(&[]));
        assert_eq!(config.masked_token().as_deref(), Some("abcd..."));

        let json = config.to_json();
        assert_eq!(json["token"]["value"], "abcd...");
        assert_eq!(json["token"]["source"], "cli");
        assert_eq!(json["batch_size"]["value"], 80);
    }
}
