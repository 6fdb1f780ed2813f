//! KDL schema for config.kdl.
//!
//! This module provides:
//! - The [`ThingverseConfig`] struct mirroring the file
//! - Parsing from KDL documents
//! - Validation of values read from disk

use std::fs;
use std::path::{Path, PathBuf};

use kdl::KdlDocument;

use crate::{Error, Result};

/// Directory name below the platform config dir.
pub const CONFIG_DIR_NAME: &str = "thingverse";

/// File name of the config file.
pub const CONFIG_FILE_NAME: &str = "config.kdl";

/// Service endpoints and query defaults stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// meta-host "https://ferrybox-api.niva.no/v1/metaflow/"
/// tsb-host "https://ferrybox-api.niva.no/v1/tsb/"
/// token "eyJhbGciOi..."
/// default-dt "PT1H"
/// batch-size 80
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThingverseConfig {
    /// Metadata service URL
    pub meta_host: Option<String>,

    /// Time series service URL
    pub tsb_host: Option<String>,

    /// Bearer token for the public endpoints (sensitive!)
    pub token: Option<String>,

    /// Aggregation window used when a fetch does not give one
    pub default_dt: Option<String>,

    /// Maximum uuids per time series request
    pub batch_size: Option<usize>,
}

impl ThingverseConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.batch_size == Some(0) {
            return Err("batch-size must be at least 1".to_string());
        }
        if let Some(dt) = &self.default_dt {
            if !dt.starts_with('P') {
                return Err(format!("default-dt must be an ISO-8601 duration, got {}", dt));
            }
        }
        for (key, host) in [("meta-host", &self.meta_host), ("tsb-host", &self.tsb_host)] {
            if let Some(host) = host {
                if !host.starts_with("http://") && !host.starts_with("https://") {
                    return Err(format!("{} must be an http(s) URL, got {}", key, host));
                }
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown nodes are ignored; values of the wrong type are skipped.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let string = |key: &str| {
            doc.get(key)
                .and_then(|node| node.entries().first())
                .and_then(|entry| entry.value().as_string())
                .map(str::to_string)
        };

        let batch_size = doc
            .get("batch-size")
            .and_then(|node| node.entries().first())
            .and_then(|entry| entry.value().as_integer())
            .and_then(|i| usize::try_from(i).ok());

        Self {
            meta_host: string("meta-host"),
            tsb_host: string("tsb-host"),
            token: string("token"),
            default_dt: string("default-dt"),
            batch_size,
        }
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> Result<Self> {
        let doc: KdlDocument = content
            .parse()
            .map_err(|e| Error::Config(format!("Failed to parse config.kdl: {}", e)))?;
        let config = Self::from_kdl(&doc);
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// Read config from `path`; a missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Default location of config.kdl, if the platform has a config dir.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
