//! Configuration for the service clients.
//!
//! ## config.kdl
//!
//! Located at `~/.config/thingverse/config.kdl` (platform config dir).
//!
//! Contains:
//! - `meta-host` - Metadata service URL
//! - `tsb-host` - Time series service URL
//! - `token` - Bearer token for the public endpoints
//! - `default-dt` - Aggregation window when a fetch gives none
//! - `batch-size` - Maximum uuids per time series request
//!
//! ## Precedence
//!
//! CLI flag > `THINGVERSE_*` env var > config.kdl > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, META_HOST_ENV, Resolved, ResolvedConfig, TOKEN_ENV, TSB_HOST_ENV,
    ValueSource, resolve, resolve_config,
};
pub use schema::{ThingverseConfig, config_path};
