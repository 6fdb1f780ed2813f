//! CLI argument definitions for Thingverse.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::models::tree::DEFAULT_TREE_DEPTH;

/// Version with the commit and time of the build.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("THINGVERSE_GIT_COMMIT"),
    ", built ",
    env!("THINGVERSE_BUILD_TIMESTAMP"),
    ")"
);

/// Thingverse - browse vessels and download their signals.
///
/// Start with `thingverse vessels`, then `thingverse signals <vessel>` to see
/// what can be fetched.
#[derive(Parser, Debug)]
#[command(name = "thingverse")]
#[command(author, version, about = "Query the Thing universe metadata and time series services", long_about = None)]
#[command(long_version = LONG_VERSION)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    pub log_json: bool,

    /// Metadata service URL (overrides THINGVERSE_META_HOST and config.kdl)
    #[arg(long = "meta-host", global = true)]
    pub meta_host: Option<String>,

    /// Time series service URL (overrides THINGVERSE_TSB_HOST and config.kdl)
    #[arg(long = "tsb-host", global = true)]
    pub tsb_host: Option<String>,

    /// Bearer token for the public endpoints (overrides THINGVERSE_TOKEN and config.kdl)
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all vessels
    Vessels,

    /// List the series paths of a vessel
    Signals {
        /// Vessel path (e.g. FA)
        vessel: String,

        /// Include test channels
        #[arg(long)]
        include_tests: bool,
    },

    /// Show the thing tree below a path
    Tree {
        /// Path of the root thing
        path: String,

        /// Number of levels to expand
        #[arg(long, default_value_t = DEFAULT_TREE_DEPTH)]
        depth: u32,
    },

    /// Download signal data for vessels
    ///
    /// Without --all only temperature, turbidity, salinity and the GPS track
    /// are fetched. Without vessel arguments every vessel is fetched.
    Fetch {
        /// Start of the window (ISO-8601, default: 15 days before --end)
        #[arg(long)]
        start: Option<String>,

        /// End of the window (ISO-8601, default: now)
        #[arg(long)]
        end: Option<String>,

        /// Aggregation window as ISO-8601 duration (PT0H for raw data)
        #[arg(long)]
        dt: Option<String>,

        /// Fetch every non-test signal instead of the curated subset
        #[arg(long)]
        all: bool,

        /// Do not fill gaps
        #[arg(long)]
        nofill: bool,

        /// Skip quality control
        #[arg(long)]
        noqc: bool,

        /// Write one CSV per vessel to <PREFIX>_<vessel>.csv
        #[arg(short = 'o', long = "output-prefix")]
        output_prefix: Option<String>,

        /// Vessel paths
        vessels: Vec<String>,
    },

    /// Show the resolved configuration and where each value came from
    Config,
}
