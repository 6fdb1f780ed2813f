//! Command implementations for the Thingverse CLI.
//!
//! Each command returns a result type implementing [`Output`], rendered by
//! `main` as JSON (default) or human-readable text.

use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::assemble::{
    CURATED_SIGNALS, QualityFilter, ShipDataRequest, available_parameters, paths_measurements,
    select_signals, ship_data_from_catalog,
};
use crate::client::{
    HttpMetadataService, HttpTimeSeriesService, MetadataService, Params, RequestHeaders,
    TimeSeriesService,
};
use crate::config::ResolvedConfig;
use crate::fetch::TimeSeriesQuery;
use crate::models::{Thing, ThingType, parse_timestamp};
use crate::table::SignalTable;
use crate::things;
use crate::Result;

/// Default length of the fetch window.
pub const DEFAULT_WINDOW_DAYS: i64 = 15;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Service clients and defaults shared by all commands.
pub struct Services {
    pub meta: Box<dyn MetadataService>,
    pub tsb: Box<dyn TimeSeriesService>,
    pub default_dt: Option<String>,
    pub batch_size: usize,
}

impl Services {
    /// HTTP clients for the resolved hosts.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let headers = RequestHeaders::new(config.token().map(str::to_string));
        Self {
            meta: Box::new(HttpMetadataService::new(config.meta_host(), headers.clone())),
            tsb: Box::new(HttpTimeSeriesService::new(config.tsb_host(), headers)),
            default_dt: config.default_dt().map(str::to_string),
            batch_size: config.batch_size(),
        }
    }
}

// === vessels ===

#[derive(Debug, Serialize)]
pub struct VesselEntry {
    pub path: Option<String>,
    pub name: Option<String>,
    pub uuid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VesselList {
    pub count: usize,
    pub vessels: Vec<VesselEntry>,
}

impl Output for VesselList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} vessel(s):", self.count)];
        for v in &self.vessels {
            lines.push(format!(
                "  {} ({})",
                v.path.as_deref().or(v.name.as_deref()).unwrap_or("?"),
                v.uuid.as_deref().unwrap_or("unsaved")
            ));
        }
        lines.join("\n")
    }
}

/// List all vessels.
pub fn vessels(services: &Services) -> Result<VesselList> {
    let vessels: Vec<VesselEntry> = things::list(services.meta.as_ref(), ThingType::Vessel, &Params::new())?
        .into_iter()
        .map(|v| VesselEntry {
            path: v.path,
            name: v.name,
            uuid: v.uuid,
        })
        .collect();
    Ok(VesselList {
        count: vessels.len(),
        vessels,
    })
}

// === signals ===

#[derive(Debug, Serialize)]
pub struct SignalList {
    pub vessel: String,
    pub count: usize,
    pub signals: Vec<String>,
}

impl Output for SignalList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!("{} signal(s) for {}:", self.count, self.vessel)];
        lines.extend(self.signals.iter().map(|s| format!("  {}", s)));
        lines.join("\n")
    }
}

/// Series paths of a vessel.
pub fn signals(services: &Services, vessel: &str, include_tests: bool) -> Result<SignalList> {
    let signals = available_parameters(services.meta.as_ref(), vessel, !include_tests)?;
    Ok(SignalList {
        vessel: vessel.to_string(),
        count: signals.len(),
        signals,
    })
}

// === tree ===

#[derive(Debug)]
pub struct TreeView {
    pub root: Thing,
}

impl Output for TreeView {
    fn to_json(&self) -> String {
        self.root.as_value(false).to_string()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        render_tree(&self.root, 0, &mut lines);
        lines.join("\n")
    }
}

fn render_tree(thing: &Thing, depth: usize, lines: &mut Vec<String>) {
    lines.push(format!(
        "{}{} [{}]",
        "  ".repeat(depth),
        thing.path.as_deref().or(thing.name.as_deref()).unwrap_or("?"),
        thing.ttype()
    ));
    for child in thing.child_things() {
        render_tree(child, depth + 1, lines);
    }
}

/// The thing at `path` with `depth` levels of parts.
pub fn tree(services: &Services, path: &str, depth: u32) -> Result<TreeView> {
    let params = Params::new().with("path", path);
    let thing = things::get_thing(services.meta.as_ref(), &params)?.into_single(&params.to_string())?;
    let root = things::get_tree(services.meta.as_ref(), &thing, depth)?;
    Ok(TreeView { root })
}

// === fetch ===

/// Options of the fetch command.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub start: Option<String>,
    pub end: Option<String>,
    pub dt: Option<String>,
    pub all: bool,
    pub nofill: bool,
    pub noqc: bool,
    pub output_prefix: Option<String>,
    pub vessels: Vec<String>,
}

#[derive(Debug)]
pub struct VesselData {
    pub vessel: String,
    pub signals: Vec<String>,
    pub table: SignalTable,
    pub file: Option<String>,
}

#[derive(Debug)]
pub struct FetchReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub vessels: Vec<VesselData>,
}

impl Output for FetchReport {
    fn to_json(&self) -> String {
        let vessels: Vec<Value> = self
            .vessels
            .iter()
            .map(|v| {
                let mut entry = json!({
                    "vessel": v.vessel,
                    "signals": v.signals,
                    "rows": v.table.len(),
                    "columns": v.table.column_names(),
                    "file": v.file,
                });
                if v.file.is_none() {
                    entry["records"] = Value::Array(v.table.to_records());
                }
                entry
            })
            .collect();
        json!({
            "start": crate::table::format_time(&self.start),
            "end": crate::table::format_time(&self.end),
            "vessels": vessels,
        })
        .to_string()
    }

    fn to_human(&self) -> String {
        let mut out = Vec::new();
        for v in &self.vessels {
            out.push(format!(
                "{}: {} row(s), {} column(s){}",
                v.vessel,
                v.table.len(),
                v.table.column_names().len(),
                v.file
                    .as_ref()
                    .map(|f| format!(" -> {}", f))
                    .unwrap_or_default()
            ));
            if v.file.is_none() && !v.table.is_empty() {
                let mut csv = Vec::new();
                match v.table.write_csv(&mut csv) {
                    Ok(()) => out.push(String::from_utf8_lossy(&csv).trim_end().to_string()),
                    Err(e) => warn!(vessel = v.vessel.as_str(), error = %e, "could not render table"),
                }
            }
        }
        out.join("\n")
    }
}

/// Output file for a vessel: `<prefix>_<sanitized name>.csv`.
pub fn output_file_name(prefix: &str, vessel: &str) -> String {
    let sanitized: String = vessel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}.csv", prefix, sanitized)
}

fn window(options: &FetchOptions) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = match &options.end {
        Some(raw) => parse_timestamp(raw)?,
        None => Utc::now(),
    };
    let start = match &options.start {
        Some(raw) => parse_timestamp(raw)?,
        None => end - Duration::days(DEFAULT_WINDOW_DAYS),
    };
    Ok((start, end))
}

/// Download data for the requested vessels (all when none are given).
pub fn fetch(services: &Services, options: &FetchOptions) -> Result<FetchReport> {
    let (start, end) = window(options)?;
    let mut query = TimeSeriesQuery::new(start, end)
        .noqc(options.noqc)
        .nofill(options.nofill)
        .batch_size(services.batch_size);
    if let Some(dt) = options.dt.as_ref().or(services.default_dt.as_ref()) {
        query = query.dt(dt.clone());
    }

    let vessel_paths = if options.vessels.is_empty() {
        vessels(services)?
            .vessels
            .into_iter()
            .filter_map(|v| v.path.or(v.name))
            .collect()
    } else {
        options.vessels.clone()
    };

    let test_filter = QualityFilter::default();
    let mut report = Vec::with_capacity(vessel_paths.len());
    for vessel in vessel_paths {
        let catalog = paths_measurements(services.meta.as_ref(), &vessel)?;
        let candidates: Vec<String> = if options.all {
            catalog.paths()
        } else {
            select_signals(&catalog, &CURATED_SIGNALS)
                .into_iter()
                .filter_map(|ts| ts.path.clone())
                .collect()
        };
        let signals: Vec<String> = candidates
            .into_iter()
            .filter(|p| !test_filter.is_test_path(p))
            .collect();
        if signals.is_empty() {
            info!(vessel = vessel.as_str(), "no matching signals");
            report.push(VesselData {
                vessel,
                signals,
                table: SignalTable::new(),
                file: None,
            });
            continue;
        }

        let request = ShipDataRequest::new(vessel.clone(), signals.clone(), query.clone());
        let table = ship_data_from_catalog(&catalog, services.tsb.as_ref(), &request);

        let file = match &options.output_prefix {
            Some(prefix) => {
                let name = output_file_name(prefix, &vessel);
                let mut writer = BufWriter::new(File::create(&name)?);
                table.write_csv(&mut writer)?;
                writer.flush()?;
                info!(vessel = vessel.as_str(), file = name.as_str(), rows = table.len(), "wrote csv");
                Some(name)
            }
            None => None,
        };
        report.push(VesselData {
            vessel,
            signals,
            table,
            file,
        });
    }

    Ok(FetchReport {
        start,
        end,
        vessels: report,
    })
}

// === config ===

#[derive(Debug)]
pub struct ConfigView {
    pub config: ResolvedConfig,
}

impl Output for ConfigView {
    fn to_json(&self) -> String {
        self.config.to_json().to_string()
    }

    fn to_human(&self) -> String {
        let c = &self.config;
        let mut lines = vec![
            format!("meta-host: {} ({})", c.meta_host.value, c.meta_host.source),
            format!("tsb-host: {} ({})", c.tsb_host.value, c.tsb_host.source),
        ];
        match (&c.token, c.masked_token()) {
            (Some(t), Some(masked)) => lines.push(format!("token: {} ({})", masked, t.source)),
            _ => lines.push("token: (not set)".to_string()),
        }
        match &c.default_dt {
            Some(dt) => lines.push(format!("default-dt: {} ({})", dt.value, dt.source)),
            None => lines.push("default-dt: (not set)".to_string()),
        }
        lines.push(format!(
            "batch-size: {} ({})",
            c.batch_size.value, c.batch_size.source
        ));
        lines.join("\n")
    }
}
