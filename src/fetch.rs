//! Signal retrieval from the time series service.
//!
//! [`fetch`] queries one or more series over a time window and returns a
//! single [`SignalTable`]. Large selections are split into batches of at
//! most [`MAX_UUIDS_PER_REQUEST`] identifiers and the batch tables are
//! outer-merged on time.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::client::{MAX_UUIDS_PER_REQUEST, MetadataService, Params, TimeSeriesService};
use crate::models::{Thing, parse_timestamp};
use crate::table::{SignalTable, format_time};
use crate::things;
use crate::{Error, Result};

/// Aggregation window that returns raw samples.
pub const RAW_DT: &str = "PT0H";

/// Logged when a query leaves aggregation to the service.
pub const IMPLICIT_AGGREGATION_WARNING: &str = "Your data will be aggregated to yield 1000 points. \
     To change this behavior you should set either n or dt parameters.";

/// Server side aggregation of raw samples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// ISO-8601 duration per bucket (`dt`)
    Window(String),
    /// Point budget for the whole window (`n`)
    Points(u32),
    /// Neither given; the service downsamples to its default budget.
    #[default]
    ServerDefault,
}

/// How columns of fetched series are labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderNaming {
    /// The series uuid, as returned by the service.
    #[default]
    Uuid,
    /// The series name (last path segment).
    Name,
    /// The full series path.
    Path,
}

/// Parameters of a time series query.
#[derive(Debug, Clone)]
pub struct TimeSeriesQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub aggregation: Aggregation,
    pub noqc: bool,
    pub nofill: bool,
    /// Maximum number of uuids per physical request.
    pub batch_size: usize,
    /// Extra parameters passed through unchanged.
    pub extra: Params,
}

impl Default for TimeSeriesQuery {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            aggregation: Aggregation::ServerDefault,
            noqc: false,
            nofill: false,
            batch_size: MAX_UUIDS_PER_REQUEST,
            extra: Params::new(),
        }
    }
}

impl TimeSeriesQuery {
    /// Query for the window `[start, end]`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    /// Query for a window given as timestamp strings.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self::new(parse_timestamp(start)?, parse_timestamp(end)?))
    }

    pub fn dt(mut self, dt: impl Into<String>) -> Self {
        self.aggregation = Aggregation::Window(dt.into());
        self
    }

    pub fn points(mut self, n: u32) -> Self {
        self.aggregation = Aggregation::Points(n);
        self
    }

    /// Raw, unaggregated samples.
    pub fn raw(self) -> Self {
        self.dt(RAW_DT)
    }

    pub fn noqc(mut self, noqc: bool) -> Self {
        self.noqc = noqc;
        self
    }

    pub fn nofill(mut self, nofill: bool) -> Self {
        self.nofill = nofill;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.set(key, value);
        self
    }

    /// True when the service will pick the aggregation itself.
    pub fn implicitly_downsampled(&self) -> bool {
        matches!(self.aggregation, Aggregation::ServerDefault)
            && !self.extra.contains("dt")
            && !self.extra.contains("n")
    }

    /// Request parameters for one batch of uuids.
    pub fn to_params(&self, uuids: &[&str]) -> Params {
        let mut params = Params::new();
        if let Some(start) = &self.start {
            params.set("start", format_time(start));
        }
        if let Some(end) = &self.end {
            params.set("end", format_time(end));
        }
        match &self.aggregation {
            Aggregation::Window(dt) => params.set("dt", dt),
            Aggregation::Points(n) => params.set("n", n),
            Aggregation::ServerDefault => {}
        }
        if self.noqc {
            params.set("noqc", true);
        }
        if self.nofill {
            params.set("nofill", true);
        }
        params.extend(&self.extra);
        params.set("uuid", uuids.join(","));
        params
    }
}

/// Fetch signal data for `series` into one table.
///
/// Accepts any sequence of series; pass `std::slice::from_ref(&ts)` for a
/// single one. Every series must have a uuid. A window without data yields
/// an empty table.
pub fn fetch<'a>(
    tsb: &dyn TimeSeriesService,
    series: impl IntoIterator<Item = &'a Thing>,
    query: &TimeSeriesQuery,
    naming: HeaderNaming,
) -> Result<SignalTable> {
    let series: Vec<&Thing> = series.into_iter().collect();
    let mut uuids: Vec<&str> = Vec::with_capacity(series.len());
    let mut seen = HashSet::new();
    for ts in &series {
        let uuid = ts.uuid.as_deref().ok_or_else(|| {
            Error::InvalidInput(format!(
                "cannot fetch series without uuid ({})",
                ts.path.as_deref().unwrap_or("no path")
            ))
        })?;
        if seen.insert(uuid) {
            uuids.push(uuid);
        }
    }
    if uuids.is_empty() {
        return Ok(SignalTable::new());
    }

    if query.implicitly_downsampled() {
        warn!("{}", IMPLICIT_AGGREGATION_WARNING);
    }

    let batch_size = query.batch_size.max(1);
    let mut merged: Option<SignalTable> = None;
    let mut batches = 0;
    for chunk in uuids.chunks(batch_size) {
        batches += 1;
        let rows = tsb.query(&query.to_params(chunk))?;
        debug!(batch = batches, uuids = chunk.len(), rows = rows.len(), "fetched batch");
        let table = SignalTable::from_rows(rows)?;
        if table.is_empty() {
            continue;
        }
        merged = Some(match merged {
            None => table,
            Some(acc) => acc.outer_merge(table),
        });
    }

    let mut table = merged.unwrap_or_default();
    if batches > 1 {
        table.sort_by_time();
        table.promote_coordinates();
    }

    let labels: HashMap<&str, &str> = match naming {
        HeaderNaming::Uuid => HashMap::new(),
        HeaderNaming::Name => series
            .iter()
            .filter_map(|ts| Some((ts.uuid.as_deref()?, ts.name.as_deref()?)))
            .collect(),
        HeaderNaming::Path => series
            .iter()
            .filter_map(|ts| Some((ts.uuid.as_deref()?, ts.path.as_deref()?)))
            .collect(),
    };
    if !labels.is_empty() {
        table.rename_columns(|column| labels.get(column).map(|l| l.to_string()));
    }
    Ok(table)
}

/// Fetch a single series with its name as column header.
pub fn get_tseries(
    tsb: &dyn TimeSeriesService,
    series: &Thing,
    query: &TimeSeriesQuery,
) -> Result<SignalTable> {
    fetch(tsb, std::slice::from_ref(series), query, HeaderNaming::Name)
}

/// Samples inserted in `[start, end]`, each annotated with its series path.
///
/// The paths are looked up through the metadata service; samples of series
/// the metadata service does not know keep a `null` path.
pub fn inserted_data(
    meta: &dyn MetadataService,
    tsb: &dyn TimeSeriesService,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    aggregate: bool,
) -> Result<Vec<Map<String, Value>>> {
    let params = Params::new()
        .with("start", format_time(&start))
        .with("end", format_time(&end))
        .with("aggregate", aggregate);
    let mut rows = tsb.inserted(&params)?;

    let mut uuids: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for row in &rows {
        if let Some(uuid) = row.get("uuid").and_then(Value::as_str) {
            if seen.insert(uuid.to_string()) {
                uuids.push(uuid.to_string());
            }
        }
    }
    let paths = things::uuid_paths(meta, &uuids)?;

    for row in &mut rows {
        let path = row
            .get("uuid")
            .and_then(Value::as_str)
            .and_then(|uuid| paths.get(uuid))
            .map(|p| Value::String(p.clone()));
        if path.is_none() {
            warn!(uuid = ?row.get("uuid"), "no path known for inserted series");
        }
        row.insert("path".to_string(), path.unwrap_or(Value::Null));
    }
    Ok(rows)
}
