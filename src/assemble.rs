//! Vessel level data assembly.
//!
//! A ship data request names a vessel and a list of series paths. Each
//! path is fetched on its own and the results are outer-merged on time
//! into one table with a column per path. Failures of single paths are
//! logged and skipped; paths without data still get a column.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::client::{MetadataService, Params, TimeSeriesService};
use crate::fetch::{HeaderNaming, TimeSeriesQuery, fetch};
use crate::models::ThingType;
use crate::models::tree::{SeriesCatalog, get_all_time_series};
use crate::table::{LATITUDE, LONGITUDE, SignalTable, TIME};
use crate::things;
use crate::{Error, Result, Thing};

/// Name of the coordinate series under every vessel.
pub const GPS_TRACK: &str = "gpstrack";

/// Path marker of test channels.
pub const DEFAULT_TEST_MARKER: &str = "TEST";

/// Signals fetched by default for each vessel.
pub const CURATED_SIGNALS: [&str; 4] = ["TEMPERATURE", "TURBIDITY", "SALINITY", "gpstrack"];

/// Row filtering applied after all paths are merged.
#[derive(Debug, Clone)]
pub struct QualityFilter {
    /// Drop rows lacking both coordinates.
    pub enabled: bool,
    /// Also drop rows where every data column is absent.
    pub drop_empty_data: bool,
    /// Path substrings marking test channels, which never count as data.
    pub test_markers: Vec<String>,
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            drop_empty_data: false,
            test_markers: vec![DEFAULT_TEST_MARKER.to_string()],
        }
    }
}

impl QualityFilter {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn is_test_path(&self, path: &str) -> bool {
        self.test_markers.iter().any(|m| path.contains(m.as_str()))
    }

    fn apply(&self, table: &mut SignalTable, vessel: &str, paths: &[String]) {
        if !self.enabled {
            return;
        }
        if table.has_column(LATITUDE) || table.has_column(LONGITUDE) {
            let dropped = table.drop_rows_all_absent(&[LATITUDE, LONGITUDE]);
            info!(dropped, "dropped rows without position");
        } else {
            warn!(vessel, "no coordinates in downloaded data, keeping all rows");
        }

        if self.drop_empty_data {
            let gps = gps_path(vessel);
            let data_columns: Vec<&str> = paths
                .iter()
                .map(String::as_str)
                .filter(|p| ![TIME, LATITUDE, LONGITUDE, gps.as_str()].contains(p))
                .filter(|p| !self.is_test_path(p))
                .filter(|p| table.has_column(p))
                .collect();
            let dropped = table.drop_rows_all_absent(&data_columns);
            info!(dropped, "dropped rows without data");
        }
    }
}

/// Path of the coordinate series of `vessel`.
pub fn gps_path(vessel: &str) -> String {
    format!("{}/{}", vessel, GPS_TRACK)
}

/// `paths` with the vessel's coordinate series appended when missing.
pub fn augment_paths(vessel: &str, paths: &[String]) -> Vec<String> {
    let mut out = paths.to_vec();
    let gps = gps_path(vessel);
    if !out.contains(&gps) {
        out.push(gps);
    }
    out
}

/// Merge per path fetch results into one table.
///
/// `requested` is augmented with the coordinate series and walked in
/// order. A path whose result is missing or an error is logged and left
/// out; a path whose table is empty gets an all-absent column. Quality
/// filtering runs once after all merges, then rows are sorted by time.
pub fn assemble(
    vessel: &str,
    requested: &[String],
    per_path: Vec<(String, Result<SignalTable>)>,
    filter: &QualityFilter,
) -> SignalTable {
    let paths = augment_paths(vessel, requested);
    let mut results: HashMap<String, Result<SignalTable>> = per_path.into_iter().collect();

    let mut merged: Option<SignalTable> = None;
    let mut empty_paths = Vec::new();
    for path in &paths {
        match results.remove(path) {
            Some(Ok(table)) if table.is_empty() => {
                info!(path = path.as_str(), "No data for path");
                empty_paths.push(path.clone());
            }
            Some(Ok(table)) => {
                merged = Some(match merged {
                    None => table,
                    Some(acc) => acc.outer_merge(table),
                });
            }
            Some(Err(e)) => warn!(path = path.as_str(), error = %e, "could not download"),
            None => warn!(path = path.as_str(), "no result for requested path"),
        }
    }

    let mut table = match merged {
        Some(table) => {
            info!(vessel, paths = paths.len(), "downloaded data");
            table
        }
        None => {
            info!(vessel, "Nothing was downloaded");
            SignalTable::new()
        }
    };

    filter.apply(&mut table, vessel, &paths);
    table.sort_by_time();
    for path in empty_paths {
        table.add_empty_column(path);
    }
    table
}

/// A request for one vessel's data.
#[derive(Debug, Clone)]
pub struct ShipDataRequest {
    pub vessel: String,
    pub paths: Vec<String>,
    pub query: TimeSeriesQuery,
    pub filter: QualityFilter,
}

impl ShipDataRequest {
    /// Quality filtering follows `query.noqc`.
    pub fn new(vessel: impl Into<String>, paths: Vec<String>, query: TimeSeriesQuery) -> Self {
        let filter = if query.noqc {
            QualityFilter::disabled()
        } else {
            QualityFilter::default()
        };
        Self {
            vessel: vessel.into(),
            paths,
            query,
            filter,
        }
    }
}

/// Look up a vessel by path and resolve all its series.
pub fn paths_measurements(meta: &dyn MetadataService, vessel: &str) -> Result<SeriesCatalog> {
    let params = Params::new().with("path", vessel);
    let platform = things::get_thing(meta, &params)?.into_single(&params.to_string())?;
    get_all_time_series(meta, &platform, None)
}

/// Series paths of `vessel`, optionally without test channels.
pub fn available_parameters(
    meta: &dyn MetadataService,
    vessel: &str,
    exclude_tests: bool,
) -> Result<Vec<String>> {
    let filter = QualityFilter::default();
    let paths = paths_measurements(meta, vessel)?.paths();
    Ok(paths
        .into_iter()
        .filter(|p| !exclude_tests || !filter.is_test_path(p))
        .collect())
}

/// Series matching one of `signals` by case-insensitive path substring.
///
/// Only plain series and GPS tracks are considered; the result follows the
/// order of `signals`.
pub fn select_signals<'a>(catalog: &'a SeriesCatalog, signals: &[&str]) -> Vec<&'a Thing> {
    let mut out: Vec<&Thing> = Vec::new();
    for signal in signals {
        let needle = signal.to_lowercase();
        for ts in catalog.iter() {
            let wanted = matches!(ts.ttype(), ThingType::TimeSeries | ThingType::GpsTrack);
            let matches = ts
                .path
                .as_deref()
                .is_some_and(|p| p.to_lowercase().contains(&needle));
            if wanted && matches && !out.iter().any(|o| std::ptr::eq(*o, ts)) {
                out.push(ts);
            }
        }
    }
    out
}

/// Fetch and assemble all requested paths of one vessel.
pub fn get_ship_data(
    meta: &dyn MetadataService,
    tsb: &dyn TimeSeriesService,
    request: &ShipDataRequest,
) -> Result<SignalTable> {
    info!(vessel = request.vessel.as_str(), "Downloading data");
    let catalog = paths_measurements(meta, &request.vessel)?;
    Ok(ship_data_from_catalog(&catalog, tsb, request))
}

/// Like [`get_ship_data`] with the vessel's series already resolved.
pub fn ship_data_from_catalog(
    catalog: &SeriesCatalog,
    tsb: &dyn TimeSeriesService,
    request: &ShipDataRequest,
) -> SignalTable {
    let paths = augment_paths(&request.vessel, &request.paths);
    let per_path = paths
        .iter()
        .map(|path| {
            let result = match catalog.by_path(path) {
                Some(ts) => fetch(tsb, [ts], &request.query, HeaderNaming::Path),
                None => Err(Error::NotFound(format!(
                    "{} is not a series of {}",
                    path, request.vessel
                ))),
            };
            (path.clone(), result)
        })
        .collect();

    assemble(&request.vessel, &paths, per_path, &request.filter)
}
