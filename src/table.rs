//! Time indexed signal tables.
//!
//! The time series service answers with sparse rows: every row has a `time`
//! and any subset of the requested fields. [`SignalTable`] turns those rows
//! into one column per field with an explicit absence marker (`None`) for
//! every cell a row did not supply, and aligns tables from different
//! signals with an outer join on time.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::models::parse_timestamp;
use crate::{Error, Result};

/// Name of the time key in rows and in rendered output.
pub const TIME: &str = "time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

/// A table cell; `None` is the absence marker.
pub type Cell = Option<Value>;

/// One named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

/// Rows of signal values keyed by timestamp.
///
/// Timestamps are the join key but are not deduplicated: repeated times in
/// the source stay repeated rows. A table with zero rows is a normal result
/// of a query that matched no data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalTable {
    time: Vec<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl SignalTable {
    /// An empty table (no rows, no columns).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from service rows.
    ///
    /// Columns are the union of the row keys in first-seen order, with
    /// `longitude` and `latitude` first when both occur.
    pub fn from_rows(rows: Vec<Map<String, Value>>) -> Result<Self> {
        if rows.is_empty() {
            return Ok(Self::new());
        }

        let mut names: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for row in &rows {
            for key in row.keys() {
                if key != TIME && seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        let mut time = Vec::with_capacity(rows.len());
        let mut values: Vec<Vec<Cell>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for (row_no, row) in rows.iter().enumerate() {
            let raw = row
                .get(TIME)
                .ok_or_else(|| Error::InvalidInput(format!("row {} has no time", row_no)))?;
            time.push(time_value(raw)?);

            let mut filled = vec![false; names.len()];
            for (key, value) in row {
                if let Some(&col) = index.get(key.as_str()) {
                    values[col].push(cell(value));
                    filled[col] = true;
                }
            }
            for (col, was_filled) in filled.into_iter().enumerate() {
                if !was_filled {
                    values[col].push(None);
                }
            }
        }

        let columns = names
            .into_iter()
            .zip(values)
            .map(|(name, values)| Column { name, values })
            .collect();
        let mut table = Self { time, columns };
        table.promote_coordinates();
        Ok(table)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Zero rows.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.time
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.column_index(name)
            .map(|i| self.columns[i].values.as_slice())
    }

    /// Cell at `row` in column `name`; `None` when absent or unknown.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        self.column(name)?.get(row)?.as_ref()
    }

    /// Row index of the first row at `time`.
    pub fn row_at(&self, time: DateTime<Utc>) -> Option<usize> {
        self.time.iter().position(|t| *t == time)
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Move `longitude` and `latitude` to the front when both are present.
    pub fn promote_coordinates(&mut self) {
        if let (Some(lon), Some(lat)) = (
            self.column_index(LONGITUDE),
            self.column_index(LATITUDE),
        ) {
            let lon_col = self.columns[lon].clone();
            let lat_col = self.columns[lat].clone();
            self.columns
                .retain(|c| c.name != LONGITUDE && c.name != LATITUDE);
            self.columns.insert(0, lat_col);
            self.columns.insert(0, lon_col);
        }
    }

    /// Rename columns for which `rename` returns a new name.
    pub fn rename_columns<F>(&mut self, rename: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for column in &mut self.columns {
            if let Some(new_name) = rename(&column.name) {
                column.name = new_name;
            }
        }
    }

    /// Set column `name` to all absence markers, adding it if needed.
    pub fn add_empty_column(&mut self, name: impl Into<String>) {
        let name = name.into();
        let values = vec![None; self.len()];
        match self.column_index(&name) {
            Some(i) => self.columns[i].values = values,
            None => self.columns.push(Column { name, values }),
        }
    }

    /// Outer join on time.
    ///
    /// Every row of both sides survives: matched times are combined (all
    /// pairs when a time repeats), unmatched cells become absence markers.
    /// Clashing column names get `_x`/`_y` suffixes.
    pub fn outer_merge(self, other: SignalTable) -> SignalTable {
        let left_names: HashSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let right_names: HashSet<&str> = other.columns.iter().map(|c| c.name.as_str()).collect();
        let clash = |name: &str| left_names.contains(name) && right_names.contains(name);

        let mut right_rows: HashMap<DateTime<Utc>, Vec<usize>> = HashMap::new();
        for (j, t) in other.time.iter().enumerate() {
            right_rows.entry(*t).or_default().push(j);
        }

        let mut pairs: Vec<(DateTime<Utc>, Option<usize>, Option<usize>)> = Vec::new();
        let mut matched = vec![false; other.len()];
        for (i, t) in self.time.iter().enumerate() {
            match right_rows.get(t) {
                Some(js) => {
                    for &j in js {
                        matched[j] = true;
                        pairs.push((*t, Some(i), Some(j)));
                    }
                }
                None => pairs.push((*t, Some(i), None)),
            }
        }
        for (j, t) in other.time.iter().enumerate() {
            if !matched[j] {
                pairs.push((*t, None, Some(j)));
            }
        }

        let pick = |column: &Column, idx: Option<usize>| -> Cell {
            idx.and_then(|i| column.values[i].clone())
        };
        let mut columns = Vec::with_capacity(self.columns.len() + other.columns.len());
        for column in &self.columns {
            let name = if clash(&column.name) {
                format!("{}_x", column.name)
            } else {
                column.name.clone()
            };
            let values = pairs.iter().map(|(_, i, _)| pick(column, *i)).collect();
            columns.push(Column { name, values });
        }
        for column in &other.columns {
            let name = if clash(&column.name) {
                format!("{}_y", column.name)
            } else {
                column.name.clone()
            };
            let values = pairs.iter().map(|(_, _, j)| pick(column, *j)).collect();
            columns.push(Column { name, values });
        }

        SignalTable {
            time: pairs.into_iter().map(|(t, _, _)| t).collect(),
            columns,
        }
    }

    /// Stable sort of the rows by ascending time.
    pub fn sort_by_time(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.time[i]);
        self.reorder(&order);
    }

    /// Keep rows for which `keep(table, row)` holds; returns the number dropped.
    pub fn retain_rows<F>(&mut self, keep: F) -> usize
    where
        F: Fn(&SignalTable, usize) -> bool,
    {
        let order: Vec<usize> = (0..self.len()).filter(|&i| keep(self, i)).collect();
        let dropped = self.len() - order.len();
        self.reorder(&order);
        dropped
    }

    /// Drop rows where every listed column that exists is absent.
    ///
    /// Columns not in the table are ignored; with none present nothing is
    /// dropped.
    pub fn drop_rows_all_absent(&mut self, names: &[&str]) -> usize {
        let present: Vec<usize> = names.iter().filter_map(|n| self.column_index(n)).collect();
        if present.is_empty() {
            return 0;
        }
        self.retain_rows(|table, row| {
            present
                .iter()
                .any(|&c| table.columns[c].values[row].is_some())
        })
    }

    fn reorder(&mut self, order: &[usize]) {
        self.time = order.iter().map(|&i| self.time[i]).collect();
        for column in &mut self.columns {
            column.values = order.iter().map(|&i| column.values[i].clone()).collect();
        }
    }

    /// Rows as JSON objects with `time` first; absent cells are `null`.
    pub fn to_records(&self) -> Vec<Value> {
        (0..self.len())
            .map(|row| {
                let mut map = Map::new();
                map.insert(TIME.to_string(), Value::String(format_time(&self.time[row])));
                for column in &self.columns {
                    map.insert(
                        column.name.clone(),
                        column.values[row].clone().unwrap_or(Value::Null),
                    );
                }
                Value::Object(map)
            })
            .collect()
    }

    /// Write the table as CSV with a header line; absent cells are empty.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(std::iter::once(TIME).chain(self.column_names()))?;

        for row in 0..self.len() {
            let mut record = Vec::with_capacity(self.columns.len() + 1);
            record.push(format_time(&self.time[row]));
            for column in &self.columns {
                record.push(match &column.values[row] {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                });
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Canonical rendering of a timestamp.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn time_value(raw: &Value) -> Result<DateTime<Utc>> {
    match raw {
        Value::String(s) => parse_timestamp(s),
        // epoch milliseconds
        Value::Number(n) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| Error::InvalidTimestamp(n.to_string())),
        other => Err(Error::InvalidTimestamp(other.to_string())),
    }
}

fn cell(value: &Value) -> Cell {
    match value {
        Value::Null => None,
        other => Some(other.clone()),
    }
}
