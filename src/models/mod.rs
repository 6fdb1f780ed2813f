//! Data models for the Thing universe.
//!
//! This module defines the core data structures:
//! - `ThingType` - The closed set of entity variants and their wire tags
//! - `Thing` - An entity: typed core fields plus open extension fields
//! - `Attr` - Extension field values (raw JSON or materialised things)
//! - `Part` - A child of a thing, owned or referenced by uuid
//!
//! Conversion from and to service JSON lives in [`dispatch`]; uuid keyed
//! tree resolution lives in [`tree`].

pub mod dispatch;
pub mod tree;

use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub use dispatch::{Dispatched, dispatch};

/// Keys stored in typed fields of [`Thing`] rather than the extension map.
pub const CORE_FIELDS: [&str; 6] = ["uuid", "path", "name", "ttype", "part_of", "parts"];

/// Entity variant, serialized as the service's `ttype` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThingType {
    #[serde(rename = "thing")]
    Thing,
    #[serde(rename = "component")]
    Component,
    #[serde(rename = "platform")]
    Platform,
    #[serde(rename = "vessel")]
    Vessel,
    #[serde(rename = "sensor")]
    Sensor,
    #[serde(rename = "tseries")]
    TimeSeries,
    /// Quality control flags for another series
    #[serde(rename = "qctseries")]
    FlagTimeSeries,
    #[serde(rename = "gpstrack")]
    GpsTrack,
}

impl ThingType {
    /// Every known variant.
    pub const ALL: [ThingType; 8] = [
        ThingType::Thing,
        ThingType::Component,
        ThingType::Platform,
        ThingType::Vessel,
        ThingType::Sensor,
        ThingType::TimeSeries,
        ThingType::FlagTimeSeries,
        ThingType::GpsTrack,
    ];

    /// Wire tag used in the `ttype` field.
    pub fn tag(&self) -> &'static str {
        match self {
            ThingType::Thing => "thing",
            ThingType::Component => "component",
            ThingType::Platform => "platform",
            ThingType::Vessel => "vessel",
            ThingType::Sensor => "sensor",
            ThingType::TimeSeries => "tseries",
            ThingType::FlagTimeSeries => "qctseries",
            ThingType::GpsTrack => "gpstrack",
        }
    }

    /// Parse a wire tag; unknown tags are an [`Error::EntityType`].
    pub fn from_tag(tag: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .ok_or_else(|| Error::EntityType(tag.to_string()))
    }

    /// Plain series, QC series and GPS tracks.
    pub fn is_time_series(&self) -> bool {
        matches!(
            self,
            ThingType::TimeSeries | ThingType::FlagTimeSeries | ThingType::GpsTrack
        )
    }

    /// Platforms, including vessels.
    pub fn is_platform(&self) -> bool {
        matches!(self, ThingType::Platform | ThingType::Vessel)
    }

    /// Components, including sensors.
    pub fn is_component(&self) -> bool {
        matches!(self, ThingType::Component | ThingType::Sensor)
    }
}

impl fmt::Display for ThingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

impl FromStr for ThingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s)
    }
}

/// Value of an extension field.
///
/// Nested objects carrying a `ttype` are materialised as things when the
/// payload is dispatched; everything else stays raw JSON.
#[derive(Debug, Clone)]
pub enum Attr {
    Value(Value),
    Thing(Box<Thing>),
    List(Vec<Attr>),
}

impl Attr {
    /// The raw JSON value, if this is not a materialised thing.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attr::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            Attr::Thing(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_value().and_then(Value::as_str)
    }
}

impl From<Value> for Attr {
    fn from(value: Value) -> Self {
        Attr::Value(value)
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Attr::Value(Value::String(value.to_string()))
    }
}

impl From<Thing> for Attr {
    fn from(thing: Thing) -> Self {
        Attr::Thing(Box::new(thing))
    }
}

/// A child in a thing's `parts` list.
#[derive(Debug, Clone)]
pub enum Part {
    /// Child owned by value (tree queries with depth > 0)
    Thing(Thing),
    /// Shallow reference by uuid
    Ref(String),
}

impl Part {
    /// uuid of the child, if known.
    pub fn uuid(&self) -> Option<&str> {
        match self {
            Part::Thing(t) => t.uuid.as_deref(),
            Part::Ref(uuid) => Some(uuid),
        }
    }

    pub fn as_thing(&self) -> Option<&Thing> {
        match self {
            Part::Thing(t) => Some(t),
            Part::Ref(_) => None,
        }
    }
}

/// A node in the metadata graph.
///
/// `uuid`, `path`, `name`, `ttype`, `part_of` and `parts` are typed; any
/// other field the service sends is kept in an extension map and read with
/// [`Thing::field`].
#[derive(Debug, Clone)]
pub struct Thing {
    /// Assigned by the metadata service; `None` until saved
    pub uuid: Option<String>,

    /// Slash delimited hierarchical name
    pub path: Option<String>,

    /// Display name, defaults to the last path segment
    pub name: Option<String>,

    ttype: ThingType,

    /// uuid of the parent thing
    pub part_of: Option<String>,

    /// Children; `None` when the query did not ask for parts
    pub parts: Option<Vec<Part>>,

    extra: BTreeMap<String, Attr>,

    start_time: OnceCell<Option<DateTime<Utc>>>,
    end_time: OnceCell<Option<DateTime<Utc>>>,
}

impl Thing {
    /// Create an unsaved thing of the given variant.
    pub fn new(ttype: ThingType) -> Self {
        Self {
            uuid: None,
            path: None,
            name: None,
            ttype,
            part_of: None,
            parts: None,
            extra: BTreeMap::new(),
            start_time: OnceCell::new(),
            end_time: OnceCell::new(),
        }
    }

    /// Create an unsaved thing at `path`; the name is derived from it.
    pub fn with_path(ttype: ThingType, path: impl Into<String>) -> Self {
        let mut thing = Self::new(ttype);
        thing.set_path(path);
        thing
    }

    pub fn ttype(&self) -> ThingType {
        self.ttype
    }

    /// Set the path, deriving `name` when none is set.
    pub fn set_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if self.name.is_none() {
            self.name = Some(name_from_path(&path));
        }
        self.path = Some(path);
    }

    /// Read an extension field.
    pub fn field(&self, key: &str) -> Option<&Attr> {
        self.extra.get(key)
    }

    /// Read an extension field holding raw JSON.
    pub fn field_value(&self, key: &str) -> Option<&Value> {
        self.field(key).and_then(Attr::as_value)
    }

    /// Set an extension field. Core fields have typed setters instead.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Attr>) -> Result<()> {
        let key = key.into();
        if CORE_FIELDS.contains(&key.as_str()) {
            return Err(Error::InvalidInput(format!(
                "'{}' is a core field and cannot be set as an extension field",
                key
            )));
        }
        match key.as_str() {
            "start_time" => self.start_time = OnceCell::new(),
            "end_time" => self.end_time = OnceCell::new(),
            _ => {}
        }
        self.extra.insert(key, value.into());
        Ok(())
    }

    /// Remove an extension field.
    pub fn remove_field(&mut self, key: &str) -> Option<Attr> {
        match key {
            "start_time" => self.start_time = OnceCell::new(),
            "end_time" => self.end_time = OnceCell::new(),
            _ => {}
        }
        self.extra.remove(key)
    }

    /// Extension fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Attr)> {
        self.extra.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_time_series(&self) -> bool {
        self.ttype.is_time_series()
    }

    /// Child things owned by value.
    pub fn child_things(&self) -> impl Iterator<Item = &Thing> {
        self.parts
            .iter()
            .flatten()
            .filter_map(Part::as_thing)
    }

    /// First timestamp of a series, parsed on first access.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        if !self.is_time_series() {
            return None;
        }
        *self
            .start_time
            .get_or_init(|| self.timestamp_field("start_time"))
    }

    /// Last timestamp of a series, parsed on first access.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        if !self.is_time_series() {
            return None;
        }
        *self.end_time.get_or_init(|| self.timestamp_field("end_time"))
    }

    fn timestamp_field(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.field(key)?.as_str()?;
        if raw.is_empty() {
            return None;
        }
        parse_timestamp(raw).ok()
    }

    /// Identifier used for shallow references: uuid, or path before saving.
    pub fn reference(&self) -> Option<&str> {
        self.uuid.as_deref().or(self.path.as_deref())
    }
}

/// Last `/` separated segment of a path.
pub fn name_from_path(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Parse an ISO-8601 timestamp; values without offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(Error::InvalidTimestamp(raw.to_string()))
}
