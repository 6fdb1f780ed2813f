//! Conversion between service JSON and typed things.

use serde_json::{Map, Value};

use super::{Attr, CORE_FIELDS, Part, Thing, ThingType, name_from_path};
use crate::{Error, Result};

/// Result of dispatching a service payload.
#[derive(Debug, Clone)]
pub enum Dispatched {
    One(Thing),
    Many(Vec<Thing>),
}

impl Dispatched {
    /// Always a list; a single thing becomes a list of one.
    pub fn into_vec(self) -> Vec<Thing> {
        match self {
            Dispatched::One(thing) => vec![thing],
            Dispatched::Many(things) => things,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Dispatched::One(_) => 1,
            Dispatched::Many(things) => things.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exactly one thing; zero is `NotFound`, several is ambiguous.
    pub fn into_single(self, context: &str) -> Result<Thing> {
        match self {
            Dispatched::One(thing) => Ok(thing),
            Dispatched::Many(mut things) => match things.len() {
                0 => Err(Error::NotFound(context.to_string())),
                1 => Ok(things.remove(0)),
                count => Err(Error::AmbiguousEntity {
                    count,
                    params: context.to_string(),
                }),
            },
        }
    }
}

/// Dispatch a decoded payload to typed things.
///
/// Objects need a `ttype` from the known set; lists are dispatched element
/// by element and an empty list is returned as an empty `Many`.
pub fn dispatch(raw: Value) -> Result<Dispatched> {
    match raw {
        Value::Object(map) => Ok(Dispatched::One(Thing::from_map(map)?)),
        Value::Array(items) => {
            let things = items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Thing::from_map(map),
                    other => Err(Error::EntityShape(shape_of(&other))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Dispatched::Many(things))
        }
        other => Err(Error::EntityShape(shape_of(&other))),
    }
}

fn shape_of(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object without ttype",
    };
    let mut text = value.to_string();
    if text.len() > 80 {
        let mut cut = 80;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    format!("{} ({})", kind, text)
}

fn string_field(key: &str, value: Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(Error::EntityShape(format!(
            "field '{}' must be a string, got {}",
            key,
            shape_of(&other)
        ))),
    }
}

fn to_attr(value: Value) -> Result<Attr> {
    match value {
        Value::Object(map) if map.contains_key("ttype") => {
            Ok(Attr::Thing(Box::new(Thing::from_map(map)?)))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) if map.contains_key("ttype") => {
                    Ok(Attr::Thing(Box::new(Thing::from_map(map)?)))
                }
                other => Ok(Attr::Value(other)),
            })
            .collect::<Result<Vec<_>>>()
            .map(Attr::List),
        other => Ok(Attr::Value(other)),
    }
}

fn to_part(value: Value) -> Result<Part> {
    match value {
        Value::String(uuid) => Ok(Part::Ref(uuid)),
        Value::Object(map) if map.contains_key("ttype") => Ok(Part::Thing(Thing::from_map(map)?)),
        Value::Object(map) => match map.get("uuid").and_then(Value::as_str) {
            Some(uuid) => Ok(Part::Ref(uuid.to_string())),
            None => Err(Error::EntityShape(shape_of(&Value::Object(map)))),
        },
        other => Err(Error::EntityShape(shape_of(&other))),
    }
}

fn parent_ref(value: Value) -> Result<Option<String>> {
    match value {
        Value::Object(map) if map.contains_key("ttype") => {
            let parent = Thing::from_map(map)?;
            Ok(parent.reference().map(str::to_string))
        }
        Value::Object(map) => Ok(map.get("uuid").and_then(Value::as_str).map(str::to_string)),
        other => string_field("part_of", other),
    }
}

impl Thing {
    /// Build a thing from a JSON value carrying a `ttype`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(Error::EntityShape(shape_of(&other))),
        }
    }

    /// Build a thing from a JSON object carrying a `ttype`.
    ///
    /// Nested tagged objects, in `parts` or in any extension field, are
    /// materialised before the outer thing is constructed.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self> {
        let ttype = match map.remove("ttype") {
            Some(Value::String(tag)) => ThingType::from_tag(&tag)?,
            Some(other) => return Err(Error::EntityType(other.to_string())),
            None => return Err(Error::EntityShape(shape_of(&Value::Object(map)))),
        };

        let mut thing = Thing::new(ttype);
        for (key, value) in map {
            match key.as_str() {
                "uuid" => thing.uuid = string_field("uuid", value)?,
                "path" => thing.path = string_field("path", value)?,
                "name" => thing.name = string_field("name", value)?,
                "part_of" => thing.part_of = parent_ref(value)?,
                "parts" => {
                    thing.parts = match value {
                        Value::Null => None,
                        Value::Array(items) => Some(
                            items
                                .into_iter()
                                .map(to_part)
                                .collect::<Result<Vec<_>>>()?,
                        ),
                        other => return Err(Error::EntityShape(shape_of(&other))),
                    }
                }
                _ => {
                    thing.extra.insert(key, to_attr(value)?);
                }
            }
        }
        if thing.name.is_none() {
            thing.name = thing.path.as_deref().map(name_from_path);
        }
        Ok(thing)
    }

    /// Serializable form of the thing.
    ///
    /// With `shallow`, children and nested things are written as their uuid
    /// (or path when unsaved); otherwise they are nested in full. `part_of`
    /// is always a reference.
    pub fn as_value(&self, shallow: bool) -> Value {
        let mut map = Map::new();
        if let Some(ref uuid) = self.uuid {
            map.insert("uuid".to_string(), Value::String(uuid.clone()));
        }
        if let Some(ref path) = self.path {
            map.insert("path".to_string(), Value::String(path.clone()));
        }
        if let Some(ref name) = self.name {
            map.insert("name".to_string(), Value::String(name.clone()));
        }
        map.insert("ttype".to_string(), Value::String(self.ttype.tag().to_string()));
        if let Some(ref part_of) = self.part_of {
            map.insert("part_of".to_string(), Value::String(part_of.clone()));
        }
        for (key, attr) in &self.extra {
            debug_assert!(!CORE_FIELDS.contains(&key.as_str()));
            map.insert(key.clone(), attr_value(attr, shallow));
        }
        if let Some(ref parts) = self.parts {
            let parts = parts
                .iter()
                .map(|part| match part {
                    Part::Ref(uuid) => Value::String(uuid.clone()),
                    Part::Thing(child) if shallow => reference_value(child),
                    Part::Thing(child) => child.as_value(false),
                })
                .collect();
            map.insert("parts".to_string(), Value::Array(parts));
        }
        Value::Object(map)
    }
}

fn reference_value(thing: &Thing) -> Value {
    thing
        .reference()
        .map(|r| Value::String(r.to_string()))
        .unwrap_or(Value::Null)
}

fn attr_value(attr: &Attr, shallow: bool) -> Value {
    match attr {
        Attr::Value(v) => v.clone(),
        Attr::Thing(t) if shallow => reference_value(t),
        Attr::Thing(t) => t.as_value(false),
        Attr::List(items) => Value::Array(items.iter().map(|a| attr_value(a, shallow)).collect()),
    }
}
