//! Thing operations against the metadata service.
//!
//! These are the entry points scripts use: query things by arbitrary
//! filters, list all things of one variant, get-or-create by path, fetch a
//! subtree, and persist or delete things (recursively through `parts`).

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::client::{MAX_UUIDS_PER_REQUEST, MetadataService, Params};
use crate::models::tree::get_all_time_series;
use crate::models::{Dispatched, Part, Thing, ThingType, dispatch};
use crate::{Error, Result};

/// Query things matching `params`.
pub fn get_thing(meta: &dyn MetadataService, params: &Params) -> Result<Dispatched> {
    let raw = meta.get(params)?;
    dispatch(raw)
}

/// All things of variant `ttype` matching `params`; always a list.
pub fn list(meta: &dyn MetadataService, ttype: ThingType, params: &Params) -> Result<Vec<Thing>> {
    let mut query = Params::new().with("ttype", ttype.tag());
    query.extend(params);
    Ok(get_thing(meta, &query)?.into_vec())
}

/// Look up a single thing by `params`, or synthesize an unsaved one.
///
/// With `path_only`, only the `path` filter is sent. No match yields a new
/// thing built from `params` with variant `ttype`; more than one match is
/// an [`Error::AmbiguousEntity`].
pub fn get_or_create(
    meta: &dyn MetadataService,
    ttype: ThingType,
    params: &Params,
    path_only: bool,
) -> Result<Thing> {
    let query = if path_only {
        let path = params
            .get("path")
            .ok_or_else(|| Error::InvalidInput("path_only lookup requires a path".to_string()))?;
        Params::new().with("path", path)
    } else {
        params.clone()
    };

    match get_thing(meta, &query)? {
        Dispatched::One(thing) => Ok(thing),
        Dispatched::Many(mut things) => match things.len() {
            0 => {
                debug!(params = %params, "no thing found, creating new {}", ttype);
                new_from_params(ttype, params)
            }
            1 => Ok(things.remove(0)),
            count => Err(Error::AmbiguousEntity {
                count,
                params: query.to_string(),
            }),
        },
    }
}

/// Unsaved thing holding `params` as fields; `ttype` unless one is given.
pub fn new_from_params(ttype: ThingType, params: &Params) -> Result<Thing> {
    let mut map: Map<String, Value> = params
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    map.entry("ttype".to_string())
        .or_insert_with(|| Value::String(ttype.tag().to_string()));
    Thing::from_map(map)
}

/// Fetch `thing` with its parts attached, `levels` deep.
pub fn get_tree(meta: &dyn MetadataService, thing: &Thing, levels: u32) -> Result<Thing> {
    let uuid = thing.uuid.as_deref().ok_or_else(|| {
        Error::InvalidInput(format!(
            "cannot fetch tree of unsaved thing {}",
            thing.path.as_deref().unwrap_or("<no path>")
        ))
    })?;
    let params = Params::new().with("uuid", uuid).with("parts", levels);
    get_thing(meta, &params)?.into_single(&params.to_string())
}

/// Create or update `thing`, then its parts.
///
/// The thing is sent without `parts`; each part is re-parented to the
/// persisted uuid and saved recursively. Returns the persisted tree.
pub fn save(meta: &dyn MetadataService, mut thing: Thing) -> Result<Thing> {
    let parts = thing.parts.take();
    let payload = thing.as_value(true);
    let mut saved = dispatch(meta.update(&payload)?)?.into_single("saved thing")?;
    info!(
        path = saved.path.as_deref().unwrap_or("?"),
        uuid = saved.uuid.as_deref().unwrap_or("?"),
        "saved thing"
    );

    if let Some(parts) = parts {
        let mut saved_parts = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Part::Thing(mut child) => {
                    child.part_of = saved.uuid.clone();
                    saved_parts.push(Part::Thing(save(meta, child)?));
                }
                Part::Ref(uuid) => saved_parts.push(Part::Ref(uuid)),
            }
        }
        saved.parts = Some(saved_parts);
    }
    Ok(saved)
}

/// Delete `thing`; with `recursive`, its children first.
///
/// Children are discovered with a one level tree query, so references the
/// in-memory thing does not hold are deleted as well.
pub fn delete(meta: &dyn MetadataService, thing: &Thing, recursive: bool) -> Result<Dispatched> {
    if recursive && thing.uuid.is_some() {
        let current = get_tree(meta, thing, 1)?;
        for child in current.child_things() {
            delete(meta, child, recursive)?;
        }
    }
    let mut target = thing.clone();
    target.parts = None;
    let deleted = meta.delete(&target.as_value(true))?;
    info!(path = thing.path.as_deref().unwrap_or("?"), "deleted thing");
    dispatch(deleted)
}

/// Resolve `path` and return every series below it, each fetched on its own.
pub fn path_to_all_series(
    meta: &dyn MetadataService,
    path: &str,
    depth: Option<u32>,
) -> Result<Vec<Thing>> {
    let params = Params::new().with("path", path);
    let top = get_thing(meta, &params)?.into_single(&params.to_string())?;
    let catalog = get_all_time_series(meta, &top, depth)?;
    catalog
        .iter()
        .filter_map(|ts| ts.uuid.as_deref())
        .map(|uuid| {
            let params = Params::new().with("uuid", uuid);
            get_thing(meta, &params)?.into_single(&params.to_string())
        })
        .collect()
}

/// Map uuids to paths, querying at most [`MAX_UUIDS_PER_REQUEST`] at a time.
pub fn uuid_paths(meta: &dyn MetadataService, uuids: &[String]) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for chunk in uuids.chunks(MAX_UUIDS_PER_REQUEST) {
        let params = Params::new().with("uuid", chunk.join(","));
        for thing in get_thing(meta, &params)?.into_vec() {
            if let (Some(uuid), Some(path)) = (thing.uuid, thing.path) {
                out.insert(uuid, path);
            }
        }
    }
    Ok(out)
}
