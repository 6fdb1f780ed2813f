//! Resolution of metadata trees into uuid addressable graphs.
//!
//! A tree query returns things nested through their `parts`. [`ThingTree`]
//! moves every node into an arena and replaces each `parts` entry by an
//! index, so a series reached through the tree and the same series handed
//! out in a flat list are one instance. Children are owned by index;
//! `part_of` stays a uuid and is resolved on demand.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{Part, Thing};
use crate::client::MetadataService;
use crate::things;
use crate::{Error, Result};

/// Index of a node in a [`ThingTree`].
pub type NodeId = usize;

/// Arena of things with parent to child edges by index.
#[derive(Debug, Clone)]
pub struct ThingTree {
    nodes: Vec<Thing>,
    children: Vec<Vec<NodeId>>,
    had_parts: Vec<bool>,
    by_uuid: HashMap<String, NodeId>,
    root: NodeId,
}

/// A reference waiting for the lookup table to be complete.
struct PendingRef {
    parent: NodeId,
    slot: usize,
    uuid: String,
}

impl ThingTree {
    /// Build the arena from a thing and its nested parts.
    ///
    /// Shallow part references are resolved against the uuids of the
    /// materialised nodes. A reference that resolves to nothing is a
    /// [`Error::TreeConsistency`].
    pub fn build(root: Thing) -> Result<Self> {
        let mut tree = ThingTree {
            nodes: Vec::new(),
            children: Vec::new(),
            had_parts: Vec::new(),
            by_uuid: HashMap::new(),
            root: 0,
        };
        let mut pending = Vec::new();
        let mut slots: Vec<Vec<Option<NodeId>>> = Vec::new();
        tree.root = tree.insert(root, &mut slots, &mut pending);

        for r in pending {
            let id = *tree
                .by_uuid
                .get(&r.uuid)
                .ok_or_else(|| Error::TreeConsistency(r.uuid.clone()))?;
            slots[r.parent][r.slot] = Some(id);
        }

        tree.children = slots
            .into_iter()
            .map(|s| s.into_iter().flatten().collect())
            .collect();
        Ok(tree)
    }

    fn insert(
        &mut self,
        mut thing: Thing,
        slots: &mut Vec<Vec<Option<NodeId>>>,
        pending: &mut Vec<PendingRef>,
    ) -> NodeId {
        let parts = thing.parts.take();
        let id = self.nodes.len();
        if let Some(ref uuid) = thing.uuid {
            self.by_uuid.entry(uuid.clone()).or_insert(id);
        }
        self.had_parts.push(parts.is_some());
        self.nodes.push(thing);
        slots.push(Vec::new());

        for (slot, part) in parts.into_iter().flatten().enumerate() {
            let child = match part {
                Part::Thing(child) => {
                    // The same uuid nested twice is one node.
                    match child.uuid.as_ref().and_then(|u| self.by_uuid.get(u)) {
                        Some(&existing) => Some(existing),
                        None => Some(self.insert(child, slots, pending)),
                    }
                }
                Part::Ref(uuid) => {
                    pending.push(PendingRef {
                        parent: id,
                        slot,
                        uuid,
                    });
                    None
                }
            };
            slots[id].push(child);
        }
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Thing> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Thing> {
        self.nodes.get_mut(id)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node carrying `uuid`.
    pub fn find(&self, uuid: &str) -> Option<NodeId> {
        self.by_uuid.get(uuid).copied()
    }

    /// Resolve a node's `part_of` reference within this tree.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(id)?.part_of.as_deref()?;
        self.find(parent)
    }

    /// Every reachable series node, children before their parent.
    ///
    /// Each node is visited once, so repeated or cyclic references cannot
    /// yield duplicates.
    pub fn time_series(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_series(self.root, &mut visited, &mut out);
        out
    }

    fn collect_series(&self, id: NodeId, visited: &mut HashSet<NodeId>, out: &mut Vec<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        for &child in self.children(id) {
            self.collect_series(child, visited, out);
        }
        if self.nodes[id].is_time_series() {
            out.push(id);
        }
    }

    /// Rebuild the nested thing rooted at `id`.
    pub fn to_thing(&self, id: NodeId) -> Option<Thing> {
        let mut visiting = HashSet::new();
        self.rebuild(id, &mut visiting)
    }

    fn rebuild(&self, id: NodeId, visiting: &mut HashSet<NodeId>) -> Option<Thing> {
        let mut thing = self.nodes.get(id)?.clone();
        if self.had_parts[id] {
            visiting.insert(id);
            let parts = self
                .children(id)
                .iter()
                .filter_map(|&child| {
                    // A node on the current path is only reachable through a
                    // uuid reference, so it always has a uuid.
                    if visiting.contains(&child) {
                        self.nodes[child].uuid.clone().map(Part::Ref)
                    } else {
                        self.rebuild(child, visiting).map(Part::Thing)
                    }
                })
                .collect();
            visiting.remove(&id);
            thing.parts = Some(parts);
        }
        Some(thing)
    }
}

/// The series under a platform, backed by the resolved tree.
#[derive(Debug, Clone)]
pub struct SeriesCatalog {
    tree: ThingTree,
    series: Vec<NodeId>,
}

impl SeriesCatalog {
    /// Resolve `tree` and collect its series leaves.
    pub fn from_tree(tree: ThingTree) -> Self {
        let series = tree.time_series();
        Self { tree, series }
    }

    pub fn tree(&self) -> &ThingTree {
        &self.tree
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Series in walk order.
    pub fn iter(&self) -> impl Iterator<Item = &Thing> {
        self.series.iter().filter_map(|&id| self.tree.get(id))
    }

    /// Node ids of the series in walk order.
    pub fn ids(&self) -> &[NodeId] {
        &self.series
    }

    /// Mutable access to a series; the change is visible through the tree.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Thing> {
        let id = *self.series.get(index)?;
        self.tree.get_mut(id)
    }

    pub fn get(&self, index: usize) -> Option<&Thing> {
        self.series.get(index).and_then(|&id| self.tree.get(id))
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&Thing> {
        let id = self.tree.find(uuid)?;
        if self.series.contains(&id) {
            self.tree.get(id)
        } else {
            None
        }
    }

    pub fn by_path(&self, path: &str) -> Option<&Thing> {
        self.iter().find(|t| t.path.as_deref() == Some(path))
    }

    /// Paths of all series that have one.
    pub fn paths(&self) -> Vec<String> {
        self.iter().filter_map(|t| t.path.clone()).collect()
    }

    /// Owned copies of the series.
    pub fn to_things(&self) -> Vec<Thing> {
        self.iter().cloned().collect()
    }
}

/// Default depth for tree queries: effectively the whole subtree.
pub const DEFAULT_TREE_DEPTH: u32 = 100;

/// All series under `platform`.
///
/// Fetches the subtree to `depth` levels (default [`DEFAULT_TREE_DEPTH`])
/// and flattens it to plain, QC and GPS series, deduplicated by uuid.
pub fn get_all_time_series(
    meta: &dyn MetadataService,
    platform: &Thing,
    depth: Option<u32>,
) -> Result<SeriesCatalog> {
    let root = things::get_tree(meta, platform, depth.unwrap_or(DEFAULT_TREE_DEPTH))?;
    let tree = ThingTree::build(root)?;
    let catalog = SeriesCatalog::from_tree(tree);
    debug!(
        platform = platform.path.as_deref().unwrap_or("?"),
        nodes = catalog.tree().len(),
        series = catalog.len(),
        "resolved thing tree"
    );
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThingType;
    use crate::test_utils::FakeMeta;
    use serde_json::{Value, json};

    fn series(uuid: &str, path: &str, ttype: &str) -> Value {
        json!({"uuid": uuid, "path": path, "ttype": ttype})
    }

    fn nested_tree() -> Value {
        json!({
            "uuid": "v1", "path": "FA", "ttype": "vessel",
            "parts": [
                {
                    "uuid": "fb", "path": "FA/FERRYBOX", "ttype": "sensor", "part_of": "v1",
                    "parts": [
                        {
                            "uuid": "c3", "path": "FA/FERRYBOX/C3", "ttype": "component", "part_of": "fb",
                            "parts": [
                                series("t1", "FA/FERRYBOX/C3/TEMPERATURE", "tseries"),
                                series("q1", "FA/FERRYBOX/C3/TEMPERATURE/QC", "qctseries")
                            ]
                        },
                        series("t2", "FA/FERRYBOX/SALINITY", "tseries")
                    ]
                },
                series("gps", "FA/gpstrack", "gpstrack")
            ]
        })
    }

    fn build(value: Value) -> Result<ThingTree> {
        ThingTree::build(Thing::from_value(value).unwrap())
    }

    #[test]
    fn test_collects_every_series_leaf_in_walk_order() {
        let tree = build(nested_tree()).unwrap();
        let paths: Vec<_> = tree
            .time_series()
            .into_iter()
            .map(|id| tree.get(id).unwrap().path.clone().unwrap())
            .collect();

        assert_eq!(
            paths,
            vec![
                "FA/FERRYBOX/C3/TEMPERATURE",
                "FA/FERRYBOX/C3/TEMPERATURE/QC",
                "FA/FERRYBOX/SALINITY",
                "FA/gpstrack",
            ]
        );
    }

    #[test]
    fn test_series_nested_in_series_are_collected_children_first() {
        let tree = build(json!({
            "uuid": "p", "ttype": "platform",
            "parts": [{
                "uuid": "q1", "ttype": "qctseries",
                "parts": [series("q2", "P/Q1/Q2", "qctseries")]
            }]
        }))
        .unwrap();
        let uuids: Vec<_> = tree
            .time_series()
            .into_iter()
            .map(|id| tree.get(id).unwrap().uuid.clone().unwrap())
            .collect();
        assert_eq!(uuids, vec!["q2", "q1"]);
    }

    #[test]
    fn test_count_independent_of_depth() {
        let mut value = series("leaf", "deep/leaf", "tseries");
        for level in 0..30 {
            value = json!({
                "uuid": format!("n{}", level),
                "ttype": "component",
                "parts": [value, series(&format!("s{}", level), "x", "gpstrack")]
            });
        }
        let tree = build(value).unwrap();
        assert_eq!(tree.time_series().len(), 31);
    }

    #[test]
    fn test_shallow_references_resolve_to_shared_nodes() {
        let tree = build(json!({
            "uuid": "v1", "ttype": "vessel",
            "parts": [
                series("t1", "V/T1", "tseries"),
                {"uuid": "s1", "ttype": "sensor", "parts": ["t1"]}
            ]
        }))
        .unwrap();

        let t1 = tree.find("t1").unwrap();
        let sensor = tree.find("s1").unwrap();
        assert_eq!(tree.children(sensor), &[t1]);
        assert_eq!(tree.time_series(), vec![t1]);
    }

    #[test]
    fn test_duplicate_nested_series_yield_once() {
        let tree = build(json!({
            "uuid": "v1", "ttype": "vessel",
            "parts": [
                series("t1", "V/T1", "tseries"),
                {"uuid": "s1", "ttype": "sensor", "parts": [series("t1", "V/T1", "tseries")]}
            ]
        }))
        .unwrap();
        assert_eq!(tree.time_series().len(), 1);
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_unresolvable_reference_is_tree_consistency_error() {
        let err = build(json!({
            "uuid": "v1", "ttype": "vessel",
            "parts": [{"uuid": "s1", "ttype": "sensor", "parts": ["missing"]}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::TreeConsistency(ref u) if u == "missing"));
    }

    #[test]
    fn test_cyclic_reference_terminates() {
        let tree = build(json!({
            "uuid": "v1", "ttype": "vessel",
            "parts": [{"uuid": "s1", "ttype": "sensor", "parts": ["v1", series("t1", "x", "tseries")]}]
        }))
        .unwrap();
        assert_eq!(tree.time_series().len(), 1);
        let rebuilt = tree.to_thing(tree.root()).unwrap();
        assert_eq!(rebuilt.as_value(true)["parts"], json!(["s1"]));
    }

    #[test]
    fn test_rebuilt_back_reference_keeps_uuid() {
        let tree = build(json!({
            "uuid": "v1", "ttype": "vessel",
            "parts": [{"uuid": "s1", "ttype": "sensor", "parts": ["v1", series("t1", "x", "tseries")]}]
        }))
        .unwrap();
        let rebuilt = tree.to_thing(tree.root()).unwrap().as_value(false);
        let sensor_parts = &rebuilt["parts"][0]["parts"];
        assert_eq!(sensor_parts[0], json!("v1"));
        assert_eq!(sensor_parts[1]["uuid"], "t1");
        assert_eq!(sensor_parts.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_parent_is_resolved_by_uuid() {
        let tree = build(nested_tree()).unwrap();
        let t1 = tree.find("t1").unwrap();
        let parent = tree.parent(t1).unwrap();
        assert_eq!(tree.get(parent).unwrap().uuid.as_deref(), Some("c3"));
        assert_eq!(tree.parent(tree.root()), None);
    }

    #[test]
    fn test_to_thing_round_trips_nested_tree() {
        let original = Thing::from_value(nested_tree()).unwrap();
        let expected = original.as_value(false);
        let tree = ThingTree::build(original).unwrap();
        assert_eq!(tree.to_thing(tree.root()).unwrap().as_value(false), expected);
    }

    #[test]
    fn test_catalog_mutation_is_visible_through_tree() {
        let mut catalog = SeriesCatalog::from_tree(build(nested_tree()).unwrap());
        catalog
            .get_mut(0)
            .unwrap()
            .set_field("unit", "degC")
            .unwrap();

        let tree = catalog.tree();
        let c3 = tree.find("c3").unwrap();
        let via_tree = tree.get(tree.children(c3)[0]).unwrap();
        assert_eq!(via_tree.field_value("unit"), Some(&json!("degC")));
    }

    #[test]
    fn test_catalog_lookups() {
        let catalog = SeriesCatalog::from_tree(build(nested_tree()).unwrap());
        assert_eq!(catalog.len(), 4);
        assert_eq!(
            catalog.by_path("FA/gpstrack").map(Thing::ttype),
            Some(ThingType::GpsTrack)
        );
        assert!(catalog.by_uuid("t2").is_some());
        assert!(catalog.by_uuid("fb").is_none());
        assert!(catalog.paths().contains(&"FA/FERRYBOX/SALINITY".to_string()));
    }

    #[test]
    fn test_get_all_time_series_queries_whole_subtree() {
        let meta = FakeMeta::new().tree("v1", nested_tree());
        let mut vessel = Thing::with_path(ThingType::Vessel, "FA");
        vessel.uuid = Some("v1".to_string());

        let catalog = get_all_time_series(&meta, &vessel, None).unwrap();
        assert_eq!(catalog.len(), 4);

        let requests = meta.requests.borrow();
        assert_eq!(requests[0].get("uuid"), Some("v1"));
        assert_eq!(requests[0].get("parts"), Some("100"));
    }

    #[test]
    fn test_get_all_time_series_needs_uuid() {
        let meta = FakeMeta::new();
        let vessel = Thing::with_path(ThingType::Vessel, "FA");
        assert!(matches!(
            get_all_time_series(&meta, &vessel, Some(2)),
            Err(Error::InvalidInput(_))
        ));
    }
}
