//! Schema Tree - hierarchical namespace of storage groups and measurements
//!
//! Maps dotted series paths onto a rooted tree:
//!
//! ```text
//! root
//!  └─ sg1            (storage group)
//!      ├─ d1         (internal / device)
//!      │   ├─ s1     (measurement: INT32, RLE, SNAPPY)
//!      │   └─ s2     (measurement)
//!      └─ d2
//!          └─ s1
//! ```
//!
//! Nodes live in an arena addressed by stable indices; each node maps child
//! names to child indices in insertion order. Every measurement has exactly
//! one storage-group ancestor, and storage groups never nest.
//!
//! The whole arena sits behind one `RwLock`: every operation holds the lock
//! for its full duration, so readers never observe a half-applied mutation.

use crate::schema::error::{SchemaError, SchemaResult};
use crate::schema::path::{SeriesPath, WILDCARD};
use crate::schema::types::{MeasurementSchema, NodeKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Name of the root segment unless configured otherwise
pub const DEFAULT_ROOT: &str = "root";

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

type NodeId = usize;

const ROOT_ID: NodeId = 0;

#[derive(Debug)]
struct Node {
    name: String,
    kind: NodeKind,
    children: IndexMap<String, NodeId>,
    schema: Option<MeasurementSchema>,
}

impl Node {
    fn new(name: &str, kind: NodeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            children: IndexMap::new(),
            schema: None,
        }
    }
}

/// Node storage with slot reuse
#[derive(Debug)]
struct Arena {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl Arena {
    fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![Some(Node::new(root_name, NodeKind::Internal))],
            free: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        match &self.nodes[id] {
            Some(node) => node,
            None => unreachable!("dangling schema node id {}", id),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.nodes[id] {
            Some(node) => node,
            None => unreachable!("dangling schema node id {}", id),
        }
    }

    fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id).children.get(name).copied()
    }

    /// Walk `segments` (root excluded) from the root
    fn walk(&self, segments: &[String]) -> Option<NodeId> {
        segments
            .iter()
            .try_fold(ROOT_ID, |id, segment| self.child(id, segment))
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Attach a new child under `parent`
    fn add_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let name = node.name.clone();
        let id = self.alloc(node);
        self.node_mut(parent).children.insert(name, id);
        id
    }

    /// Walk `segments` from the root, creating internal nodes where missing
    fn ensure_path(&mut self, segments: &[String]) -> NodeId {
        let mut current = ROOT_ID;
        for segment in segments {
            current = match self.child(current, segment) {
                Some(child) => child,
                None => self.add_child(current, Node::new(segment, NodeKind::Internal)),
            };
        }
        current
    }

    /// Free `id` and everything below it
    fn release_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes[current].take() {
                stack.extend(node.children.values().copied());
                self.free.push(current);
            }
        }
    }

    fn has_storage_group_below(&self, id: NodeId) -> bool {
        self.node(id).children.values().any(|&child| {
            self.node(child).kind == NodeKind::StorageGroup || self.has_storage_group_below(child)
        })
    }

    fn collect_storage_groups(
        &self,
        id: NodeId,
        prefix: &mut Vec<String>,
        out: &mut BTreeSet<String>,
    ) {
        let node = self.node(id);
        if node.kind == NodeKind::StorageGroup {
            out.insert(prefix.join("."));
            return;
        }
        for (name, &child) in &node.children {
            prefix.push(name.clone());
            self.collect_storage_groups(child, prefix, out);
            prefix.pop();
        }
    }

    fn collect_measurements(
        &self,
        id: NodeId,
        prefix: &mut Vec<String>,
        out: &mut BTreeMap<String, Vec<String>>,
    ) {
        let node = self.node(id);
        if node.kind == NodeKind::Measurement {
            let device = prefix[..prefix.len() - 1].join(".");
            out.entry(device).or_default().push(prefix.join("."));
            return;
        }
        for (name, &child) in &node.children {
            prefix.push(name.clone());
            self.collect_measurements(child, prefix, out);
            prefix.pop();
        }
    }

    fn collect_matches(
        &self,
        id: NodeId,
        pattern: &[String],
        prefix: &mut Vec<String>,
        out: &mut BTreeMap<String, Vec<String>>,
    ) {
        let Some((segment, rest)) = pattern.split_first() else {
            self.collect_measurements(id, prefix, out);
            return;
        };

        let node = self.node(id);
        if segment == WILDCARD {
            for (name, &child) in &node.children {
                prefix.push(name.clone());
                self.collect_matches(child, rest, prefix, out);
                prefix.pop();
            }
        } else if let Some(&child) = node.children.get(segment) {
            prefix.push(segment.clone());
            self.collect_matches(child, rest, prefix, out);
            prefix.pop();
        }
    }

    fn count_measurements(&self, id: NodeId) -> usize {
        let node = self.node(id);
        if node.kind == NodeKind::Measurement {
            return 1;
        }
        node.children
            .values()
            .map(|&child| self.count_measurements(child))
            .sum()
    }
}

/// Serialization format for JSON snapshots
#[derive(Serialize, Deserialize)]
struct SchemaSnapshot {
    version: u32,
    root: String,
    storage_groups: Vec<String>,
    measurements: Vec<MeasurementEntry>,
}

#[derive(Serialize, Deserialize)]
struct MeasurementEntry {
    path: String,
    #[serde(flatten)]
    schema: MeasurementSchema,
}

/// Thread-safe schema namespace
#[derive(Debug)]
pub struct SchemaTree {
    root_name: String,
    arena: RwLock<Arena>,
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

impl SchemaTree {
    /// Create an empty tree whose root segment is `root_name`
    pub fn new(root_name: impl Into<String>) -> Self {
        let root_name = root_name.into();
        let arena = Arena::new(&root_name);
        Self {
            root_name,
            arena: RwLock::new(arena),
        }
    }

    /// Name of the root segment
    pub fn root_name(&self) -> &str {
        &self.root_name
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse a pattern path and check it starts at the root
    fn pattern(&self, path: &str) -> SchemaResult<SeriesPath> {
        let parsed = SeriesPath::parse(path)?;
        if parsed.segments()[0] != self.root_name {
            return Err(SchemaError::IllegalPath(format!(
                "{} does not start with {}",
                path, self.root_name
            )));
        }
        Ok(parsed)
    }

    /// Parse a concrete (wildcard-free) path under the root
    fn concrete(&self, path: &str) -> SchemaResult<SeriesPath> {
        let parsed = self.pattern(path)?;
        if parsed.has_wildcard() {
            return Err(SchemaError::IllegalPath(format!(
                "wildcards are not allowed in {}",
                path
            )));
        }
        Ok(parsed)
    }

    // ==================== Query Methods ====================

    /// True iff `path` resolves to an existing node (exact match)
    pub fn path_exists(&self, path: &str) -> bool {
        match self.concrete(path) {
            Ok(parsed) => self.read().walk(&parsed.segments()[1..]).is_some(),
            Err(_) => false,
        }
    }

    /// Kind of the node at `path`, if it exists
    pub fn node_kind(&self, path: &str) -> Option<NodeKind> {
        let parsed = self.concrete(path).ok()?;
        let arena = self.read();
        arena
            .walk(&parsed.segments()[1..])
            .map(|id| arena.node(id).kind)
    }

    /// True iff the node at `path` is itself a storage group
    pub fn is_storage_group(&self, path: &str) -> bool {
        self.node_kind(path) == Some(NodeKind::StorageGroup)
    }

    /// Path of the nearest storage-group ancestor (inclusive) of `path`
    ///
    /// Nodes below the storage group need not exist yet.
    pub fn storage_group_of(&self, path: &str) -> SchemaResult<String> {
        let parsed = self.concrete(path)?;
        let arena = self.read();

        let segments = parsed.segments();
        let mut current = ROOT_ID;
        for (depth, segment) in segments.iter().enumerate().skip(1) {
            match arena.child(current, segment) {
                Some(child) => {
                    if arena.node(child).kind == NodeKind::StorageGroup {
                        return Ok(segments[..=depth].join("."));
                    }
                    current = child;
                }
                None => break,
            }
        }

        Err(SchemaError::NoStorageGroup(parsed.full_path()))
    }

    /// True iff some ancestor (inclusive) of `path` is a storage group
    pub fn is_under_storage_group(&self, path: &str) -> bool {
        self.storage_group_of(path).is_ok()
    }

    /// Storage groups relevant to `path`
    ///
    /// If `path` lies under a storage group, that group alone; otherwise every
    /// storage group at or below `path`.
    pub fn storage_groups_under(&self, path: &str) -> SchemaResult<BTreeSet<String>> {
        let parsed = self.concrete(path)?;
        let arena = self.read();

        let segments = parsed.segments();
        let mut result = BTreeSet::new();
        let mut current = ROOT_ID;
        for (depth, segment) in segments.iter().enumerate().skip(1) {
            match arena.child(current, segment) {
                Some(child) => {
                    if arena.node(child).kind == NodeKind::StorageGroup {
                        result.insert(segments[..=depth].join("."));
                        return Ok(result);
                    }
                    current = child;
                }
                None => return Ok(result),
            }
        }

        let mut prefix = segments.to_vec();
        arena.collect_storage_groups(current, &mut prefix, &mut result);
        Ok(result)
    }

    /// Every storage group in the tree
    pub fn all_storage_groups(&self) -> BTreeSet<String> {
        let arena = self.read();
        let mut result = BTreeSet::new();
        let mut prefix = vec![self.root_name.clone()];
        arena.collect_storage_groups(ROOT_ID, &mut prefix, &mut result);
        result
    }

    /// Expand a pattern into concrete measurement paths grouped by device
    ///
    /// Each `*` matches exactly one segment. A pattern that ends above the
    /// measurement level matches every measurement below it.
    pub fn expand_wildcard(&self, pattern: &str) -> SchemaResult<BTreeMap<String, Vec<String>>> {
        let parsed = self.pattern(pattern)?;
        let arena = self.read();

        let mut result = BTreeMap::new();
        let mut prefix = vec![self.root_name.clone()];
        arena.collect_matches(ROOT_ID, &parsed.segments()[1..], &mut prefix, &mut result);
        Ok(result)
    }

    /// Schema record of the measurement at `path`
    pub fn schema_of(&self, path: &str) -> SchemaResult<MeasurementSchema> {
        let parsed = self.concrete(path)?;
        let arena = self.read();
        arena
            .walk(&parsed.segments()[1..])
            .and_then(|id| arena.node(id).schema.clone())
            .ok_or_else(|| SchemaError::NotFound(parsed.full_path()))
    }

    /// Number of measurements in the tree
    pub fn measurement_count(&self) -> usize {
        self.read().count_measurements(ROOT_ID)
    }

    // ==================== Mutation Methods ====================

    /// Mark `path` as a storage group, creating intermediate nodes
    pub fn set_storage_group(&self, path: &str) -> SchemaResult<()> {
        let parsed = self.concrete(path)?;
        let segments = &parsed.segments()[1..];
        if segments.is_empty() {
            return Err(SchemaError::Structural(format!(
                "{} can't be a storage group",
                self.root_name
            )));
        }

        let mut arena = self.write();

        let mut current = Some(ROOT_ID);
        for (depth, segment) in segments.iter().enumerate() {
            let Some(child) = current.and_then(|id| arena.child(id, segment)) else {
                current = None;
                break;
            };
            let node_path = parsed.segments()[..=depth + 1].join(".");
            match arena.node(child).kind {
                NodeKind::StorageGroup => {
                    return Err(SchemaError::Conflict(format!(
                        "{} is already a storage group, {} can't be set",
                        node_path,
                        parsed.full_path()
                    )));
                }
                NodeKind::Measurement => {
                    return Err(SchemaError::Conflict(format!(
                        "{} is a measurement, {} can't be set to a storage group",
                        node_path,
                        parsed.full_path()
                    )));
                }
                NodeKind::Internal => current = Some(child),
            }
        }

        if let Some(existing) = current {
            if arena.has_storage_group_below(existing) {
                return Err(SchemaError::Conflict(format!(
                    "{} already contains a storage group",
                    parsed.full_path()
                )));
            }
        }

        let id = arena.ensure_path(segments);
        arena.node_mut(id).kind = NodeKind::StorageGroup;
        tracing::debug!("Set storage group {}", parsed);
        Ok(())
    }

    /// Declare a measurement at `path`
    ///
    /// Re-declaring an identical schema is a no-op. The tree is left untouched
    /// when validation fails.
    pub fn add_measurement(&self, path: &str, schema: MeasurementSchema) -> SchemaResult<()> {
        let parsed = self.concrete(path)?;
        let segments = &parsed.segments()[1..];
        let Some((terminal, parents)) = segments.split_last() else {
            return Err(SchemaError::Structural(format!(
                "{} can't be a measurement",
                self.root_name
            )));
        };

        let mut arena = self.write();

        let mut current = Some(ROOT_ID);
        let mut under_storage_group = false;
        for segment in parents {
            let Some(child) = current.and_then(|id| arena.child(id, segment)) else {
                current = None;
                break;
            };
            match arena.node(child).kind {
                NodeKind::Measurement => {
                    return Err(SchemaError::Structural(format!(
                        "node [{}] is a measurement, {} can't be created under it",
                        segment,
                        parsed.full_path()
                    )));
                }
                NodeKind::StorageGroup => under_storage_group = true,
                NodeKind::Internal => {}
            }
            current = Some(child);
        }

        if let Some(existing) = current.and_then(|id| arena.child(id, terminal)) {
            let node = arena.node(existing);
            return match node.kind {
                NodeKind::Measurement if node.schema.as_ref() == Some(&schema) => Ok(()),
                NodeKind::Measurement => Err(SchemaError::Conflict(format!(
                    "{} already exists with a different schema",
                    parsed.full_path()
                ))),
                NodeKind::StorageGroup => Err(SchemaError::Structural(format!(
                    "{} is a storage group, it can't be a measurement",
                    parsed.full_path()
                ))),
                NodeKind::Internal => Err(SchemaError::Structural(format!(
                    "{} has children, it can't be a measurement",
                    parsed.full_path()
                ))),
            };
        }

        if !under_storage_group {
            return Err(SchemaError::NoStorageGroup(parsed.full_path()));
        }

        let parent = arena.ensure_path(parents);
        let mut node = Node::new(terminal, NodeKind::Measurement);
        node.schema = Some(schema);
        arena.add_child(parent, node);
        tracing::debug!("Added measurement {}", parsed);
        Ok(())
    }

    /// Delete the node at `path` and its subtree
    ///
    /// Ancestors left without children are pruned up to, but never including,
    /// the nearest storage group or the root.
    pub fn delete_path(&self, path: &str) -> SchemaResult<()> {
        let parsed = self.concrete(path)?;
        let segments = &parsed.segments()[1..];
        if segments.is_empty() {
            return Err(SchemaError::Structural(format!(
                "{} can't be deleted",
                self.root_name
            )));
        }

        let mut arena = self.write();

        let mut chain = vec![ROOT_ID];
        for segment in segments {
            let parent = chain[chain.len() - 1];
            match arena.child(parent, segment) {
                Some(child) => chain.push(child),
                None => return Err(SchemaError::NotFound(parsed.full_path())),
            }
        }

        let mut removed = chain.pop();
        while let (Some(id), Some(parent)) = (removed, chain.last().copied()) {
            let name = arena.node(id).name.clone();
            arena.node_mut(parent).children.shift_remove(&name);
            arena.release_subtree(id);

            let parent_node = arena.node(parent);
            removed = if parent != ROOT_ID
                && parent_node.kind == NodeKind::Internal
                && parent_node.children.is_empty()
            {
                chain.pop()
            } else {
                None
            };
        }

        tracing::debug!("Deleted path {}", parsed);
        Ok(())
    }

    // ==================== Persistence Methods ====================

    /// Persist the namespace to a JSON snapshot
    pub fn save(&self, path: &Path) -> SchemaResult<()> {
        let snapshot = {
            let arena = self.read();
            let storage_groups = {
                let mut groups = BTreeSet::new();
                let mut prefix = vec![self.root_name.clone()];
                arena.collect_storage_groups(ROOT_ID, &mut prefix, &mut groups);
                groups.into_iter().collect()
            };

            let mut devices = BTreeMap::new();
            let mut prefix = vec![self.root_name.clone()];
            arena.collect_measurements(ROOT_ID, &mut prefix, &mut devices);

            let mut measurements = Vec::new();
            for series in devices.into_values().flatten() {
                if let Some(schema) = SeriesPath::parse(&series)
                    .ok()
                    .and_then(|p| arena.walk(&p.segments()[1..]))
                    .and_then(|id| arena.node(id).schema.clone())
                {
                    measurements.push(MeasurementEntry { path: series, schema });
                }
            }

            SchemaSnapshot {
                version: SNAPSHOT_VERSION,
                root: self.root_name.clone(),
                storage_groups,
                measurements,
            }
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a namespace from a JSON snapshot
    ///
    /// A missing file yields an empty tree with the default root.
    pub fn load(path: &Path) -> SchemaResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let reader = BufReader::new(File::open(path)?);
        let snapshot: SchemaSnapshot = serde_json::from_reader(reader)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SchemaError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let tree = Self::new(snapshot.root);
        for group in &snapshot.storage_groups {
            if let Err(e) = tree.set_storage_group(group) {
                tracing::warn!("Skipping storage group {} from snapshot: {}", group, e);
            }
        }
        for entry in snapshot.measurements {
            if let Err(e) = tree.add_measurement(&entry.path, entry.schema) {
                tracing::warn!("Skipping measurement {} from snapshot: {}", entry.path, e);
            }
        }

        tracing::info!(
            "Loaded schema snapshot {:?}: {} storage groups, {} measurements",
            path,
            tree.all_storage_groups().len(),
            tree.measurement_count()
        );
        Ok(tree)
    }
}
