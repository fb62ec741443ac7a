//! Query data sources
//!
//! A query reads each series from the files and in-memory batches of the
//! storage group that governs it:
//!
//! - **sequence**: sorted, non-overlapping data written in order
//! - **unsequence**: late-arriving data that corrects or extends the sequence
//!
//! `SourceRegistry` keeps these lists per storage group and hands out a
//! snapshot per query, so registrations made after a reader is built are not
//! visible to it.

use crate::metadata::{ChunkMetadataResolver, ChunkReader};
use crate::query::error::{QueryError, QueryResult};
use crate::schema::{SchemaError, SchemaTree, SeriesPath, TimeValuePair};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Identity of one running query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A series file: metadata resolver plus the chunk decoder of the same file
#[derive(Clone)]
pub struct FileSource {
    pub name: String,
    pub resolver: Arc<ChunkMetadataResolver>,
    pub chunks: Arc<dyn ChunkReader>,
}

impl FileSource {
    pub fn new(
        name: impl Into<String>,
        resolver: Arc<ChunkMetadataResolver>,
        chunks: Arc<dyn ChunkReader>,
    ) -> Self {
        Self {
            name: name.into(),
            resolver,
            chunks,
        }
    }
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("name", &self.name)
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// Buffered points of one series not yet flushed to a file
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub path: SeriesPath,
    pub version: u64,
    pub points: Arc<Vec<TimeValuePair>>,
}

impl MemorySource {
    pub fn new(path: SeriesPath, version: u64, points: Vec<TimeValuePair>) -> Self {
        Self {
            path,
            version,
            points: Arc::new(points),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DataSource {
    File(FileSource),
    Memory(MemorySource),
}

impl DataSource {
    /// Whether the source may hold points of `path`
    fn covers(&self, path: &SeriesPath) -> bool {
        match self {
            Self::File(_) => true,
            Self::Memory(memory) => memory.path == *path,
        }
    }
}

/// Sources to read for one series
#[derive(Debug, Clone, Default)]
pub struct QueryDataSource {
    pub sequence: Vec<DataSource>,
    pub unsequence: Vec<DataSource>,
}

impl QueryDataSource {
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty() && self.unsequence.is_empty()
    }
}

/// Supplies the data sources of a series at query start
pub trait QueryDataSourceProvider: Send + Sync {
    fn query_data_source(
        &self,
        path: &SeriesPath,
        context: &QueryContext,
    ) -> QueryResult<QueryDataSource>;

    /// Warm metadata caches for `paths` ahead of leaf construction
    fn prefetch(&self, _paths: &[SeriesPath]) -> QueryResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct GroupSources {
    sequence: Vec<DataSource>,
    unsequence: Vec<DataSource>,
}

/// Sources per storage group, validated against the schema tree
#[derive(Debug)]
pub struct SourceRegistry {
    schema: Arc<SchemaTree>,
    groups: RwLock<HashMap<String, GroupSources>>,
}

impl SourceRegistry {
    pub fn new(schema: Arc<SchemaTree>) -> Self {
        Self {
            schema,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Append a sequence source to `storage_group`
    pub fn register_sequence(&self, storage_group: &str, source: DataSource) -> QueryResult<()> {
        self.register(storage_group, source, false)
    }

    /// Append an unsequence source to `storage_group`
    ///
    /// Later registrations win over earlier ones of the same version.
    pub fn register_unsequence(&self, storage_group: &str, source: DataSource) -> QueryResult<()> {
        self.register(storage_group, source, true)
    }

    fn register(&self, storage_group: &str, source: DataSource, unsequence: bool) -> QueryResult<()> {
        if !self.schema.is_storage_group(storage_group) {
            return Err(SchemaError::NoStorageGroup(storage_group.to_string()).into());
        }

        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group = groups.entry(storage_group.to_string()).or_default();
        if unsequence {
            group.unsequence.push(source);
        } else {
            group.sequence.push(source);
        }
        Ok(())
    }

    /// Number of `(sequence, unsequence)` sources registered for a group
    pub fn source_counts(&self, storage_group: &str) -> (usize, usize) {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .get(storage_group)
            .map_or((0, 0), |g| (g.sequence.len(), g.unsequence.len()))
    }

    fn file_sources(&self) -> Vec<FileSource> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        groups
            .values()
            .flat_map(|g| g.sequence.iter().chain(g.unsequence.iter()))
            .filter_map(|source| match source {
                DataSource::File(file) => Some(file.clone()),
                DataSource::Memory(_) => None,
            })
            .collect()
    }
}

impl QueryDataSourceProvider for SourceRegistry {
    fn query_data_source(
        &self,
        path: &SeriesPath,
        context: &QueryContext,
    ) -> QueryResult<QueryDataSource> {
        let full_path = path.full_path();
        if !self.schema.path_exists(&full_path) {
            return Err(QueryError::Schema(SchemaError::NotFound(full_path)));
        }
        let storage_group = self.schema.storage_group_of(&full_path)?;

        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        let Some(group) = groups.get(&storage_group) else {
            return Ok(QueryDataSource::default());
        };

        let snapshot = |sources: &[DataSource]| {
            sources
                .iter()
                .filter(|s| s.covers(path))
                .cloned()
                .collect::<Vec<_>>()
        };
        let data_source = QueryDataSource {
            sequence: snapshot(&group.sequence),
            unsequence: snapshot(&group.unsequence),
        };

        debug!(
            "Query {}: {} has {} sequence and {} unsequence sources",
            context.id,
            path,
            data_source.sequence.len(),
            data_source.unsequence.len()
        );
        Ok(data_source)
    }

    fn prefetch(&self, paths: &[SeriesPath]) -> QueryResult<()> {
        for file in self.file_sources() {
            let cached = file.resolver.prefetch(paths)?;
            debug!("Prefetched {} paths from {}", cached, file.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryFileReader;
    use crate::schema::{Compression, DataType, Encoding, MeasurementSchema, Value};

    fn schema() -> Arc<SchemaTree> {
        let tree = SchemaTree::default();
        tree.set_storage_group("root.sg").unwrap();
        tree.set_storage_group("root.other").unwrap();
        let int64 = MeasurementSchema::new(DataType::Int64, Encoding::Plain, Compression::Lz4);
        tree.add_measurement("root.sg.d1.s1", int64.clone()).unwrap();
        tree.add_measurement("root.sg.d1.s2", int64.clone()).unwrap();
        tree.add_measurement("root.other.d1.s1", int64).unwrap();
        Arc::new(tree)
    }

    fn path(p: &str) -> SeriesPath {
        SeriesPath::parse(p).unwrap()
    }

    fn memory(p: &str, version: u64) -> DataSource {
        DataSource::Memory(MemorySource::new(
            path(p),
            version,
            vec![TimeValuePair::new(1, Value::Int64(1))],
        ))
    }

    #[test]
    fn test_register_requires_storage_group() {
        let registry = SourceRegistry::new(schema());
        let err = registry
            .register_sequence("root.sg.d1", memory("root.sg.d1.s1", 1))
            .unwrap_err();
        assert!(matches!(err, QueryError::Schema(SchemaError::NoStorageGroup(_))));
        assert_eq!(registry.source_counts("root.sg.d1"), (0, 0));
    }

    #[test]
    fn test_query_data_source_filters_memory_sources() {
        let registry = SourceRegistry::new(schema());
        registry.register_sequence("root.sg", memory("root.sg.d1.s1", 1)).unwrap();
        registry.register_sequence("root.sg", memory("root.sg.d1.s2", 1)).unwrap();
        registry.register_unsequence("root.sg", memory("root.sg.d1.s1", 2)).unwrap();
        registry.register_sequence("root.other", memory("root.other.d1.s1", 1)).unwrap();

        let ctx = QueryContext::new();
        let source = registry.query_data_source(&path("root.sg.d1.s1"), &ctx).unwrap();
        assert_eq!(source.sequence.len(), 1);
        assert_eq!(source.unsequence.len(), 1);
        assert_eq!(registry.source_counts("root.sg"), (2, 1));
    }

    #[test]
    fn test_query_data_source_unknown_path() {
        let registry = SourceRegistry::new(schema());
        let err = registry
            .query_data_source(&path("root.sg.d9.s1"), &QueryContext::new())
            .unwrap_err();
        assert!(matches!(err, QueryError::Schema(SchemaError::NotFound(_))));
    }

    #[test]
    fn test_snapshot_isolation() {
        let registry = SourceRegistry::new(schema());
        registry.register_sequence("root.sg", memory("root.sg.d1.s1", 1)).unwrap();

        let ctx = QueryContext::new();
        let before = registry.query_data_source(&path("root.sg.d1.s1"), &ctx).unwrap();
        registry.register_unsequence("root.sg", memory("root.sg.d1.s1", 2)).unwrap();

        assert!(before.unsequence.is_empty());
        let after = registry.query_data_source(&path("root.sg.d1.s1"), &ctx).unwrap();
        assert_eq!(after.unsequence.len(), 1);
    }

    #[test]
    fn test_prefetch_warms_file_resolvers() {
        let mut file = MemoryFileReader::new();
        file.add_chunk_group(
            "root.sg.d1",
            1,
            vec![("s1", vec![TimeValuePair::new(1, Value::Int64(1))])],
        );
        let file = Arc::new(file);
        let resolver = Arc::new(ChunkMetadataResolver::new(file.clone(), 16).unwrap());

        let registry = SourceRegistry::new(schema());
        registry
            .register_sequence(
                "root.sg",
                DataSource::File(FileSource::new("f1", resolver.clone(), file.clone())),
            )
            .unwrap();

        registry.prefetch(&[path("root.sg.d1.s1")]).unwrap();
        assert_eq!(resolver.cached_paths(), vec![path("root.sg.d1.s1")]);
        assert_eq!(file.device_reads(), 1);
    }

    #[test]
    fn test_empty_group_yields_empty_source() {
        let registry = SourceRegistry::new(schema());
        let source = registry
            .query_data_source(&path("root.sg.d1.s1"), &QueryContext::new())
            .unwrap();
        assert!(source.is_empty());
    }
}
