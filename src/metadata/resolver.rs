//! Chunk metadata resolver
//!
//! Answers "which chunks hold series P" for one file:
//!
//! ```text
//! chunk_descriptors(P)
//!   cache hit  ──► shared descriptor list
//!   cache miss ──► device index ──► device block ──► partition filter
//!                  ──► chunks of P's measurement, stamped with group version
//! ```
//!
//! The whole-file metadata is read once at construction. Device blocks are
//! read on demand and never retained; only the per-path descriptor lists are
//! cached.

use crate::metadata::cache::{CacheStats, LoadingCache};
use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::partition::PartitionWindow;
use crate::metadata::reader::FileMetadataReader;
use crate::metadata::types::{ChunkDescriptor, ChunkGroupMetadata, FileMetadata};
use crate::schema::{DataType, SeriesPath};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default number of cached series paths
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Construction options of a resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Maximum cached paths; also the prefetch budget in descriptors
    pub cache_capacity: usize,
    pub partition_start: Option<u64>,
    pub partition_end: Option<u64>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            partition_start: None,
            partition_end: None,
        }
    }
}

impl ResolverOptions {
    /// Builder method: set the cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Builder method: restrict resolution to the byte window `(start, end]`
    pub fn partition(mut self, start: u64, end: u64) -> Self {
        self.partition_start = Some(start);
        self.partition_end = Some(end);
        self
    }
}

/// Resolves series paths to chunk descriptors of one file
pub struct ChunkMetadataResolver {
    reader: Arc<dyn FileMetadataReader>,
    metadata: FileMetadata,
    partition: Option<PartitionWindow>,
    cache: LoadingCache<SeriesPath, Vec<ChunkDescriptor>>,
}

impl ChunkMetadataResolver {
    /// Create a resolver over the whole file
    pub fn new(reader: Arc<dyn FileMetadataReader>, cache_capacity: usize) -> MetadataResult<Self> {
        Self::build(reader, cache_capacity, None)
    }

    /// Create a resolver from options; a half-specified window is rejected
    pub fn with_options(
        reader: Arc<dyn FileMetadataReader>,
        options: ResolverOptions,
    ) -> MetadataResult<Self> {
        let partition = PartitionWindow::from_bounds(options.partition_start, options.partition_end)?;
        Self::build(reader, options.cache_capacity, partition)
    }

    /// Create a partitioned resolver from a parameter map holding
    /// `partition_start_offset` and `partition_end_offset`
    pub fn from_params(
        reader: Arc<dyn FileMetadataReader>,
        cache_capacity: usize,
        params: &HashMap<String, u64>,
    ) -> MetadataResult<Self> {
        let partition = PartitionWindow::from_params(params)?;
        Self::build(reader, cache_capacity, Some(partition))
    }

    fn build(
        reader: Arc<dyn FileMetadataReader>,
        cache_capacity: usize,
        partition: Option<PartitionWindow>,
    ) -> MetadataResult<Self> {
        let metadata = reader.read_file_metadata()?;
        tracing::debug!(
            "Opened file metadata: {} devices, {} measurements, partition {:?}",
            metadata.devices.len(),
            metadata.measurements.len(),
            partition
        );

        Ok(Self {
            reader,
            metadata,
            partition,
            cache: LoadingCache::new(cache_capacity),
        })
    }

    fn is_visible(&self, group: &ChunkGroupMetadata) -> bool {
        self.partition.map_or(true, |window| window.contains(group))
    }

    // ==================== Lookups ====================

    /// Chunk descriptors of `path`, in chunk-group then intra-group order
    ///
    /// A path whose device is absent from the file yields an empty list.
    pub fn chunk_descriptors(&self, path: &SeriesPath) -> MetadataResult<Arc<Vec<ChunkDescriptor>>> {
        self.cache.get_or_load(path, |path| self.load_chunk_descriptors(path))
    }

    fn load_chunk_descriptors(&self, path: &SeriesPath) -> MetadataResult<Vec<ChunkDescriptor>> {
        let device_id = path.device();
        let Some(entry) = self.metadata.device_index(&device_id) else {
            return Ok(Vec::new());
        };

        let device = self.reader.read_device_metadata(entry)?;
        let mut descriptors = Vec::new();
        for group in device.chunk_groups.iter().filter(|g| self.is_visible(g)) {
            for chunk in &group.chunks {
                if chunk.measurement_id == path.measurement() {
                    let mut chunk = chunk.clone();
                    chunk.version = group.version;
                    descriptors.push(chunk);
                }
            }
        }

        tracing::debug!("Loaded {} chunk descriptors for {}", descriptors.len(), path);
        Ok(descriptors)
    }

    /// Populate the cache for many paths, reading each device block once
    ///
    /// Devices are visited in ascending order. Scanning stops once the number
    /// of collected descriptors reaches the cache capacity; the device being
    /// scanned at that point is left uncached. Paths without any chunk are not
    /// cached; a later lookup resolves them. Returns the number of paths cached.
    pub fn prefetch(&self, paths: &[SeriesPath]) -> MetadataResult<usize> {
        let mut by_device: BTreeMap<String, BTreeMap<&str, &SeriesPath>> = BTreeMap::new();
        for path in paths {
            by_device
                .entry(path.device())
                .or_default()
                .insert(path.measurement(), path);
        }

        let budget = self.cache.capacity();
        let mut collected = 0usize;
        let mut cached = 0usize;

        for (device_id, wanted) in &by_device {
            let Some(entry) = self.metadata.device_index(device_id) else {
                tracing::warn!("Device {} not in file, skipping prefetch", device_id);
                continue;
            };

            let device = self.reader.read_device_metadata(entry)?;
            let mut found: BTreeMap<&str, Vec<ChunkDescriptor>> =
                wanted.keys().map(|m| (*m, Vec::new())).collect();
            let mut exhausted = false;

            'groups: for group in device.chunk_groups.iter().filter(|g| self.is_visible(g)) {
                for chunk in &group.chunks {
                    if let Some(list) = found.get_mut(chunk.measurement_id.as_str()) {
                        if collected == budget {
                            exhausted = true;
                            break 'groups;
                        }
                        let mut chunk = chunk.clone();
                        chunk.version = group.version;
                        list.push(chunk);
                        collected += 1;
                    }
                }
            }

            if exhausted {
                tracing::debug!(
                    "Prefetch budget of {} descriptors reached at device {}",
                    budget,
                    device_id
                );
                break;
            }

            // Each inserted path holds at least one descriptor, so a single call
            // never inserts more entries than the budget
            for (measurement, descriptors) in found {
                if descriptors.is_empty() {
                    continue;
                }
                if let Some(path) = wanted.get(measurement) {
                    self.cache.insert((*path).clone(), descriptors);
                    cached += 1;
                }
            }
        }

        tracing::debug!("Prefetched {} of {} paths", cached, paths.len());
        Ok(cached)
    }

    /// Data type of a measurement from the file's schema registry
    pub fn data_type(&self, measurement_id: &str) -> MetadataResult<DataType> {
        self.metadata
            .measurements
            .get(measurement_id)
            .map(|schema| schema.data_type)
            .ok_or_else(|| MetadataError::NoMeasurement(format!("{} not found", measurement_id)))
    }

    // ==================== Accessors ====================

    /// Whole-file metadata read at construction
    pub fn file_metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn partition(&self) -> Option<PartitionWindow> {
        self.partition
    }

    /// Paths currently cached, most recently used first
    pub fn cached_paths(&self) -> Vec<SeriesPath> {
        self.cache.keys()
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl std::fmt::Debug for ChunkMetadataResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMetadataResolver")
            .field("devices", &self.metadata.devices.len())
            .field("partition", &self.partition)
            .field("cache", &self.cache)
            .finish()
    }
}
