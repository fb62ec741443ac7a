//! SeriesDB Chunk Metadata
//!
//! Locates the on-disk chunks holding a series:
//!
//! - **types**: Chunk, chunk group, device and file metadata
//! - **reader**: Collaborator traits and an in-memory implementation
//! - **cache**: Bounded LRU loading cache
//! - **partition**: Byte-range partition window
//! - **resolver**: `ChunkMetadataResolver`
//! - **file**: Concrete series file format
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! SeriesPath ──► ChunkMetadataResolver ──► LoadingCache
//!                      │ miss
//!                      ▼
//!               FileMetadataReader (device block) ──► PartitionWindow filter
//! ```

pub mod cache;
pub mod error;
pub mod file;
pub mod partition;
pub mod reader;
pub mod resolver;
pub mod types;

pub use cache::{CacheStats, LoadingCache};
pub use error::{MetadataError, MetadataResult};
pub use file::{SeriesFileReader, SeriesFileWriter};
pub use partition::{PartitionWindow, PARTITION_END_OFFSET, PARTITION_START_OFFSET};
pub use reader::{ChunkReader, FileMetadataReader, MemoryFileReader};
pub use resolver::{ChunkMetadataResolver, ResolverOptions, DEFAULT_CACHE_CAPACITY};
pub use types::{
    ChunkDescriptor, ChunkGroupMetadata, DeviceIndexEntry, DeviceMetadata, FileMetadata,
};
