//! Chunk metadata model
//!
//! ```text
//! FileMetadata
//!   devices: device_id -> DeviceIndexEntry ──► DeviceMetadata
//!                                                chunk_groups: [ChunkGroupMetadata]
//!                                                                chunks: [ChunkDescriptor]
//!   measurements: measurement_id -> MeasurementSchema
//! ```

use crate::schema::{DataType, MeasurementSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Location and statistics of one chunk of a single series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub device_id: String,
    pub measurement_id: String,
    pub data_type: DataType,
    /// Byte offset of the chunk in the file
    pub offset: u64,
    /// Size of the chunk in bytes
    pub size: u64,
    pub num_points: u64,
    /// Minimum timestamp in the chunk
    pub start_time: i64,
    /// Maximum timestamp in the chunk
    pub end_time: i64,
    /// Version of the owning chunk group, stamped at resolution time
    #[serde(default)]
    pub version: u64,
}

impl ChunkDescriptor {
    /// Series path of this chunk
    pub fn series(&self) -> String {
        format!("{}.{}", self.device_id, self.measurement_id)
    }

    /// Check if the chunk's time range overlaps `[start, end]`
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start_time <= end && self.end_time >= start
    }
}

/// One contiguous write unit of a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkGroupMetadata {
    pub device_id: String,
    /// First byte of the chunk group
    pub start_offset: u64,
    /// Byte just past the chunk group
    pub end_offset: u64,
    pub version: u64,
    pub chunks: Vec<ChunkDescriptor>,
}

/// Metadata block of one device
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceMetadata {
    pub chunk_groups: Vec<ChunkGroupMetadata>,
    pub start_time: i64,
    pub end_time: i64,
}

impl DeviceMetadata {
    /// Append a chunk group, widening the device's time range
    pub fn push_group(&mut self, group: ChunkGroupMetadata) {
        let mut first = self.chunk_count() == 0;
        for chunk in &group.chunks {
            if first {
                self.start_time = chunk.start_time;
                self.end_time = chunk.end_time;
                first = false;
            } else {
                self.start_time = self.start_time.min(chunk.start_time);
                self.end_time = self.end_time.max(chunk.end_time);
            }
        }
        self.chunk_groups.push(group);
    }

    /// Total number of chunk descriptors in the block
    pub fn chunk_count(&self) -> usize {
        self.chunk_groups.iter().map(|g| g.chunks.len()).sum()
    }
}

/// Where a device's metadata block lives in the file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceIndexEntry {
    pub offset: u64,
    pub len: u32,
    pub start_time: i64,
    pub end_time: i64,
}

/// Whole-file metadata, read once per file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    /// Device index, ordered by device id
    pub devices: BTreeMap<String, DeviceIndexEntry>,
    /// Global schema registry of the file
    pub measurements: HashMap<String, MeasurementSchema>,
    pub created_by: Option<String>,
}

impl FileMetadata {
    pub fn contains_device(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn device_index(&self, device_id: &str) -> Option<&DeviceIndexEntry> {
        self.devices.get(device_id)
    }
}
