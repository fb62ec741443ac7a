//! Collaborator interfaces of the resolver and an in-memory implementation
//!
//! - `FileMetadataReader`: whole-file metadata and device metadata blocks
//! - `ChunkReader`: decodes the points of one chunk
//!
//! `SeriesFileReader` implements both over a file on disk; `MemoryFileReader`
//! implements both in memory and counts every read.

use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::types::{
    ChunkDescriptor, ChunkGroupMetadata, DeviceIndexEntry, DeviceMetadata, FileMetadata,
};
use crate::schema::{Compression, DataType, Encoding, MeasurementSchema, TimeValuePair};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Reads file-level and device-level metadata
pub trait FileMetadataReader: Send + Sync {
    /// Read the whole-file metadata
    fn read_file_metadata(&self) -> MetadataResult<FileMetadata>;

    /// Read the device metadata block described by `entry`
    fn read_device_metadata(&self, entry: &DeviceIndexEntry) -> MetadataResult<DeviceMetadata>;
}

/// Decodes the points of a chunk
pub trait ChunkReader: Send + Sync {
    /// Read every point of `chunk`, in ascending timestamp order
    fn read_chunk(&self, chunk: &ChunkDescriptor) -> MetadataResult<Vec<TimeValuePair>>;
}

/// Bytes accounted per point for synthetic offsets
const POINT_SIZE: u64 = 16;

/// In-memory file with read counters
#[derive(Debug, Default)]
pub struct MemoryFileReader {
    metadata: FileMetadata,
    devices: Vec<DeviceMetadata>,
    chunks: HashMap<u64, Vec<TimeValuePair>>,
    next_offset: u64,
    file_reads: AtomicUsize,
    device_reads: AtomicUsize,
    chunk_reads: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemoryFileReader {
    pub fn new() -> Self {
        Self {
            next_offset: 6,
            ..Default::default()
        }
    }

    /// Register a measurement in the file's schema registry
    pub fn add_measurement(&mut self, measurement_id: &str, schema: MeasurementSchema) -> &mut Self {
        self.metadata
            .measurements
            .insert(measurement_id.to_string(), schema);
        self
    }

    /// Append a chunk group of `device` holding one chunk per `(measurement, points)`
    ///
    /// Measurements not yet registered are registered with the data type of
    /// their first point.
    pub fn add_chunk_group(
        &mut self,
        device_id: &str,
        version: u64,
        series: Vec<(&str, Vec<TimeValuePair>)>,
    ) -> &mut Self {
        let start_offset = self.next_offset;
        let mut chunks = Vec::with_capacity(series.len());

        for (measurement_id, mut points) in series {
            points.sort_by_key(|p| p.timestamp);
            let data_type = match self.metadata.measurements.get(measurement_id) {
                Some(schema) => schema.data_type,
                None => {
                    let data_type = points
                        .first()
                        .map(|p| p.value.data_type())
                        .unwrap_or(DataType::Int64);
                    self.add_measurement(
                        measurement_id,
                        MeasurementSchema::new(data_type, Encoding::Plain, Compression::Uncompressed),
                    );
                    data_type
                }
            };

            let size = (points.len() as u64).max(1) * POINT_SIZE;
            chunks.push(ChunkDescriptor {
                device_id: device_id.to_string(),
                measurement_id: measurement_id.to_string(),
                data_type,
                offset: self.next_offset,
                size,
                num_points: points.len() as u64,
                start_time: points.first().map(|p| p.timestamp).unwrap_or_default(),
                end_time: points.last().map(|p| p.timestamp).unwrap_or_default(),
                version: 0,
            });
            self.chunks.insert(self.next_offset, points);
            self.next_offset += size;
        }

        let group = ChunkGroupMetadata {
            device_id: device_id.to_string(),
            start_offset,
            end_offset: self.next_offset,
            version,
            chunks,
        };

        let slot = match self.metadata.devices.get(device_id) {
            Some(entry) => entry.offset as usize,
            None => {
                self.devices.push(DeviceMetadata::default());
                self.devices.len() - 1
            }
        };
        let device = &mut self.devices[slot];
        device.push_group(group);
        self.metadata.devices.insert(
            device_id.to_string(),
            DeviceIndexEntry {
                offset: slot as u64,
                len: 0,
                start_time: device.start_time,
                end_time: device.end_time,
            },
        );
        self
    }

    /// Make every subsequent device and chunk read fail with an I/O error
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of whole-file metadata reads
    pub fn file_reads(&self) -> usize {
        self.file_reads.load(Ordering::SeqCst)
    }

    /// Number of device metadata block reads
    pub fn device_reads(&self) -> usize {
        self.device_reads.load(Ordering::SeqCst)
    }

    /// Number of chunk reads
    pub fn chunk_reads(&self) -> usize {
        self.chunk_reads.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> MetadataResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected read failure",
            )));
        }
        Ok(())
    }
}

impl FileMetadataReader for MemoryFileReader {
    fn read_file_metadata(&self) -> MetadataResult<FileMetadata> {
        self.file_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }

    fn read_device_metadata(&self, entry: &DeviceIndexEntry) -> MetadataResult<DeviceMetadata> {
        self.device_reads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.devices
            .get(entry.offset as usize)
            .cloned()
            .ok_or_else(|| {
                MetadataError::Corruption(format!("no device block at {}", entry.offset))
            })
    }
}

impl ChunkReader for MemoryFileReader {
    fn read_chunk(&self, chunk: &ChunkDescriptor) -> MetadataResult<Vec<TimeValuePair>> {
        self.chunk_reads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.chunks.get(&chunk.offset).cloned().ok_or_else(|| {
            MetadataError::Corruption(format!("no chunk at offset {}", chunk.offset))
        })
    }
}
