//! Series file format
//!
//! A self-describing single file holding chunk groups of many devices.
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (6 bytes)                        │
//! │   magic: [u8; 4] = "SRSF"               │
//! │   version: u16                          │
//! ├─────────────────────────────────────────┤
//! │ CHUNK GROUPS (variable)                 │
//! │   For each chunk:                       │
//! │     chunk_size: u32                     │
//! │     lz4(bincode(points)): [u8; size]    │
//! │     chunk_checksum: u32                 │
//! ├─────────────────────────────────────────┤
//! │ DEVICE BLOCKS (variable)                │
//! │   bincode(DeviceMetadata) per device    │
//! ├─────────────────────────────────────────┤
//! │ FILE METADATA                           │
//! │   bincode(FileMetadata)                 │
//! ├─────────────────────────────────────────┤
//! │ FOOTER (12 bytes)                       │
//! │   metadata_size: u32                    │
//! │   metadata_checksum: u32                │
//! │   magic: [u8; 4] = "SRSF"               │
//! └─────────────────────────────────────────┘
//! ```

use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::reader::{ChunkReader, FileMetadataReader};
use crate::metadata::types::{
    ChunkDescriptor, ChunkGroupMetadata, DeviceIndexEntry, DeviceMetadata, FileMetadata,
};
use crate::schema::{Compression, Encoding, MeasurementSchema, TimeValuePair};
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for series file identification
const FILE_MAGIC: [u8; 4] = *b"SRSF";

/// Current file format version
const FILE_VERSION: u16 = 1;

/// Header size in bytes
const HEADER_SIZE: u64 = 6;

/// Footer size in bytes
const FOOTER_SIZE: u64 = 12;

/// Chunk framing overhead: size prefix + checksum
const CHUNK_OVERHEAD: u64 = 8;

/// Encode a chunk's points: bincode + LZ4
fn encode_chunk(points: &[TimeValuePair]) -> MetadataResult<Vec<u8>> {
    let serialized = bincode::serialize(points)?;
    Ok(lz4_flex::compress_prepend_size(&serialized))
}

/// Decode a chunk's points
fn decode_chunk(data: &[u8]) -> MetadataResult<Vec<TimeValuePair>> {
    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| MetadataError::Compression(format!("LZ4 decompression failed: {}", e)))?;
    Ok(bincode::deserialize(&decompressed)?)
}

/// Writes a series file chunk group by chunk group
pub struct SeriesFileWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    position: u64,
    metadata: FileMetadata,
    devices: BTreeMap<String, DeviceMetadata>,
    current: Option<ChunkGroupMetadata>,
}

impl SeriesFileWriter {
    /// Create a new series file, truncating any existing one
    pub fn create(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&FILE_MAGIC)?;
        writer.write_all(&FILE_VERSION.to_le_bytes())?;

        Ok(Self {
            path,
            writer,
            position: HEADER_SIZE,
            metadata: FileMetadata {
                created_by: Some(format!("seriesdb {}", env!("CARGO_PKG_VERSION"))),
                ..Default::default()
            },
            devices: BTreeMap::new(),
            current: None,
        })
    }

    /// Register a measurement in the file's schema registry
    pub fn register_measurement(&mut self, measurement_id: &str, schema: MeasurementSchema) {
        self.metadata
            .measurements
            .insert(measurement_id.to_string(), schema);
    }

    /// Open a chunk group for `device_id`
    pub fn start_chunk_group(&mut self, device_id: &str, version: u64) -> MetadataResult<()> {
        if let Some(open) = &self.current {
            return Err(MetadataError::Configuration(format!(
                "chunk group of {} is still open",
                open.device_id
            )));
        }

        self.current = Some(ChunkGroupMetadata {
            device_id: device_id.to_string(),
            start_offset: self.position,
            end_offset: self.position,
            version,
            chunks: Vec::new(),
        });
        Ok(())
    }

    /// Write one chunk of `measurement_id` into the open chunk group
    ///
    /// Points are sorted by timestamp before encoding. An unregistered
    /// measurement is registered with the data type of its first point.
    pub fn write_chunk(
        &mut self,
        measurement_id: &str,
        points: &[TimeValuePair],
    ) -> MetadataResult<ChunkDescriptor> {
        let Some(first) = points.first() else {
            return Err(MetadataError::Configuration(format!(
                "empty chunk for {}",
                measurement_id
            )));
        };
        let data_type = match self.metadata.measurements.get(measurement_id) {
            Some(schema) => schema.data_type,
            None => {
                let data_type = first.value.data_type();
                self.register_measurement(
                    measurement_id,
                    MeasurementSchema::new(data_type, Encoding::Plain, Compression::Lz4),
                );
                data_type
            }
        };

        let group = self.current.as_mut().ok_or_else(|| {
            MetadataError::Configuration(format!("no open chunk group for {}", measurement_id))
        })?;

        let mut sorted = points.to_vec();
        sorted.sort_by_key(|p| p.timestamp);

        let data = encode_chunk(&sorted)?;
        let checksum = crc32fast::hash(&data);
        self.writer.write_all(&(data.len() as u32).to_le_bytes())?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&checksum.to_le_bytes())?;

        let descriptor = ChunkDescriptor {
            device_id: group.device_id.clone(),
            measurement_id: measurement_id.to_string(),
            data_type,
            offset: self.position,
            size: data.len() as u64 + CHUNK_OVERHEAD,
            num_points: sorted.len() as u64,
            start_time: sorted[0].timestamp,
            end_time: sorted[sorted.len() - 1].timestamp,
            version: group.version,
        };

        self.position += descriptor.size;
        group.end_offset = self.position;
        group.chunks.push(descriptor.clone());
        Ok(descriptor)
    }

    /// Close the open chunk group
    pub fn end_chunk_group(&mut self) -> MetadataResult<ChunkGroupMetadata> {
        let group = self
            .current
            .take()
            .ok_or_else(|| MetadataError::Configuration("no open chunk group".to_string()))?;

        self.devices
            .entry(group.device_id.clone())
            .or_default()
            .push_group(group.clone());
        Ok(group)
    }

    /// Write device blocks, file metadata and footer
    pub fn finish(mut self) -> MetadataResult<FileMetadata> {
        if self.current.is_some() {
            self.end_chunk_group()?;
        }

        for (device_id, device) in &self.devices {
            let block = bincode::serialize(device)?;
            self.writer.write_all(&block)?;
            self.metadata.devices.insert(
                device_id.clone(),
                DeviceIndexEntry {
                    offset: self.position,
                    len: block.len() as u32,
                    start_time: device.start_time,
                    end_time: device.end_time,
                },
            );
            self.position += block.len() as u64;
        }

        let metadata = bincode::serialize(&self.metadata)?;
        let checksum = crc32fast::hash(&metadata);
        self.writer.write_all(&metadata)?;
        self.writer.write_all(&(metadata.len() as u32).to_le_bytes())?;
        self.writer.write_all(&checksum.to_le_bytes())?;
        self.writer.write_all(&FILE_MAGIC)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        tracing::info!(
            "Wrote series file {:?}: {} devices, {} bytes",
            self.path,
            self.metadata.devices.len(),
            self.position + metadata.len() as u64 + FOOTER_SIZE
        );
        Ok(self.metadata)
    }
}

/// Memory-mapped reader of a series file
pub struct SeriesFileReader {
    path: PathBuf,
    mmap: Mmap,
}

impl SeriesFileReader {
    /// Open and validate a series file
    pub fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE + FOOTER_SIZE {
            return Err(MetadataError::Corruption(format!(
                "{:?} is too short to be a series file ({} bytes)",
                path, len
            )));
        }

        // SAFETY: the file is opened read-only and series files are immutable once finished
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap[0..4] != FILE_MAGIC {
            return Err(MetadataError::Corruption(format!(
                "Invalid magic: {:?}",
                &mmap[0..4]
            )));
        }
        let version = u16::from_le_bytes([mmap[4], mmap[5]]);
        if version > FILE_VERSION {
            return Err(MetadataError::Corruption(format!(
                "Unsupported version: {}",
                version
            )));
        }

        tracing::info!("Opened series file {:?} ({} bytes)", path, len);
        Ok(Self { path, mmap })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    fn slice(&self, offset: u64, len: u64) -> MetadataResult<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                MetadataError::Corruption(format!(
                    "range {}+{} outside of file ({} bytes)",
                    offset,
                    len,
                    self.len()
                ))
            })?;
        Ok(&self.mmap[offset as usize..end as usize])
    }

    fn read_u32(&self, offset: u64) -> MetadataResult<u32> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

impl FileMetadataReader for SeriesFileReader {
    fn read_file_metadata(&self) -> MetadataResult<FileMetadata> {
        let footer = self.len() - FOOTER_SIZE;
        if self.slice(footer + 8, 4)? != FILE_MAGIC {
            return Err(MetadataError::Corruption("Invalid footer magic".into()));
        }

        let metadata_len = self.read_u32(footer)? as u64;
        let stored_checksum = self.read_u32(footer + 4)?;
        let start = footer.checked_sub(metadata_len).ok_or_else(|| {
            MetadataError::Corruption(format!("metadata size {} exceeds file", metadata_len))
        })?;

        let data = self.slice(start, metadata_len)?;
        if crc32fast::hash(data) != stored_checksum {
            return Err(MetadataError::Corruption("File metadata checksum mismatch".into()));
        }

        Ok(bincode::deserialize(data)?)
    }

    fn read_device_metadata(&self, entry: &DeviceIndexEntry) -> MetadataResult<DeviceMetadata> {
        let data = self.slice(entry.offset, entry.len as u64)?;
        Ok(bincode::deserialize(data)?)
    }
}

impl ChunkReader for SeriesFileReader {
    fn read_chunk(&self, chunk: &ChunkDescriptor) -> MetadataResult<Vec<TimeValuePair>> {
        let size = self.read_u32(chunk.offset)? as u64;
        if size + CHUNK_OVERHEAD != chunk.size {
            return Err(MetadataError::Corruption(format!(
                "Chunk at {} has size {}, descriptor says {}",
                chunk.offset,
                size + CHUNK_OVERHEAD,
                chunk.size
            )));
        }

        let data = self.slice(chunk.offset + 4, size)?;
        let stored_checksum = self.read_u32(chunk.offset + 4 + size)?;
        if crc32fast::hash(data) != stored_checksum {
            return Err(MetadataError::Corruption(format!(
                "Chunk at {} checksum mismatch",
                chunk.offset
            )));
        }

        decode_chunk(data)
    }
}

impl std::fmt::Debug for SeriesFileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesFileReader")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::resolver::ChunkMetadataResolver;
    use crate::schema::{DataType, SeriesPath, Value};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn points(range: std::ops::Range<i64>) -> Vec<TimeValuePair> {
        range.map(|t| TimeValuePair::new(t, Value::Double(t as f64 * 0.5))).collect()
    }

    fn write_sample(path: &Path) -> FileMetadata {
        let mut writer = SeriesFileWriter::create(path).unwrap();
        writer.register_measurement(
            "s1",
            MeasurementSchema::new(DataType::Double, Encoding::Gorilla, Compression::Lz4),
        );

        writer.start_chunk_group("root.sg.d1", 1).unwrap();
        writer.write_chunk("s1", &points(0..100)).unwrap();
        writer.write_chunk("s2", &[TimeValuePair::new(5, Value::Int32(7))]).unwrap();
        writer.end_chunk_group().unwrap();

        writer.start_chunk_group("root.sg.d2", 2).unwrap();
        writer.write_chunk("s1", &points(50..60)).unwrap();
        writer.end_chunk_group().unwrap();

        writer.start_chunk_group("root.sg.d1", 3).unwrap();
        writer.write_chunk("s1", &points(100..150)).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("sample.srs");
        let written = write_sample(&path);

        let reader = SeriesFileReader::open(&path).unwrap();
        let metadata = reader.read_file_metadata().unwrap();
        assert_eq!(metadata, written);
        assert_eq!(metadata.devices.len(), 2);
        assert_eq!(metadata.measurements["s2"].data_type, DataType::Int32);

        let d1 = reader.read_device_metadata(&metadata.devices["root.sg.d1"]).unwrap();
        assert_eq!(d1.chunk_groups.len(), 2);
        assert_eq!(d1.start_time, 0);
        assert_eq!(d1.end_time, 149);

        let chunk = &d1.chunk_groups[1].chunks[0];
        let decoded = reader.read_chunk(chunk).unwrap();
        assert_eq!(decoded, points(100..150));
    }

    #[test]
    fn test_resolver_over_series_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.srs");
        write_sample(&path);

        let reader = Arc::new(SeriesFileReader::open(&path).unwrap());
        let resolver = ChunkMetadataResolver::new(reader.clone(), 8).unwrap();
        let chunks = resolver
            .chunk_descriptors(&SeriesPath::parse("root.sg.d1.s1").unwrap())
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].version, 1);
        assert_eq!(chunks[1].version, 3);
        let total: usize = chunks
            .iter()
            .map(|c| reader.read_chunk(c).unwrap().len())
            .sum();
        assert_eq!(total, 150);
    }

    #[test]
    fn test_unsorted_points_are_sorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unsorted.srs");

        let mut writer = SeriesFileWriter::create(&path).unwrap();
        writer.start_chunk_group("root.sg.d1", 0).unwrap();
        let descriptor = writer
            .write_chunk(
                "s1",
                &[
                    TimeValuePair::new(30, Value::Int64(3)),
                    TimeValuePair::new(10, Value::Int64(1)),
                    TimeValuePair::new(20, Value::Int64(2)),
                ],
            )
            .unwrap();
        writer.finish().unwrap();

        assert_eq!(descriptor.start_time, 10);
        assert_eq!(descriptor.end_time, 30);

        let reader = SeriesFileReader::open(&path).unwrap();
        let decoded = reader.read_chunk(&descriptor).unwrap();
        assert_eq!(
            decoded.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
            vec![10, 20, 30]
        );
    }

    #[test]
    fn test_writer_misuse() {
        let dir = tempdir().unwrap();
        let mut writer = SeriesFileWriter::create(dir.path().join("x.srs")).unwrap();

        assert!(writer.write_chunk("s1", &points(0..1)).is_err());
        assert!(writer.end_chunk_group().is_err());

        writer.start_chunk_group("root.sg.d1", 0).unwrap();
        assert!(writer.start_chunk_group("root.sg.d2", 0).is_err());
        assert!(writer.write_chunk("s1", &[]).is_err());
    }

    #[test]
    fn test_corrupted_chunk_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.srs");
        write_sample(&path);

        let chunk = {
            let reader = SeriesFileReader::open(&path).unwrap();
            let metadata = reader.read_file_metadata().unwrap();
            let d2 = reader.read_device_metadata(&metadata.devices["root.sg.d2"]).unwrap();
            d2.chunk_groups[0].chunks[0].clone()
        };

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[chunk.offset as usize + 6] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let reader = SeriesFileReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_chunk(&chunk).unwrap_err(),
            MetadataError::Corruption(_)
        ));
    }

    #[test]
    fn test_corrupted_metadata_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.srs");
        write_sample(&path);

        let mut bytes = std::fs::read(&path).unwrap();
        let at = bytes.len() - FOOTER_SIZE as usize - 3;
        bytes[at] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let reader = SeriesFileReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_file_metadata().unwrap_err(),
            MetadataError::Corruption(_)
        ));
    }

    #[test]
    fn test_not_a_series_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bogus.srs");

        std::fs::write(&path, b"tiny").unwrap();
        assert!(matches!(
            SeriesFileReader::open(&path).unwrap_err(),
            MetadataError::Corruption(_)
        ));

        std::fs::write(&path, b"NOPE\x01\x00 plus some padding bytes").unwrap();
        assert!(matches!(
            SeriesFileReader::open(&path).unwrap_err(),
            MetadataError::Corruption(_)
        ));
    }
}
