//! Chunk metadata error types
//!
//! Defines all errors that can occur while reading file metadata, resolving
//! chunk descriptors or decoding series files.

use thiserror::Error;

/// Errors that can occur in the metadata layer
#[derive(Error, Debug)]
pub enum MetadataError {
    /// Measurement is not declared in the file metadata
    #[error("No measurement: {0}")]
    NoMeasurement(String),

    /// Invalid resolver configuration (half-specified partition window, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<bincode::Error> for MetadataError {
    fn from(err: bincode::Error) -> Self {
        MetadataError::Serialization(err.to_string())
    }
}

/// Result type alias for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;
