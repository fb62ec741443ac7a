//! Schema tree error types
//!
//! Defines all errors that can occur while declaring, resolving or deleting
//! paths in the schema namespace.

use thiserror::Error;

/// Errors that can occur in the schema tree
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Tree invariant violation (measurement under measurement, etc.)
    #[error("Structural error: {0}")]
    Structural(String),

    /// No storage group governs the path
    #[error("No storage group for path: {0}")]
    NoStorageGroup(String),

    /// Requested path does not exist
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Duplicate or incompatible declaration
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Path is syntactically invalid or not under the root
    #[error("Illegal path: {0}")]
    IllegalPath(String),

    /// I/O operation failed while persisting or loading a snapshot
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::Serialization(err.to_string())
    }
}

/// Result type alias for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchemaError::NotFound("root.a.d0".to_string());
        assert_eq!(err.to_string(), "Path not found: root.a.d0");

        let err = SchemaError::NoStorageGroup("root.x.s0".to_string());
        assert_eq!(err.to_string(), "No storage group for path: root.x.s0");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SchemaError = io_err.into();
        assert!(matches!(err, SchemaError::Io(_)));
    }
}
