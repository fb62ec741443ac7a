//! Query error types
//!
//! Defines all error conditions that can occur while parsing expressions,
//! building execution trees and pulling timestamps from them.

use crate::metadata::MetadataError;
use crate::schema::SchemaError;
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Path validation against the schema namespace failed
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Metadata or chunk read failed while iterating
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Metadata or chunk read failed while building a leaf reader
    #[error("Failed to resolve {path}: {source}")]
    Resolution {
        path: String,
        #[source]
        source: MetadataError,
    },

    /// Expression kind that cannot become an execution node
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// Expression parsing failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// `next` called on a node without a pending timestamp
    #[error("Execution node exhausted")]
    Exhausted,
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
