//! SeriesDB Schema Namespace
//!
//! Hierarchical namespace of storage groups and measurements:
//!
//! - **path**: Dotted series paths and wildcard patterns
//! - **types**: Data types, encodings, measurement schemas and values
//! - **tree**: The `SchemaTree` itself
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust
//! use seriesdb::schema::{Compression, DataType, Encoding, MeasurementSchema, SchemaTree};
//!
//! let tree = SchemaTree::default();
//! tree.set_storage_group("root.vehicle").unwrap();
//! tree.add_measurement(
//!     "root.vehicle.d0.s0",
//!     MeasurementSchema::new(DataType::Int32, Encoding::Rle, Compression::Snappy),
//! ).unwrap();
//!
//! assert_eq!(tree.storage_group_of("root.vehicle.d0.s0").unwrap(), "root.vehicle");
//! assert_eq!(tree.expand_wildcard("root.vehicle.*.s0").unwrap().len(), 1);
//! ```

pub mod error;
pub mod path;
pub mod tree;
pub mod types;

pub use error::{SchemaError, SchemaResult};
pub use path::{SeriesPath, PATH_SEPARATOR, WILDCARD};
pub use tree::{SchemaTree, DEFAULT_ROOT};
pub use types::{
    Compression, DataType, Encoding, MeasurementSchema, NodeKind, TimeValuePair, Value,
};
