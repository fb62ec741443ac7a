//! # SeriesDB
//!
//! Read path of a time-series storage engine: from a boolean filter over
//! series paths to the ordered timestamps and values that satisfy it.
//!
//! ## Features
//!
//! - **Schema namespace**: Storage groups, devices and measurements in one tree
//! - **Chunk metadata**: Cached, partition-aware resolution of series to chunks
//! - **Merged reads**: Out-of-order corrections override in-order data
//! - **Boolean queries**: AND / OR execution trees over per-series filters
//!
//! ## Modules
//!
//! - [`schema`]: `SchemaTree` and series paths
//! - [`metadata`]: `ChunkMetadataResolver` and the series file format
//! - [`query`]: Expression parser, readers and execution nodes
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use seriesdb::metadata::{ChunkMetadataResolver, SeriesFileReader};
//! use seriesdb::query::{
//!     parse_expression, DataSource, FileSource, QueryContext, SourceRegistry, TimeGenerator,
//! };
//! use seriesdb::schema::{Compression, DataType, Encoding, MeasurementSchema, SchemaTree};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Declare the namespace
//!     let schema = Arc::new(SchemaTree::default());
//!     schema.set_storage_group("root.vehicle")?;
//!     schema.add_measurement(
//!         "root.vehicle.d0.s0",
//!         MeasurementSchema::new(DataType::Int64, Encoding::Plain, Compression::Lz4),
//!     )?;
//!
//!     // Register a series file
//!     let file = Arc::new(SeriesFileReader::open("data/vehicle.srs")?);
//!     let resolver = Arc::new(ChunkMetadataResolver::new(file.clone(), 100_000)?);
//!     let registry = Arc::new(SourceRegistry::new(schema));
//!     registry.register_sequence(
//!         "root.vehicle",
//!         DataSource::File(FileSource::new("vehicle.srs", resolver, file)),
//!     )?;
//!
//!     // Query
//!     let expression = parse_expression("root.vehicle.d0.s0 > 10")?;
//!     let generator = TimeGenerator::new(registry, &expression, QueryContext::new(), true)?;
//!     for timestamp in generator {
//!         println!("{}", timestamp?);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metadata;
pub mod query;
pub mod schema;

// Re-export top-level types for convenience
pub use schema::{
    DataType, MeasurementSchema, SchemaError, SchemaResult, SchemaTree, SeriesPath, TimeValuePair,
    Value,
};

pub use metadata::{
    ChunkDescriptor, ChunkMetadataResolver, MetadataError, MetadataResult, SeriesFileReader,
    SeriesFileWriter,
};

pub use query::{
    parse_expression, ExecutionNode, Expression, Filter, NodeConstructor, QueryContext,
    QueryError, QueryResult, SourceRegistry, TimeGenerator,
};

pub use config::{Config, ConfigError, LoggingConfig};
