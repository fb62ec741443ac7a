//! SeriesDB Query Read Path
//!
//! Turns a boolean filter expression into a stream of matching timestamps:
//!
//! - **expression**: Expression and filter model
//! - **parser**: Parse expression strings
//! - **source**: Sequence and unsequence data sources per storage group
//! - **reader**: Sequence, priority-merge and merged series readers
//! - **node**: AND / OR / leaf execution nodes
//! - **constructor**: Build execution trees from expressions
//! - **generator**: Pull timestamps and values for one query
//!
//! # Expression Language
//!
//! ```text
//! root.sg.d1.s1 > 10 AND (root.sg.d2.s1 <= 3.5 OR root.sg.d1.s2 = 'on')
//! root.sg.d1.s1[time >= 100 AND time < 200]
//! NOT root.sg.d1.s1 = 0
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let expression = parse_expression("root.sg.d1.s1 > 10 OR root.sg.d1.s2")?;
//! let mut generator = TimeGenerator::new(registry, &expression, QueryContext::new(), true)?;
//!
//! while generator.has_next()? {
//!     let timestamp = generator.next_timestamp()?;
//!     println!("{} {:?}", timestamp, generator.value(&path));
//! }
//! ```

mod constructor;
mod error;
mod expression;
mod generator;
mod node;
mod parser;
mod reader;
mod source;

pub use constructor::NodeConstructor;
pub use error::{QueryError, QueryResult};
pub use expression::{Expression, Filter, Operator};
pub use generator::TimeGenerator;
pub use node::{AndNode, ExecutionNode, LeafNode, OrNode};
pub use parser::parse_expression;
pub use reader::{
    AllDataReader, Filtered, PointBatch, PointReader, PriorityMergeReader, SequenceReader,
    SeriesReader,
};
pub use source::{
    DataSource, FileSource, MemorySource, QueryContext, QueryDataSource, QueryDataSourceProvider,
    SourceRegistry,
};
