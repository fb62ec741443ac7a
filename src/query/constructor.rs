//! Execution tree construction
//!
//! Turns an `Expression` into an `ExecutionNode`, building one merged reader
//! per series leaf from the sources the provider returns at query start.

use crate::metadata::ChunkDescriptor;
use crate::query::error::{QueryError, QueryResult};
use crate::query::expression::{Expression, Filter};
use crate::query::node::{ExecutionNode, LeafNode};
use crate::query::reader::{
    AllDataReader, Filtered, PointBatch, PointReader, PriorityMergeReader, SequenceReader,
    SeriesReader,
};
use crate::query::source::{DataSource, QueryContext, QueryDataSourceProvider};
use crate::schema::SeriesPath;
use std::sync::Arc;
use tracing::debug;

/// Builds execution trees against a data source provider
#[derive(Clone)]
pub struct NodeConstructor {
    provider: Arc<dyn QueryDataSourceProvider>,
}

impl NodeConstructor {
    pub fn new(provider: Arc<dyn QueryDataSourceProvider>) -> Self {
        Self { provider }
    }

    /// Build the execution tree of `expression`
    pub fn construct(
        &self,
        expression: &Expression,
        context: &QueryContext,
    ) -> QueryResult<ExecutionNode> {
        match expression {
            Expression::Series { path, filter } => {
                let reader = self.build_leaf_reader(path, filter.as_ref(), context)?;
                Ok(ExecutionNode::Leaf(LeafNode::new(path.clone(), reader)))
            }
            Expression::And(left, right) => Ok(ExecutionNode::and(
                self.construct(left, context)?,
                self.construct(right, context)?,
            )),
            Expression::Or(left, right) => Ok(ExecutionNode::or(
                self.construct(left, context)?,
                self.construct(right, context)?,
            )),
            Expression::GlobalTime(_) => {
                Err(QueryError::UnsupportedExpression(expression.to_string()))
            }
        }
    }

    /// Build the merged reader of one series
    ///
    /// Chunks that hold no points or cannot satisfy the time part of `filter`
    /// are skipped. Metadata and chunk read failures are reported as
    /// `QueryError::Resolution`.
    pub fn build_leaf_reader(
        &self,
        path: &SeriesPath,
        filter: Option<&Filter>,
        context: &QueryContext,
    ) -> QueryResult<SeriesReader> {
        let data_source = self.provider.query_data_source(path, context)?;

        let mut sequence_batches = Vec::new();
        for source in &data_source.sequence {
            for (batch, _) in batches(source, path, filter)? {
                sequence_batches.push(batch);
            }
        }

        let mut unsequence_batches = Vec::new();
        for source in &data_source.unsequence {
            unsequence_batches.extend(batches(source, path, filter)?);
        }

        debug!(
            "Query {}: leaf {} over {} sequence and {} unsequence batches",
            context.id,
            path,
            sequence_batches.len(),
            unsequence_batches.len()
        );

        let mut sequence = SequenceReader::new(sequence_batches);
        let unsequence = PriorityMergeReader::new(unsequence_batches);
        let filter = filter.cloned();

        let has_sequence = sequence
            .has_next()
            .map_err(|err| into_resolution(path, err))?;
        if has_sequence {
            Ok(SeriesReader::Merged(Filtered::new(
                AllDataReader::new(sequence, unsequence),
                filter,
            )))
        } else {
            Ok(SeriesReader::Unsequence(Filtered::new(unsequence, filter)))
        }
    }
}

impl std::fmt::Debug for NodeConstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConstructor").finish_non_exhaustive()
    }
}

/// Readable batches of `path` in `source`, each with its version
fn batches(
    source: &DataSource,
    path: &SeriesPath,
    filter: Option<&Filter>,
) -> QueryResult<Vec<(PointBatch, u64)>> {
    let may_match = |start: i64, end: i64| filter.map_or(true, |f| f.may_match_time_range(start, end));

    match source {
        DataSource::File(file) => {
            let descriptors = file
                .resolver
                .chunk_descriptors(path)
                .map_err(|source| QueryError::Resolution {
                    path: path.to_string(),
                    source,
                })?;
            Ok(descriptors
                .iter()
                .filter(|d| d.num_points > 0 && may_match(d.start_time, d.end_time))
                .map(|d: &ChunkDescriptor| {
                    let batch = PointBatch::Chunk {
                        reader: file.chunks.clone(),
                        descriptor: d.clone(),
                    };
                    (batch, d.version)
                })
                .collect())
        }
        DataSource::Memory(memory) => {
            let points = memory.points.as_ref();
            let (Some(first), Some(last)) = (
                points.iter().map(|p| p.timestamp).min(),
                points.iter().map(|p| p.timestamp).max(),
            ) else {
                return Ok(Vec::new());
            };
            if !may_match(first, last) {
                return Ok(Vec::new());
            }
            Ok(vec![(PointBatch::loaded(points.clone()), memory.version)])
        }
    }
}

fn into_resolution(path: &SeriesPath, err: QueryError) -> QueryError {
    match err {
        QueryError::Metadata(source) => QueryError::Resolution {
            path: path.to_string(),
            source,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ChunkMetadataResolver, MemoryFileReader, MetadataError};
    use crate::query::expression::Operator;
    use crate::query::parser::parse_expression;
    use crate::query::source::{FileSource, MemorySource, SourceRegistry};
    use crate::schema::{
        Compression, DataType, Encoding, MeasurementSchema, SchemaError, SchemaTree,
        TimeValuePair, Value,
    };

    fn tv(t: i64, v: i64) -> TimeValuePair {
        TimeValuePair::new(t, Value::Int64(v))
    }

    fn path(p: &str) -> SeriesPath {
        SeriesPath::parse(p).unwrap()
    }

    fn schema() -> Arc<SchemaTree> {
        let tree = SchemaTree::default();
        tree.set_storage_group("root.sg").unwrap();
        let int64 = MeasurementSchema::new(DataType::Int64, Encoding::Plain, Compression::Lz4);
        for p in ["root.sg.d1.s1", "root.sg.d1.s2", "root.sg.d2.s1"] {
            tree.add_measurement(p, int64.clone()).unwrap();
        }
        Arc::new(tree)
    }

    fn file_source(name: &str, file: Arc<MemoryFileReader>) -> DataSource {
        let resolver = Arc::new(ChunkMetadataResolver::new(file.clone(), 64).unwrap());
        DataSource::File(FileSource::new(name, resolver, file))
    }

    fn drain(reader: &mut SeriesReader) -> Vec<(i64, Value)> {
        let mut out = Vec::new();
        while let Some(point) = reader.next_point().unwrap() {
            out.push((point.timestamp, point.value));
        }
        out
    }

    /// Sequence file holding d1.s1 = {1:10, 2:20} and d1.s2 = {1:1, 3:3}
    fn registry() -> (Arc<SourceRegistry>, Arc<MemoryFileReader>) {
        let mut file = MemoryFileReader::new();
        file.add_chunk_group(
            "root.sg.d1",
            1,
            vec![("s1", vec![tv(1, 10), tv(2, 20)]), ("s2", vec![tv(1, 1), tv(3, 3)])],
        );
        let file = Arc::new(file);

        let registry = Arc::new(SourceRegistry::new(schema()));
        registry
            .register_sequence("root.sg", file_source("seq-1", file.clone()))
            .unwrap();
        (registry, file)
    }

    #[test]
    fn test_unsequence_overrides_sequence() {
        let (registry, _) = registry();
        registry
            .register_unsequence(
                "root.sg",
                DataSource::Memory(MemorySource::new(
                    path("root.sg.d1.s1"),
                    1,
                    vec![tv(2, 99), tv(3, 30)],
                )),
            )
            .unwrap();

        let constructor = NodeConstructor::new(registry);
        let mut reader = constructor
            .build_leaf_reader(&path("root.sg.d1.s1"), None, &QueryContext::new())
            .unwrap();
        assert!(reader.is_merged());
        assert_eq!(
            drain(&mut reader),
            vec![(1, Value::Int64(10)), (2, Value::Int64(99)), (3, Value::Int64(30))]
        );
    }

    #[test]
    fn test_unsequence_only_reader() {
        let registry = Arc::new(SourceRegistry::new(schema()));
        let mut older = MemoryFileReader::new();
        older.add_chunk_group("root.sg.d2", 1, vec![("s1", vec![tv(5, 1), tv(6, 1)])]);
        let mut newer = MemoryFileReader::new();
        newer.add_chunk_group("root.sg.d2", 2, vec![("s1", vec![tv(5, 2)])]);
        registry
            .register_unsequence("root.sg", file_source("unseq-2", Arc::new(newer)))
            .unwrap();
        registry
            .register_unsequence("root.sg", file_source("unseq-1", Arc::new(older)))
            .unwrap();

        let constructor = NodeConstructor::new(registry);
        let mut reader = constructor
            .build_leaf_reader(&path("root.sg.d2.s1"), None, &QueryContext::new())
            .unwrap();
        assert!(!reader.is_merged());
        // Higher version wins regardless of registration order
        assert_eq!(drain(&mut reader), vec![(5, Value::Int64(2)), (6, Value::Int64(1))]);
    }

    #[test]
    fn test_time_filter_skips_chunks() {
        let mut file = MemoryFileReader::new();
        file.add_chunk_group("root.sg.d2", 1, vec![("s1", vec![tv(1, 1), tv(2, 2)])]);
        file.add_chunk_group("root.sg.d2", 2, vec![("s1", vec![tv(10, 10), tv(11, 11)])]);
        let file = Arc::new(file);
        let registry = Arc::new(SourceRegistry::new(schema()));
        registry
            .register_sequence("root.sg", file_source("seq", file.clone()))
            .unwrap();

        let filter = Filter::time(Operator::Gte, 10);
        let constructor = NodeConstructor::new(registry);
        let mut reader = constructor
            .build_leaf_reader(&path("root.sg.d2.s1"), Some(&filter), &QueryContext::new())
            .unwrap();
        assert_eq!(
            drain(&mut reader),
            vec![(10, Value::Int64(10)), (11, Value::Int64(11))]
        );
        assert_eq!(file.chunk_reads(), 1);
    }

    #[test]
    fn test_resolution_error_wraps_metadata_failure() {
        let (registry, file) = registry();
        file.fail_reads(true);

        let constructor = NodeConstructor::new(registry);
        let err = constructor
            .build_leaf_reader(&path("root.sg.d1.s1"), None, &QueryContext::new())
            .unwrap_err();
        match err {
            QueryError::Resolution { path, source } => {
                assert_eq!(path, "root.sg.d1.s1");
                assert!(matches!(source, MetadataError::Io(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_path_is_schema_error() {
        let (registry, _) = registry();
        let constructor = NodeConstructor::new(registry);
        let err = constructor
            .build_leaf_reader(&path("root.sg.d9.s1"), None, &QueryContext::new())
            .unwrap_err();
        assert!(matches!(err, QueryError::Schema(SchemaError::NotFound(_))));
    }

    #[test]
    fn test_construct_and_or() {
        let (registry, _) = registry();
        let constructor = NodeConstructor::new(registry);
        let ctx = QueryContext::new();

        let and = parse_expression("root.sg.d1.s1 AND root.sg.d1.s2").unwrap();
        let mut node = constructor.construct(&and, &ctx).unwrap();
        assert_eq!(node.next().unwrap(), 1);
        assert!(!node.has_next().unwrap());
        assert!(matches!(node.next(), Err(QueryError::Exhausted)));

        let or = parse_expression("root.sg.d1.s1 OR root.sg.d1.s2").unwrap();
        let mut node = constructor.construct(&or, &ctx).unwrap();
        let mut timestamps = Vec::new();
        while node.has_next().unwrap() {
            timestamps.push(node.next().unwrap());
        }
        assert_eq!(timestamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_construct_rejects_global_time() {
        let (registry, _) = registry();
        let constructor = NodeConstructor::new(registry);
        let expr = Expression::and(
            Expression::series(path("root.sg.d1.s1"), None),
            Expression::GlobalTime(Filter::time(Operator::Gt, 5)),
        );
        let err = constructor.construct(&expr, &QueryContext::new()).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedExpression(_)));
    }
}
