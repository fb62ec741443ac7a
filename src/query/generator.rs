//! Timestamp generator of one query
//!
//! Owns the execution tree built for an expression and pulls matching
//! timestamps from it. Values of the series that produced the current
//! timestamp can be read back through `value`.

use crate::query::constructor::NodeConstructor;
use crate::query::error::QueryResult;
use crate::query::expression::Expression;
use crate::query::node::ExecutionNode;
use crate::query::source::{QueryContext, QueryDataSourceProvider};
use crate::schema::{SeriesPath, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct TimeGenerator {
    context: QueryContext,
    root: ExecutionNode,
    current: Option<i64>,
    failed: bool,
}

impl TimeGenerator {
    /// Build the execution tree for `expression`
    ///
    /// With `prefetch`, chunk metadata of every series in the expression is
    /// loaded in one pass before the leaves are built.
    pub fn new(
        provider: Arc<dyn QueryDataSourceProvider>,
        expression: &Expression,
        context: QueryContext,
        prefetch: bool,
    ) -> QueryResult<Self> {
        if prefetch {
            let paths = expression.series_paths();
            debug!("Query {}: prefetching {} series", context.id, paths.len());
            provider.prefetch(&paths)?;
        }

        let root = NodeConstructor::new(provider).construct(expression, &context)?;
        debug!("Query {}: built execution tree for {}", context.id, expression);

        Ok(Self {
            context,
            root,
            current: None,
            failed: false,
        })
    }

    pub fn context(&self) -> &QueryContext {
        &self.context
    }

    pub fn has_next(&mut self) -> QueryResult<bool> {
        self.root.has_next()
    }

    /// Advance to the next matching timestamp
    pub fn next_timestamp(&mut self) -> QueryResult<i64> {
        let timestamp = self.root.next()?;
        self.current = Some(timestamp);
        Ok(timestamp)
    }

    /// Timestamp returned by the last `next_timestamp`
    pub fn current(&self) -> Option<i64> {
        self.current
    }

    /// Value of `path` at the current timestamp, if that series produced it
    pub fn value(&self, path: &SeriesPath) -> Option<&Value> {
        self.current
            .and_then(|timestamp| self.root.value_at(path, timestamp))
    }
}

impl Iterator for TimeGenerator {
    type Item = QueryResult<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = match self.has_next() {
            Ok(true) => self.next_timestamp(),
            Ok(false) => return None,
            Err(err) => Err(err),
        };
        self.failed = result.is_err();
        Some(result)
    }
}
