//! Execution nodes
//!
//! An execution tree mirrors the expression tree and yields matching
//! timestamps in strictly ascending order:
//!
//! - **Leaf**: timestamps of one series reader
//! - **And**: timestamps produced by both children
//! - **Or**: timestamps produced by either child, each once

use crate::query::error::{QueryError, QueryResult};
use crate::query::reader::{PointReader, SeriesReader};
use crate::schema::{SeriesPath, TimeValuePair, Value};
use std::cmp::Ordering;

/// Leaf over the merged reader of one series
#[derive(Debug)]
pub struct LeafNode {
    path: SeriesPath,
    reader: SeriesReader,
    current: Option<TimeValuePair>,
}

impl LeafNode {
    pub fn new(path: SeriesPath, reader: SeriesReader) -> Self {
        Self {
            path,
            reader,
            current: None,
        }
    }

    pub fn path(&self) -> &SeriesPath {
        &self.path
    }

    /// Value of the point behind the last emitted timestamp
    pub fn current_value(&self) -> Option<&Value> {
        self.current.as_ref().map(|p| &p.value)
    }

    fn has_next(&mut self) -> QueryResult<bool> {
        self.reader.has_next()
    }

    fn next(&mut self) -> QueryResult<i64> {
        let point = self.reader.next_point()?.ok_or(QueryError::Exhausted)?;
        let timestamp = point.timestamp;
        self.current = Some(point);
        Ok(timestamp)
    }
}

/// Intersection of two children
#[derive(Debug)]
pub struct AndNode {
    left: Box<ExecutionNode>,
    right: Box<ExecutionNode>,
    left_head: Option<i64>,
    right_head: Option<i64>,
    pending: Option<i64>,
}

impl AndNode {
    pub fn new(left: ExecutionNode, right: ExecutionNode) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            left_head: None,
            right_head: None,
            pending: None,
        }
    }

    fn fill(&mut self) -> QueryResult<()> {
        if self.pending.is_some() {
            return Ok(());
        }

        loop {
            let Some(left) = pull(&mut self.left, &mut self.left_head)? else {
                return Ok(());
            };
            let Some(right) = pull(&mut self.right, &mut self.right_head)? else {
                return Ok(());
            };

            match left.cmp(&right) {
                Ordering::Equal => {
                    self.left_head = None;
                    self.right_head = None;
                    self.pending = Some(left);
                    return Ok(());
                }
                Ordering::Less => self.left_head = None,
                Ordering::Greater => self.right_head = None,
            }
        }
    }
}

/// Ordered, de-duplicated union of two children
#[derive(Debug)]
pub struct OrNode {
    left: Box<ExecutionNode>,
    right: Box<ExecutionNode>,
    left_head: Option<i64>,
    right_head: Option<i64>,
    pending: Option<i64>,
}

impl OrNode {
    pub fn new(left: ExecutionNode, right: ExecutionNode) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            left_head: None,
            right_head: None,
            pending: None,
        }
    }

    fn fill(&mut self) -> QueryResult<()> {
        if self.pending.is_some() {
            return Ok(());
        }

        let left = pull(&mut self.left, &mut self.left_head)?;
        let right = pull(&mut self.right, &mut self.right_head)?;

        self.pending = match (left, right) {
            (None, None) => None,
            (Some(_), None) => self.left_head.take(),
            (None, Some(_)) => self.right_head.take(),
            (Some(l), Some(r)) => match l.cmp(&r) {
                Ordering::Less => self.left_head.take(),
                Ordering::Greater => self.right_head.take(),
                Ordering::Equal => {
                    self.left_head = None;
                    self.right_head.take()
                }
            },
        };
        Ok(())
    }
}

/// Next timestamp of `node`, buffered in `head` until consumed
fn pull(node: &mut ExecutionNode, head: &mut Option<i64>) -> QueryResult<Option<i64>> {
    if head.is_none() && node.has_next()? {
        *head = Some(node.next()?);
    }
    Ok(*head)
}

/// Node of an execution tree
#[derive(Debug)]
pub enum ExecutionNode {
    Leaf(LeafNode),
    And(AndNode),
    Or(OrNode),
}

impl ExecutionNode {
    pub fn and(left: ExecutionNode, right: ExecutionNode) -> Self {
        Self::And(AndNode::new(left, right))
    }

    pub fn or(left: ExecutionNode, right: ExecutionNode) -> Self {
        Self::Or(OrNode::new(left, right))
    }

    /// Whether another timestamp is available
    pub fn has_next(&mut self) -> QueryResult<bool> {
        match self {
            Self::Leaf(leaf) => leaf.has_next(),
            Self::And(node) => {
                node.fill()?;
                Ok(node.pending.is_some())
            }
            Self::Or(node) => {
                node.fill()?;
                Ok(node.pending.is_some())
            }
        }
    }

    /// Consume the next timestamp
    ///
    /// Fails with `QueryError::Exhausted` when `has_next` would be false.
    pub fn next(&mut self) -> QueryResult<i64> {
        match self {
            Self::Leaf(leaf) => leaf.next(),
            Self::And(node) => {
                node.fill()?;
                node.pending.take().ok_or(QueryError::Exhausted)
            }
            Self::Or(node) => {
                node.fill()?;
                node.pending.take().ok_or(QueryError::Exhausted)
            }
        }
    }

    /// Value of `path` at `timestamp`, if a leaf of `path` produced it
    pub fn value_at(&self, path: &SeriesPath, timestamp: i64) -> Option<&Value> {
        match self {
            Self::Leaf(leaf) => leaf
                .current
                .as_ref()
                .filter(|p| leaf.path == *path && p.timestamp == timestamp)
                .map(|p| &p.value),
            Self::And(AndNode { left, right, .. }) | Self::Or(OrNode { left, right, .. }) => left
                .value_at(path, timestamp)
                .or_else(|| right.value_at(path, timestamp)),
        }
    }

    /// Series paths of all leaves, left to right
    pub fn leaf_paths(&self) -> Vec<&SeriesPath> {
        match self {
            Self::Leaf(leaf) => vec![&leaf.path],
            Self::And(AndNode { left, right, .. }) | Self::Or(OrNode { left, right, .. }) => {
                let mut paths = left.leaf_paths();
                paths.extend(right.leaf_paths());
                paths
            }
        }
    }
}
