//! Point readers of one series
//!
//! ```text
//! sequence chunks ──► SequenceReader ─────────┐
//!                                             ├─► AllDataReader ──► Filtered ──► SeriesReader
//! unsequence chunks ─► PriorityMergeReader ───┘        (unsequence wins ties)
//! ```
//!
//! All readers yield points in strictly ascending timestamp order. Chunks are
//! decoded lazily, on the first access that needs them.

use crate::metadata::{ChunkDescriptor, ChunkReader};
use crate::query::error::QueryResult;
use crate::query::expression::Filter;
use crate::schema::TimeValuePair;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

/// Pull-based stream of time-ordered points
pub trait PointReader {
    /// Next point without consuming it
    fn peek(&mut self) -> QueryResult<Option<&TimeValuePair>>;

    /// Consume and return the next point
    fn next_point(&mut self) -> QueryResult<Option<TimeValuePair>>;

    fn has_next(&mut self) -> QueryResult<bool> {
        Ok(self.peek()?.is_some())
    }
}

/// A batch of points of one series, decoded on demand
pub enum PointBatch {
    /// A chunk still on disk
    Chunk {
        reader: Arc<dyn ChunkReader>,
        descriptor: ChunkDescriptor,
    },
    /// Points already in memory, sorted by timestamp
    Loaded(Vec<TimeValuePair>),
}

impl PointBatch {
    /// In-memory batch in write order; points are sorted here and a later
    /// write replaces an earlier one at the same timestamp
    pub fn loaded(mut points: Vec<TimeValuePair>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        keep_latest_writes(&mut points);
        Self::Loaded(points)
    }

    fn load(self) -> QueryResult<VecDeque<TimeValuePair>> {
        match self {
            Self::Chunk { reader, descriptor } => {
                let mut points = reader.read_chunk(&descriptor)?;
                keep_latest_writes(&mut points);
                Ok(points.into())
            }
            Self::Loaded(points) => Ok(points.into()),
        }
    }
}

/// Collapse runs of equal timestamps in a stably sorted batch to their last point
fn keep_latest_writes(points: &mut Vec<TimeValuePair>) {
    points.dedup_by(|later, kept| {
        if later.timestamp == kept.timestamp {
            std::mem::swap(later, kept);
            true
        } else {
            false
        }
    });
}

impl std::fmt::Debug for PointBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chunk { descriptor, .. } => f
                .debug_struct("Chunk")
                .field("offset", &descriptor.offset)
                .field("version", &descriptor.version)
                .finish(),
            Self::Loaded(points) => f.debug_tuple("Loaded").field(&points.len()).finish(),
        }
    }
}

// ==================== Sequence ====================

/// Reads sequential batches one after another
///
/// Sequential data is sorted and non-overlapping across batches; a point not
/// newer than the last emitted one is dropped.
#[derive(Debug, Default)]
pub struct SequenceReader {
    batches: VecDeque<PointBatch>,
    current: VecDeque<TimeValuePair>,
    last_timestamp: Option<i64>,
}

impl SequenceReader {
    pub fn new(batches: Vec<PointBatch>) -> Self {
        Self {
            batches: batches.into(),
            current: VecDeque::new(),
            last_timestamp: None,
        }
    }
}

impl PointReader for SequenceReader {
    fn peek(&mut self) -> QueryResult<Option<&TimeValuePair>> {
        loop {
            match self.current.front() {
                Some(point) if self.last_timestamp.map_or(true, |last| point.timestamp > last) => {
                    break;
                }
                Some(_) => {
                    self.current.pop_front();
                }
                None => match self.batches.pop_front() {
                    Some(batch) => self.current = batch.load()?,
                    None => break,
                },
            }
        }
        Ok(self.current.front())
    }

    fn next_point(&mut self) -> QueryResult<Option<TimeValuePair>> {
        self.peek()?;
        let point = self.current.pop_front();
        if let Some(p) = &point {
            self.last_timestamp = Some(p.timestamp);
        }
        Ok(point)
    }
}

// ==================== Unsequence ====================

/// Entry in the merge heap
struct HeapEntry {
    point: TimeValuePair,
    priority: (u64, usize),
    source: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Primary: timestamp (ascending)
        // Secondary: priority (descending, so the winner pops first)
        self.point
            .timestamp
            .cmp(&other.point.timestamp)
            .then_with(|| other.priority.cmp(&self.priority))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

struct MergeSource {
    batch: Option<PointBatch>,
    points: VecDeque<TimeValuePair>,
    priority: (u64, usize),
}

/// K-way merge of overlapping batches
///
/// Each batch has a priority `(version, arrival)`. When several batches hold
/// the same timestamp, only the highest-priority point is emitted.
pub struct PriorityMergeReader {
    sources: Vec<MergeSource>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    initialized: bool,
    pending: Option<TimeValuePair>,
}

impl PriorityMergeReader {
    /// Create a merge reader over `(batch, version)` pairs
    ///
    /// The arrival ordinal is the position in `batches`; later batches win
    /// over earlier ones of the same version.
    pub fn new(batches: Vec<(PointBatch, u64)>) -> Self {
        let sources = batches
            .into_iter()
            .enumerate()
            .map(|(arrival, (batch, version))| MergeSource {
                batch: Some(batch),
                points: VecDeque::new(),
                priority: (version, arrival),
            })
            .collect();

        Self {
            sources,
            heap: BinaryHeap::new(),
            initialized: false,
            pending: None,
        }
    }

    /// Number of merged batches
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn init(&mut self) -> QueryResult<()> {
        if self.initialized {
            return Ok(());
        }
        for idx in 0..self.sources.len() {
            if let Some(batch) = self.sources[idx].batch.take() {
                self.sources[idx].points = batch.load()?;
            }
            self.advance(idx);
        }
        self.initialized = true;
        Ok(())
    }

    /// Push the next point of `source` into the heap
    fn advance(&mut self, source: usize) {
        let entry = &mut self.sources[source];
        if let Some(point) = entry.points.pop_front() {
            self.heap.push(Reverse(HeapEntry {
                point,
                priority: entry.priority,
                source,
            }));
        }
    }

    fn fill(&mut self) -> QueryResult<()> {
        if self.pending.is_some() {
            return Ok(());
        }
        self.init()?;

        let Some(Reverse(winner)) = self.heap.pop() else {
            return Ok(());
        };
        self.advance(winner.source);

        // Drop lower-priority points at the same timestamp
        let timestamp = winner.point.timestamp;
        while self
            .heap
            .peek()
            .is_some_and(|Reverse(e)| e.point.timestamp == timestamp)
        {
            if let Some(Reverse(shadowed)) = self.heap.pop() {
                self.advance(shadowed.source);
            }
        }

        self.pending = Some(winner.point);
        Ok(())
    }
}

impl PointReader for PriorityMergeReader {
    fn peek(&mut self) -> QueryResult<Option<&TimeValuePair>> {
        self.fill()?;
        Ok(self.pending.as_ref())
    }

    fn next_point(&mut self) -> QueryResult<Option<TimeValuePair>> {
        self.fill()?;
        Ok(self.pending.take())
    }
}

impl std::fmt::Debug for PriorityMergeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityMergeReader")
            .field("sources", &self.sources.len())
            .field("initialized", &self.initialized)
            .finish()
    }
}

// ==================== Merged ====================

/// Merges sequential and unsequential data of one series
///
/// At equal timestamps the unsequential point replaces the sequential one.
#[derive(Debug)]
pub struct AllDataReader {
    sequence: SequenceReader,
    unsequence: PriorityMergeReader,
    pending: Option<TimeValuePair>,
}

impl AllDataReader {
    pub fn new(sequence: SequenceReader, unsequence: PriorityMergeReader) -> Self {
        Self {
            sequence,
            unsequence,
            pending: None,
        }
    }

    fn fill(&mut self) -> QueryResult<()> {
        if self.pending.is_some() {
            return Ok(());
        }

        let seq = self.sequence.peek()?.map(|p| p.timestamp);
        let unseq = self.unsequence.peek()?.map(|p| p.timestamp);

        self.pending = match (seq, unseq) {
            (None, None) => None,
            (Some(_), None) => self.sequence.next_point()?,
            (None, Some(_)) => self.unsequence.next_point()?,
            (Some(s), Some(u)) => match s.cmp(&u) {
                Ordering::Less => self.sequence.next_point()?,
                Ordering::Greater => self.unsequence.next_point()?,
                Ordering::Equal => {
                    self.sequence.next_point()?;
                    self.unsequence.next_point()?
                }
            },
        };
        Ok(())
    }
}

impl PointReader for AllDataReader {
    fn peek(&mut self) -> QueryResult<Option<&TimeValuePair>> {
        self.fill()?;
        Ok(self.pending.as_ref())
    }

    fn next_point(&mut self) -> QueryResult<Option<TimeValuePair>> {
        self.fill()?;
        Ok(self.pending.take())
    }
}

// ==================== Filtered ====================

/// Drops points of the inner reader that fail a filter
#[derive(Debug)]
pub struct Filtered<R> {
    inner: R,
    filter: Option<Filter>,
}

impl<R: PointReader> Filtered<R> {
    pub fn new(inner: R, filter: Option<Filter>) -> Self {
        Self { inner, filter }
    }
}

impl<R: PointReader> PointReader for Filtered<R> {
    fn peek(&mut self) -> QueryResult<Option<&TimeValuePair>> {
        loop {
            let keep = match self.inner.peek()? {
                None => break,
                Some(point) => self.filter.as_ref().map_or(true, |f| f.satisfy(point)),
            };
            if keep {
                break;
            }
            self.inner.next_point()?;
        }
        self.inner.peek()
    }

    fn next_point(&mut self) -> QueryResult<Option<TimeValuePair>> {
        self.peek()?;
        self.inner.next_point()
    }
}

/// Reader of one series leaf
#[derive(Debug)]
pub enum SeriesReader {
    /// No sequential data: unsequential batches only
    Unsequence(Filtered<PriorityMergeReader>),
    /// Sequential data merged with unsequential corrections
    Merged(Filtered<AllDataReader>),
}

impl SeriesReader {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

impl PointReader for SeriesReader {
    fn peek(&mut self) -> QueryResult<Option<&TimeValuePair>> {
        match self {
            Self::Unsequence(reader) => reader.peek(),
            Self::Merged(reader) => reader.peek(),
        }
    }

    fn next_point(&mut self) -> QueryResult<Option<TimeValuePair>> {
        match self {
            Self::Unsequence(reader) => reader.next_point(),
            Self::Merged(reader) => reader.next_point(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FileMetadataReader, MemoryFileReader};
    use crate::query::error::QueryError;
    use crate::query::expression::Operator;
    use crate::schema::Value;

    fn tv(t: i64, v: i64) -> TimeValuePair {
        TimeValuePair::new(t, Value::Int64(v))
    }

    fn drain<R: PointReader>(reader: &mut R) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        while let Some(point) = reader.next_point().unwrap() {
            let Value::Int64(v) = point.value else {
                panic!("unexpected value type");
            };
            out.push((point.timestamp, v));
        }
        out
    }

    #[test]
    fn test_sequence_reader_chains_batches() {
        let mut reader = SequenceReader::new(vec![
            PointBatch::loaded(vec![tv(2, 20), tv(1, 10)]),
            PointBatch::loaded(vec![]),
            PointBatch::loaded(vec![tv(3, 30)]),
        ]);
        assert!(reader.has_next().unwrap());
        assert_eq!(drain(&mut reader), vec![(1, 10), (2, 20), (3, 30)]);
        assert!(!reader.has_next().unwrap());
    }

    #[test]
    fn test_sequence_reader_drops_stale_points() {
        let mut reader = SequenceReader::new(vec![
            PointBatch::loaded(vec![tv(1, 10), tv(5, 50)]),
            PointBatch::loaded(vec![tv(5, 55), tv(6, 60)]),
        ]);
        assert_eq!(drain(&mut reader), vec![(1, 10), (5, 50), (6, 60)]);
    }

    #[test]
    fn test_priority_merge_highest_wins() {
        let mut reader = PriorityMergeReader::new(vec![
            (PointBatch::loaded(vec![tv(1, 1), tv(3, 3), tv(5, 5)]), 2),
            (PointBatch::loaded(vec![tv(3, 33), tv(4, 44)]), 1),
            (PointBatch::loaded(vec![tv(5, 55)]), 2),
        ]);
        // ts 3: version 2 beats version 1; ts 5: same version, later arrival wins
        assert_eq!(drain(&mut reader), vec![(1, 1), (3, 3), (4, 44), (5, 55)]);
    }

    #[test]
    fn test_latest_write_wins_within_batch() {
        let mut reader = PriorityMergeReader::new(vec![(
            PointBatch::loaded(vec![tv(5, 1), tv(3, 30), tv(5, 2)]),
            1,
        )]);
        assert_eq!(drain(&mut reader), vec![(3, 30), (5, 2)]);

        // Same within an on-disk chunk
        let mut file = MemoryFileReader::new();
        file.add_chunk_group("root.sg.d1", 1, vec![("s1", vec![tv(7, 1), tv(7, 2), tv(8, 3)])]);
        let file = Arc::new(file);
        let metadata = file.read_file_metadata().unwrap();
        let device = file.read_device_metadata(&metadata.devices["root.sg.d1"]).unwrap();
        let mut reader = PriorityMergeReader::new(vec![(
            PointBatch::Chunk {
                reader: file.clone(),
                descriptor: device.chunk_groups[0].chunks[0].clone(),
            },
            1,
        )]);
        assert_eq!(drain(&mut reader), vec![(7, 2), (8, 3)]);
    }

    #[test]
    fn test_priority_merge_empty() {
        let mut reader = PriorityMergeReader::new(Vec::new());
        assert!(!reader.has_next().unwrap());
        assert_eq!(reader.source_count(), 0);
    }

    #[test]
    fn test_all_data_reader_unsequence_wins() {
        let sequence = SequenceReader::new(vec![PointBatch::loaded(vec![tv(1, 10), tv(2, 20)])]);
        let unsequence =
            PriorityMergeReader::new(vec![(PointBatch::loaded(vec![tv(2, 99), tv(3, 30)]), 1)]);
        let mut reader = AllDataReader::new(sequence, unsequence);
        assert_eq!(drain(&mut reader), vec![(1, 10), (2, 99), (3, 30)]);
    }

    #[test]
    fn test_filter_applies_after_merge() {
        // The correction at ts 2 fails the filter, so ts 2 disappears entirely
        let sequence = SequenceReader::new(vec![PointBatch::loaded(vec![tv(1, 10), tv(2, 20)])]);
        let unsequence = PriorityMergeReader::new(vec![(PointBatch::loaded(vec![tv(2, 0)]), 1)]);
        let filter = Filter::value(Operator::Gt, Value::Int64(5));
        let mut reader = SeriesReader::Merged(Filtered::new(
            AllDataReader::new(sequence, unsequence),
            Some(filter),
        ));
        assert!(reader.is_merged());
        assert_eq!(drain(&mut reader), vec![(1, 10)]);
    }

    #[test]
    fn test_chunk_batches_load_lazily() {
        let mut file = MemoryFileReader::new();
        file.add_chunk_group("root.sg.d1", 1, vec![("s1", vec![tv(1, 1), tv(2, 2)])]);
        file.add_chunk_group("root.sg.d1", 2, vec![("s1", vec![tv(3, 3)])]);
        let file = Arc::new(file);

        let metadata = file.read_file_metadata().unwrap();
        let device = file.read_device_metadata(&metadata.devices["root.sg.d1"]).unwrap();
        let batches = device
            .chunk_groups
            .iter()
            .flat_map(|g| g.chunks.iter().cloned())
            .map(|descriptor| PointBatch::Chunk {
                reader: file.clone(),
                descriptor,
            })
            .collect();

        let mut reader = SequenceReader::new(batches);
        assert_eq!(file.chunk_reads(), 0);
        assert_eq!(reader.next_point().unwrap().map(|p| p.timestamp), Some(1));
        assert_eq!(file.chunk_reads(), 1);
        assert_eq!(drain(&mut reader), vec![(2, 2), (3, 3)]);
        assert_eq!(file.chunk_reads(), 2);
    }

    #[test]
    fn test_chunk_read_error_surfaces() {
        let mut file = MemoryFileReader::new();
        file.add_chunk_group("root.sg.d1", 1, vec![("s1", vec![tv(1, 1)])]);
        let file = Arc::new(file);
        let metadata = file.read_file_metadata().unwrap();
        let device = file.read_device_metadata(&metadata.devices["root.sg.d1"]).unwrap();
        let descriptor = device.chunk_groups[0].chunks[0].clone();

        file.fail_reads(true);
        let mut reader = SequenceReader::new(vec![PointBatch::Chunk {
            reader: file.clone(),
            descriptor,
        }]);
        assert!(matches!(reader.has_next().unwrap_err(), QueryError::Metadata(_)));
    }
}
