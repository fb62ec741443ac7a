//! Partition window over file bytes
//!
//! Lets several readers split one file by byte range. A chunk group belongs to
//! the window `(start, end]` iff its integer midpoint falls inside it, so
//! adjacent windows never both claim the same group.

use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::types::ChunkGroupMetadata;
use std::collections::HashMap;

/// Parameter key for the window start offset
pub const PARTITION_START_OFFSET: &str = "partition_start_offset";

/// Parameter key for the window end offset
pub const PARTITION_END_OFFSET: &str = "partition_end_offset";

/// Byte range `(start, end]` of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionWindow {
    pub start: u64,
    pub end: u64,
}

impl PartitionWindow {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Build an optional window from two optional bounds
    ///
    /// Both bounds or neither; exactly one is a configuration error.
    pub fn from_bounds(start: Option<u64>, end: Option<u64>) -> MetadataResult<Option<Self>> {
        match (start, end) {
            (Some(start), Some(end)) => Ok(Some(Self::new(start, end))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(MetadataError::Configuration(format!(
                "{} given without {}",
                PARTITION_START_OFFSET, PARTITION_END_OFFSET
            ))),
            (None, Some(_)) => Err(MetadataError::Configuration(format!(
                "{} given without {}",
                PARTITION_END_OFFSET, PARTITION_START_OFFSET
            ))),
        }
    }

    /// Build a window from a parameter map; both keys are mandatory
    pub fn from_params(params: &HashMap<String, u64>) -> MetadataResult<Self> {
        match (
            params.get(PARTITION_START_OFFSET),
            params.get(PARTITION_END_OFFSET),
        ) {
            (Some(&start), Some(&end)) => Ok(Self::new(start, end)),
            _ => Err(MetadataError::Configuration(format!(
                "parameters must contain both {} and {}",
                PARTITION_START_OFFSET, PARTITION_END_OFFSET
            ))),
        }
    }

    /// True iff the group's midpoint lies in `(start, end]`
    pub fn contains(&self, group: &ChunkGroupMetadata) -> bool {
        let middle = group.start_offset / 2 + group.end_offset / 2
            + (group.start_offset % 2 + group.end_offset % 2) / 2;
        self.start < middle && middle <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(start_offset: u64, end_offset: u64) -> ChunkGroupMetadata {
        ChunkGroupMetadata {
            device_id: "root.sg.d1".to_string(),
            start_offset,
            end_offset,
            version: 0,
            chunks: Vec::new(),
        }
    }

    #[test]
    fn test_midpoint_membership() {
        let window = PartitionWindow::new(100, 200);
        // midpoint 150
        assert!(window.contains(&group(100, 200)));
        // midpoint 100: start is exclusive
        assert!(!window.contains(&group(50, 150)));
        // midpoint 200: end is inclusive
        assert!(window.contains(&group(150, 250)));
        // midpoint 201
        assert!(!window.contains(&group(151, 251)));
        // (7 + 8) / 2 = 7 with integer division
        assert!(!PartitionWindow::new(7, 10).contains(&group(7, 8)));
    }

    #[test]
    fn test_adjacent_windows_partition_groups() {
        let left = PartitionWindow::new(0, 500);
        let right = PartitionWindow::new(500, 1000);
        for start in (0..900).step_by(37) {
            let g = group(start, start + 100);
            assert!(left.contains(&g) ^ right.contains(&g), "group at {}", start);
        }
    }

    #[test]
    fn test_midpoint_does_not_overflow() {
        let window = PartitionWindow::new(u64::MAX - 10, u64::MAX);
        assert!(window.contains(&group(u64::MAX - 4, u64::MAX)));
    }

    #[test]
    fn test_from_bounds() {
        assert_eq!(PartitionWindow::from_bounds(None, None).unwrap(), None);
        assert_eq!(
            PartitionWindow::from_bounds(Some(1), Some(2)).unwrap(),
            Some(PartitionWindow::new(1, 2))
        );
        assert!(matches!(
            PartitionWindow::from_bounds(Some(1), None).unwrap_err(),
            MetadataError::Configuration(_)
        ));
        assert!(matches!(
            PartitionWindow::from_bounds(None, Some(2)).unwrap_err(),
            MetadataError::Configuration(_)
        ));
    }

    #[test]
    fn test_from_params() {
        let mut params = HashMap::new();
        params.insert(PARTITION_START_OFFSET.to_string(), 10);
        assert!(matches!(
            PartitionWindow::from_params(&params).unwrap_err(),
            MetadataError::Configuration(_)
        ));

        params.insert(PARTITION_END_OFFSET.to_string(), 90);
        assert_eq!(
            PartitionWindow::from_params(&params).unwrap(),
            PartitionWindow::new(10, 90)
        );
    }
}
