//! Series paths
//!
//! A series path is a dot-separated sequence of segments such as
//! `root.sg1.d1.s1`. The last segment of a concrete path is the measurement,
//! everything before it is the device.

use crate::schema::error::{SchemaError, SchemaResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Separator between path segments
pub const PATH_SEPARATOR: char = '.';

/// Segment matching exactly one child at its depth
pub const WILDCARD: &str = "*";

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\*|[A-Za-z0-9_\-]+)$").expect("segment pattern is valid"))
}

/// A parsed, validated series path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesPath {
    segments: Vec<String>,
}

impl SeriesPath {
    /// Parse a dotted path, validating every segment
    pub fn parse(path: &str) -> SchemaResult<Self> {
        let path = path.trim();
        if path.is_empty() {
            return Err(SchemaError::IllegalPath("empty path".to_string()));
        }

        let segments: Vec<String> = path.split(PATH_SEPARATOR).map(str::to_string).collect();
        for segment in &segments {
            if !segment_pattern().is_match(segment) {
                return Err(SchemaError::IllegalPath(format!(
                    "invalid segment '{}' in {}",
                    segment, path
                )));
            }
        }

        Ok(Self { segments })
    }

    /// Build a path from a device path and a measurement name
    pub fn from_device(device: &str, measurement: &str) -> SchemaResult<Self> {
        Self::parse(&format!("{}{}{}", device, PATH_SEPARATOR, measurement))
    }

    /// All segments, root first
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false for a parsed path; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Device part: all segments but the last
    pub fn device(&self) -> String {
        self.segments[..self.segments.len().saturating_sub(1)].join(".")
    }

    /// Measurement part: the last segment
    pub fn measurement(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// True if any segment is a wildcard
    pub fn has_wildcard(&self) -> bool {
        self.segments.iter().any(|s| s == WILDCARD)
    }

    /// Dotted representation
    pub fn full_path(&self) -> String {
        self.segments.join(".")
    }

    /// True if `self` equals `other` or is one of its ancestors
    pub fn is_prefix_of(&self, other: &SeriesPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }
}

impl fmt::Display for SeriesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}

impl FromStr for SeriesPath {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SeriesPath {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SeriesPath> for String {
    fn from(path: SeriesPath) -> Self {
        path.full_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_and_measurement() {
        let path = SeriesPath::parse("root.sg1.d1.s1").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.device(), "root.sg1.d1");
        assert_eq!(path.measurement(), "s1");
        assert!(!path.has_wildcard());
        assert_eq!(path.to_string(), "root.sg1.d1.s1");
    }

    #[test]
    fn test_parse_rejects_bad_segments() {
        assert!(SeriesPath::parse("").is_err());
        assert!(SeriesPath::parse("root..s1").is_err());
        assert!(SeriesPath::parse("root.d1.").is_err());
        assert!(SeriesPath::parse("root.d 1.s1").is_err());
        assert!(SeriesPath::parse("root.d1.s*").is_err());
    }

    #[test]
    fn test_wildcard() {
        let path = SeriesPath::parse("root.a.*.s0").unwrap();
        assert!(path.has_wildcard());
    }

    #[test]
    fn test_from_device() {
        let path = SeriesPath::from_device("root.vehicle.d0", "s2").unwrap();
        assert_eq!(path.full_path(), "root.vehicle.d0.s2");
    }

    #[test]
    fn test_prefix() {
        let sg = SeriesPath::parse("root.a").unwrap();
        let series = SeriesPath::parse("root.a.d0.s0").unwrap();
        assert!(sg.is_prefix_of(&series));
        assert!(sg.is_prefix_of(&sg));
        assert!(!series.is_prefix_of(&sg));
        assert!(!SeriesPath::parse("root.ab").unwrap().is_prefix_of(&series));
    }

    #[test]
    fn test_serde_as_string() {
        let path = SeriesPath::parse("root.a.d0.s0").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"root.a.d0.s0\"");

        let back: SeriesPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);

        assert!(serde_json::from_str::<SeriesPath>("\"root..x\"").is_err());
    }
}
