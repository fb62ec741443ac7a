//! Core schema and value types
//!
//! - `DataType`, `Encoding`, `Compression`: how a measurement is stored
//! - `MeasurementSchema`: the schema record attached to a measurement leaf
//! - `NodeKind`: classification of schema tree nodes
//! - `Value` and `TimeValuePair`: decoded data points flowing through readers

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Physical type of a measurement's values
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
    Text,
}

impl DataType {
    /// Parse from a type name such as `INT32` (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BOOLEAN" => Some(Self::Boolean),
            "INT32" => Some(Self::Int32),
            "INT64" => Some(Self::Int64),
            "FLOAT" => Some(Self::Float),
            "DOUBLE" => Some(Self::Double),
            "TEXT" => Some(Self::Text),
            _ => None,
        }
    }

    /// True for the numeric types
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Boolean | Self::Text)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Int32 => write!(f, "INT32"),
            Self::Int64 => write!(f, "INT64"),
            Self::Float => write!(f, "FLOAT"),
            Self::Double => write!(f, "DOUBLE"),
            Self::Text => write!(f, "TEXT"),
        }
    }
}

/// Value encoding of a measurement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    Plain,
    Rle,
    Ts2diff,
    Gorilla,
    Dictionary,
}

impl Encoding {
    /// Parse from an encoding name such as `RLE` (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "RLE" => Some(Self::Rle),
            "TS_2DIFF" | "TS2DIFF" => Some(Self::Ts2diff),
            "GORILLA" => Some(Self::Gorilla),
            "DICTIONARY" => Some(Self::Dictionary),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "PLAIN"),
            Self::Rle => write!(f, "RLE"),
            Self::Ts2diff => write!(f, "TS_2DIFF"),
            Self::Gorilla => write!(f, "GORILLA"),
            Self::Dictionary => write!(f, "DICTIONARY"),
        }
    }
}

/// Compression codec of a measurement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Compression {
    Uncompressed,
    Snappy,
    Gzip,
    Lz4,
}

impl Compression {
    /// Parse from a codec name such as `GZIP` (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "UNCOMPRESSED" => Some(Self::Uncompressed),
            "SNAPPY" => Some(Self::Snappy),
            "GZIP" => Some(Self::Gzip),
            "LZ4" => Some(Self::Lz4),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncompressed => write!(f, "UNCOMPRESSED"),
            Self::Snappy => write!(f, "SNAPPY"),
            Self::Gzip => write!(f, "GZIP"),
            Self::Lz4 => write!(f, "LZ4"),
        }
    }
}

/// Schema record of a measurement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MeasurementSchema {
    pub data_type: DataType,
    pub encoding: Encoding,
    pub compression: Compression,
    /// Optional per-measurement properties
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl MeasurementSchema {
    /// Create a schema without properties
    pub fn new(data_type: DataType, encoding: Encoding, compression: Compression) -> Self {
        Self {
            data_type,
            encoding,
            compression,
            props: BTreeMap::new(),
        }
    }

    /// Builder method: add a property
    pub fn prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

/// Kind of a schema tree node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Internal,
    StorageGroup,
    Measurement,
}

/// A single decoded value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Text(String),
}

impl Value {
    /// The data type this value belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::Text(_) => DataType::Text,
        }
    }

    /// Numeric view of the value, if it is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(v) => Some(*v as f64),
            Self::Int64(v) => Some(*v as f64),
            Self::Float(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::Boolean(_) | Self::Text(_) => None,
        }
    }

    /// Compare two values; numeric variants compare with each other,
    /// text with text, booleans with booleans
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A timestamped value produced by readers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeValuePair {
    /// Timestamp in milliseconds
    pub timestamp: i64,
    pub value: Value,
}

impl TimeValuePair {
    pub fn new(timestamp: i64, value: Value) -> Self {
        Self { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_names() {
        assert_eq!(DataType::parse("int32"), Some(DataType::Int32));
        assert_eq!(DataType::parse("TEXT"), Some(DataType::Text));
        assert_eq!(DataType::parse("decimal"), None);
        assert_eq!(Encoding::parse("rle"), Some(Encoding::Rle));
        assert_eq!(Encoding::parse("TS_2DIFF"), Some(Encoding::Ts2diff));
        assert_eq!(Compression::parse("Gzip"), Some(Compression::Gzip));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for dt in [
            DataType::Boolean,
            DataType::Int32,
            DataType::Int64,
            DataType::Float,
            DataType::Double,
            DataType::Text,
        ] {
            assert_eq!(DataType::parse(&dt.to_string()), Some(dt));
        }
        assert_eq!(Encoding::parse(&Encoding::Ts2diff.to_string()), Some(Encoding::Ts2diff));
    }

    #[test]
    fn test_value_compare_across_numeric_types() {
        assert_eq!(Value::Int32(3).compare(&Value::Double(3.0)), Some(Ordering::Equal));
        assert_eq!(Value::Int64(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(
            Value::Text("b".into()).compare(&Value::Text("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Boolean(true).compare(&Value::Int32(1)), None);
        assert_eq!(Value::Text("1".into()).compare(&Value::Int32(1)), None);
    }

    #[test]
    fn test_schema_builder() {
        let schema = MeasurementSchema::new(DataType::Float, Encoding::Gorilla, Compression::Lz4)
            .prop("unit", "celsius");
        assert_eq!(schema.props.get("unit").map(String::as_str), Some("celsius"));
        assert!(schema.data_type.is_numeric());
    }
}
