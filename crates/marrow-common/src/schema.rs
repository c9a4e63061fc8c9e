//! Schema and value types for MarrowDB.
//!
//! The storage core never persists schema itself: the catalog collaborator
//! passes a [`TableSchema`] or [`IndexDescriptor`] into every operation that
//! needs to interpret bytes.

use serde::{Deserialize, Serialize};

/// Maximum stored byte length of a TEXT value.
pub const MAX_TEXT_SIZE: usize = 255;

/// Default prefix length (in bytes) for TEXT components of index keys.
pub const DEFAULT_TEXT_PREFIX_LEN: usize = 10;

/// Supported column data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// 32-bit signed integer.
    Int = 1,
    /// 64-bit signed integer.
    BigInt = 2,
    /// 64-bit floating point.
    Float = 3,
    /// Single-byte boolean.
    Boolean = 4,
    /// 64-bit UTC timestamp (seconds).
    Timestamp = 5,
    /// Variable-length UTF-8 text, at most [`MAX_TEXT_SIZE`] bytes.
    Text = 6,
}

impl DataType {
    /// Returns the fixed byte size for this type, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Int => Some(4),
            DataType::BigInt => Some(8),
            DataType::Float => Some(8),
            DataType::Boolean => Some(1),
            DataType::Timestamp => Some(8),
            DataType::Text => None,
        }
    }

    /// Returns true if this type has a fixed byte size.
    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::BigInt | DataType::Float)
    }

    /// Decodes a type tag byte as stored in index files.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DataType::Int),
            2 => Some(DataType::BigInt),
            3 => Some(DataType::Float),
            4 => Some(DataType::Boolean),
            5 => Some(DataType::Timestamp),
            6 => Some(DataType::Text),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Float => "FLOAT",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "TIMESTAMP",
            DataType::Text => "TEXT",
        };
        write!(f, "{}", name)
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit floating point.
    Float(f64),
    /// Boolean.
    Boolean(bool),
    /// UTC timestamp, seconds since epoch.
    Timestamp(i64),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Returns the data type of this value.
    pub fn datatype(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::BigInt(_) => DataType::BigInt,
            Value::Float(_) => DataType::Float,
            Value::Boolean(_) => DataType::Boolean,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Text(_) => DataType::Text,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Column definition: name, type, and nullability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub datatype: DataType,
    /// Whether NULL values are permitted.
    pub nullable: bool,
}

impl Column {
    /// Creates a new column definition.
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            datatype,
            nullable,
        }
    }
}

/// Table schema: ordered column list.
///
/// Passed by the catalog into every tuple encode/decode call; the column
/// order here defines the serialized value order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name (also the heap file stem: `<name>.dat`).
    pub name: String,
    /// Ordered column definitions.
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Creates a new table schema.
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Returns true if any column is nullable.
    ///
    /// Tuples for schemas with no nullable columns omit the null bitmap.
    pub fn has_nullable_columns(&self) -> bool {
        self.columns.iter().any(|c| c.nullable)
    }

    /// Returns the number of nullable columns (null bitmap width in bits).
    pub fn nullable_count(&self) -> usize {
        self.columns.iter().filter(|c| c.nullable).count()
    }

    /// Returns the position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Index definition supplied by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Index name (the file stem is `<table>_<index>.idx`).
    pub name: String,
    /// Key column names, in declared order (composite keys compare
    /// component-wise in this order).
    pub columns: Vec<String>,
    /// Whether duplicate keys are rejected at insert time.
    pub unique: bool,
    /// TEXT key components are truncated to this many bytes before storage.
    pub text_prefix_len: usize,
}

impl IndexDescriptor {
    /// Creates a descriptor with the default text prefix length.
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
            text_prefix_len: DEFAULT_TEXT_PREFIX_LEN,
        }
    }
}
