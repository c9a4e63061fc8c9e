//! Tuple serialization.
//!
//! Layout: an optional null bitmap followed by column values in schema
//! order. The bitmap covers nullable columns only, one bit each in
//! declaration order, LSB first within each byte, 1 = null. Schemas with
//! no nullable columns omit the bitmap entirely.
//!
//! Fixed-size values are little-endian: INT 4 bytes, BIGINT 8, FLOAT 8,
//! BOOLEAN 1, TIMESTAMP 8. TEXT is a u16 length prefix plus UTF-8 bytes,
//! truncated to MAX_TEXT_SIZE bytes at a character boundary.

use bytes::Bytes;
use marrow_common::schema::{DataType, TableSchema, Value, MAX_TEXT_SIZE};
use marrow_common::{MarrowError, Result};

/// Physical location of a tuple: page number and slot within the page.
///
/// Rids are stable across deletes of other tuples but invalidated by
/// vacuum, which rewrites pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    /// Page number within the heap file.
    pub page_num: u32,
    /// Slot index within the page.
    pub slot: u16,
}

impl Rid {
    /// Serialized size in bytes.
    pub const SIZE: usize = 6;

    /// Creates a new record ID.
    pub fn new(page_num: u32, slot: u16) -> Self {
        Self { page_num, slot }
    }

    /// Serializes to 6 bytes, little-endian.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_num.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Deserializes from 6 bytes.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            page_num: u32::from_le_bytes(buf[0..4].try_into().ok()?),
            slot: u16::from_le_bytes(buf[4..6].try_into().ok()?),
        })
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_num, self.slot)
    }
}

/// Truncates a string to at most `max_bytes` UTF-8 bytes without
/// splitting a character.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn corrupted(schema: &TableSchema, reason: impl Into<String>) -> MarrowError {
    MarrowError::Corrupted {
        file: format!("{}.dat", schema.name),
        reason: reason.into(),
    }
}

/// Encodes a row of values against a schema.
///
/// `values` must match the schema's columns positionally, with None for
/// SQL NULL. Rejects nulls in non-nullable columns, type mismatches, and
/// encodings larger than `max_tuple_size`.
pub fn encode_tuple(
    values: &[Option<Value>],
    schema: &TableSchema,
    max_tuple_size: usize,
) -> Result<Bytes> {
    if values.len() != schema.columns.len() {
        return Err(MarrowError::Internal(format!(
            "value count {} does not match schema '{}' with {} columns",
            values.len(),
            schema.name,
            schema.columns.len()
        )));
    }

    let bitmap_len = schema.nullable_count().div_ceil(8);
    let mut bitmap = vec![0u8; bitmap_len];
    let mut body: Vec<u8> = Vec::new();

    let mut nullable_idx = 0;
    for (value, column) in values.iter().zip(&schema.columns) {
        match value {
            None => {
                if !column.nullable {
                    return Err(MarrowError::NullNotAllowed(column.name.clone()));
                }
                bitmap[nullable_idx / 8] |= 1 << (nullable_idx % 8);
            }
            Some(v) => {
                if v.datatype() != column.datatype {
                    return Err(MarrowError::TypeMismatch {
                        expected: column.datatype.to_string(),
                        actual: v.datatype().to_string(),
                    });
                }
                encode_value(v, &mut body);
            }
        }
        if column.nullable {
            nullable_idx += 1;
        }
    }

    let total = bitmap_len + body.len();
    if total > max_tuple_size {
        return Err(MarrowError::TupleTooLarge {
            size: total,
            max: max_tuple_size,
        });
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&bitmap);
    out.extend_from_slice(&body);
    Ok(Bytes::from(out))
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::BigInt(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Boolean(v) => out.push(*v as u8),
        Value::Timestamp(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::Text(s) => {
            let truncated = truncate_utf8(s, MAX_TEXT_SIZE);
            out.extend_from_slice(&(truncated.len() as u16).to_le_bytes());
            out.extend_from_slice(truncated.as_bytes());
        }
    }
}

/// Decodes a tuple against a schema.
///
/// Returns one entry per column, None for NULL. Malformed bytes (length
/// overruns, invalid UTF-8) are corruption.
pub fn decode_tuple(data: &[u8], schema: &TableSchema) -> Result<Vec<Option<Value>>> {
    let bitmap_len = schema.nullable_count().div_ceil(8);
    if data.len() < bitmap_len {
        return Err(corrupted(schema, "tuple shorter than null bitmap"));
    }
    let bitmap = &data[..bitmap_len];
    let mut pos = bitmap_len;

    let mut values = Vec::with_capacity(schema.columns.len());
    let mut nullable_idx = 0;

    for column in &schema.columns {
        let is_null = if column.nullable {
            let bit = bitmap[nullable_idx / 8] >> (nullable_idx % 8) & 1;
            nullable_idx += 1;
            bit == 1
        } else {
            false
        };

        if is_null {
            values.push(None);
            continue;
        }

        let value = match column.datatype {
            DataType::Int => {
                let raw = take(data, &mut pos, 4, schema, &column.name)?;
                Value::Int(i32::from_le_bytes(raw.try_into().unwrap()))
            }
            DataType::BigInt => {
                let raw = take(data, &mut pos, 8, schema, &column.name)?;
                Value::BigInt(i64::from_le_bytes(raw.try_into().unwrap()))
            }
            DataType::Float => {
                let raw = take(data, &mut pos, 8, schema, &column.name)?;
                Value::Float(f64::from_le_bytes(raw.try_into().unwrap()))
            }
            DataType::Boolean => {
                let raw = take(data, &mut pos, 1, schema, &column.name)?;
                Value::Boolean(raw[0] != 0)
            }
            DataType::Timestamp => {
                let raw = take(data, &mut pos, 8, schema, &column.name)?;
                Value::Timestamp(i64::from_le_bytes(raw.try_into().unwrap()))
            }
            DataType::Text => {
                let raw = take(data, &mut pos, 2, schema, &column.name)?;
                let len = u16::from_le_bytes(raw.try_into().unwrap()) as usize;
                if len > MAX_TEXT_SIZE {
                    return Err(corrupted(
                        schema,
                        format!("text length {} exceeds maximum in column '{}'", len, column.name),
                    ));
                }
                let raw = take(data, &mut pos, len, schema, &column.name)?;
                let s = std::str::from_utf8(raw).map_err(|_| {
                    corrupted(schema, format!("invalid UTF-8 in column '{}'", column.name))
                })?;
                Value::Text(s.to_string())
            }
        };
        values.push(Some(value));
    }

    Ok(values)
}

fn take<'a>(
    data: &'a [u8],
    pos: &mut usize,
    len: usize,
    schema: &TableSchema,
    column: &str,
) -> Result<&'a [u8]> {
    if *pos + len > data.len() {
        return Err(corrupted(
            schema,
            format!("tuple truncated while reading column '{}'", column),
        ));
    }
    let slice = &data[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}
