//! B+tree node representation and fixed-size codec.
//!
//! Nodes serialize into exactly NODE_SIZE bytes. Layout:
//!
//! ```text
//! is_leaf u8 | key_count u16 | next_leaf u64 | keys... | payload
//! ```
//!
//! where payload is `(key_count)` rids for a leaf or `(key_count + 1)`
//! child offsets for an internal node. Keys serialize as a component
//! count followed by tagged values. All integers little-endian.

use crate::tuple::Rid;
use marrow_common::page::NODE_SIZE;
use marrow_common::schema::{DataType, Value, MAX_TEXT_SIZE};
use marrow_common::{MarrowError, Result};
use std::cmp::Ordering;

/// Branching factor: maximum children per internal node.
pub const BTREE_ORDER: usize = 16;

/// Maximum keys per node.
pub const MAX_KEYS: usize = BTREE_ORDER - 1;

/// Minimum keys per non-root node after delete rebalancing.
pub const MIN_KEYS: usize = BTREE_ORDER / 2 - 1;

/// Sentinel offset meaning "no node".
pub const NO_NODE: u64 = u64::MAX;

/// Maximum serialized key size accepted by an index.
///
/// A full node must fit in NODE_SIZE: MAX_KEYS keys of this size plus
/// the node header and MAX_KEYS + 1 child offsets total 3979 bytes.
/// Keys are checked against this bound before any node is touched.
pub const MAX_KEY_SIZE: usize = 256;

const NODE_HEADER_SIZE: usize = 11;

/// A composite index key.
///
/// TEXT components are truncated to the index's prefix length at
/// construction, so two keys differing only past the prefix compare
/// equal. All comparisons happen on decoded values, never raw bytes.
#[derive(Debug, Clone)]
pub struct IndexKey {
    components: Vec<Value>,
}

impl IndexKey {
    /// Builds a key, truncating TEXT components to `text_prefix_len` bytes.
    pub fn new(values: Vec<Value>, text_prefix_len: usize) -> Self {
        let components = values
            .into_iter()
            .map(|v| match v {
                Value::Text(s) => Value::Text(truncate_text(&s, text_prefix_len)),
                other => other,
            })
            .collect();
        Self { components }
    }

    /// Returns the key components.
    pub fn components(&self) -> &[Value] {
        &self.components
    }

    /// Serialized size in bytes: component count plus tagged values.
    pub fn serialized_size(&self) -> usize {
        2 + self
            .components
            .iter()
            .map(|v| {
                1 + match v {
                    Value::Int(_) => 4,
                    Value::BigInt(_) | Value::Float(_) | Value::Timestamp(_) => 8,
                    Value::Boolean(_) => 1,
                    Value::Text(s) => 2 + s.len(),
                }
            })
            .sum::<usize>()
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.components.len() as u16).to_le_bytes());
        for value in &self.components {
            out.push(value.datatype() as u8);
            match value {
                Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
                Value::BigInt(v) => out.extend_from_slice(&v.to_le_bytes()),
                Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
                Value::Boolean(v) => out.push(*v as u8),
                Value::Timestamp(v) => out.extend_from_slice(&v.to_le_bytes()),
                Value::Text(s) => {
                    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
            }
        }
    }

    fn read_from(buf: &[u8], pos: &mut usize) -> Result<Self> {
        let count = read_u16(buf, pos)? as usize;
        let mut components = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = read_bytes(buf, pos, 1)?[0];
            let datatype = DataType::from_tag(tag)
                .ok_or_else(|| MarrowError::IndexCorrupted(format!("unknown type tag {}", tag)))?;
            let value = match datatype {
                DataType::Int => {
                    Value::Int(i32::from_le_bytes(read_bytes(buf, pos, 4)?.try_into().unwrap()))
                }
                DataType::BigInt => Value::BigInt(i64::from_le_bytes(
                    read_bytes(buf, pos, 8)?.try_into().unwrap(),
                )),
                DataType::Float => Value::Float(f64::from_le_bytes(
                    read_bytes(buf, pos, 8)?.try_into().unwrap(),
                )),
                DataType::Boolean => Value::Boolean(read_bytes(buf, pos, 1)?[0] != 0),
                DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(
                    read_bytes(buf, pos, 8)?.try_into().unwrap(),
                )),
                DataType::Text => {
                    let len = read_u16(buf, pos)? as usize;
                    if len > MAX_TEXT_SIZE {
                        return Err(MarrowError::IndexCorrupted(format!(
                            "text key length {} out of range",
                            len
                        )));
                    }
                    let raw = read_bytes(buf, pos, len)?;
                    let s = std::str::from_utf8(raw).map_err(|_| {
                        MarrowError::IndexCorrupted("invalid UTF-8 in key".to_string())
                    })?;
                    Value::Text(s.to_string())
                }
            };
            components.push(value);
        }
        Ok(Self { components })
    }
}

fn truncate_text(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::BigInt(x), Value::BigInt(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        // Keys in one index always share types; tag order keeps the
        // comparison total anyway
        _ => (a.datatype() as u8).cmp(&(b.datatype() as u8)),
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.components.iter().zip(&other.components) {
            match compare_values(a, b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        self.components.len().cmp(&other.components.len())
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// A B+tree node.
///
/// Internal nodes hold N keys and N+1 child offsets; leaves hold N
/// (key, rid) pairs and a next-leaf pointer forming the scan chain.
#[derive(Debug, Clone)]
pub struct BTreeNode {
    /// File offset of this node.
    pub offset: u64,
    /// Leaf or internal.
    pub is_leaf: bool,
    /// Sorted keys.
    pub keys: Vec<IndexKey>,
    /// Child offsets (internal nodes only, `keys.len() + 1` entries).
    pub children: Vec<u64>,
    /// Rids paired with keys (leaves only).
    pub rids: Vec<Rid>,
    /// Next leaf in key order, NO_NODE at the end of the chain.
    pub next_leaf: u64,
}

impl BTreeNode {
    /// Creates an empty leaf node.
    pub fn new_leaf(offset: u64) -> Self {
        Self {
            offset,
            is_leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            rids: Vec::new(),
            next_leaf: NO_NODE,
        }
    }

    /// Creates an empty internal node.
    pub fn new_internal(offset: u64) -> Self {
        Self {
            offset,
            is_leaf: false,
            keys: Vec::new(),
            children: Vec::new(),
            rids: Vec::new(),
            next_leaf: NO_NODE,
        }
    }

    /// Returns true if the node cannot take another key.
    pub fn is_full(&self) -> bool {
        self.keys.len() >= MAX_KEYS
    }

    /// Serializes into a fixed-size node buffer.
    pub fn serialize(&self) -> Result<[u8; NODE_SIZE]> {
        let keys_size: usize = self.keys.iter().map(|k| k.serialized_size()).sum();
        let payload_size = if self.is_leaf {
            self.keys.len() * Rid::SIZE
        } else {
            self.children.len() * 8
        };
        let total = NODE_HEADER_SIZE + keys_size + payload_size;
        if total > NODE_SIZE {
            return Err(MarrowError::NodeOverflow {
                size: total,
                max: NODE_SIZE,
            });
        }

        let mut out = Vec::with_capacity(total);
        out.push(self.is_leaf as u8);
        out.extend_from_slice(&(self.keys.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.next_leaf.to_le_bytes());
        for key in &self.keys {
            key.write_to(&mut out);
        }
        if self.is_leaf {
            for rid in &self.rids {
                out.extend_from_slice(&rid.to_bytes());
            }
        } else {
            for child in &self.children {
                out.extend_from_slice(&child.to_le_bytes());
            }
        }

        let mut buf = [0u8; NODE_SIZE];
        buf[..out.len()].copy_from_slice(&out);
        Ok(buf)
    }

    /// Deserializes a node from its fixed-size buffer.
    pub fn deserialize(offset: u64, buf: &[u8]) -> Result<Self> {
        if buf.len() < NODE_SIZE {
            return Err(MarrowError::IndexCorrupted(format!(
                "short node read at offset {}",
                offset
            )));
        }

        let is_leaf = match buf[0] {
            0 => false,
            1 => true,
            other => {
                return Err(MarrowError::IndexCorrupted(format!(
                    "bad node flag {} at offset {}",
                    other, offset
                )))
            }
        };
        let key_count = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        if key_count > MAX_KEYS {
            return Err(MarrowError::IndexCorrupted(format!(
                "key count {} exceeds maximum at offset {}",
                key_count, offset
            )));
        }
        let next_leaf = u64::from_le_bytes(buf[3..11].try_into().unwrap());

        let mut pos = NODE_HEADER_SIZE;
        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            keys.push(IndexKey::read_from(buf, &mut pos)?);
        }

        let mut rids = Vec::new();
        let mut children = Vec::new();
        if is_leaf {
            for _ in 0..key_count {
                let raw = read_bytes(buf, &mut pos, Rid::SIZE)?;
                let rid = Rid::from_bytes(raw).ok_or_else(|| {
                    MarrowError::IndexCorrupted(format!("bad rid at offset {}", offset))
                })?;
                rids.push(rid);
            }
        } else {
            for _ in 0..key_count + 1 {
                let raw = read_bytes(buf, &mut pos, 8)?;
                children.push(u64::from_le_bytes(raw.try_into().unwrap()));
            }
        }

        Ok(Self {
            offset,
            is_leaf,
            keys,
            children,
            rids,
            next_leaf,
        })
    }
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    if *pos + len > buf.len() {
        return Err(MarrowError::IndexCorrupted(
            "node data truncated".to_string(),
        ));
    }
    let slice = &buf[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16> {
    let raw = read_bytes(buf, pos, 2)?;
    Ok(u16::from_le_bytes(raw.try_into().unwrap()))
}
