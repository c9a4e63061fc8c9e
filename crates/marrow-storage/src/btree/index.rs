//! B+tree index over a single file.
//!
//! File layout: a 64-byte header (magic, root offset, node count,
//! uniqueness flag, key column count) followed by fixed-size nodes.
//! Nodes are written back immediately on modification, so the on-disk
//! tree is consistent after every operation. Splits are preemptive:
//! full nodes are split on the way down, so inserts never backtrack.
//!
//! Space from merged nodes is not recycled; allocation is append-only.
//! Rebuilding the index (for example after a heap vacuum) reclaims it.

use crate::btree::node::{BTreeNode, IndexKey, MAX_KEYS, MAX_KEY_SIZE, MIN_KEYS, NO_NODE};
use crate::tuple::Rid;
use marrow_common::config::StorageConfig;
use marrow_common::page::{INDEX_MAGIC, NODE_SIZE};
use marrow_common::schema::{IndexDescriptor, Value};
use marrow_common::{MarrowError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 64;

struct IndexMeta {
    root_offset: u64,
    node_count: u64,
}

/// A persistent B+tree index mapping keys to heap rids.
pub struct BTreeIndex {
    path: PathBuf,
    file_name: String,
    file: Mutex<File>,
    meta: Mutex<IndexMeta>,
    fsync_enabled: bool,
    unique: bool,
    key_column_count: usize,
    text_prefix_len: usize,
}

impl BTreeIndex {
    /// Creates a new index file for a table, truncating any existing one.
    pub fn create(
        config: &StorageConfig,
        table_name: &str,
        descriptor: &IndexDescriptor,
    ) -> Result<Self> {
        let file_name = format!("{}_{}.idx", table_name, descriptor.name);
        let path = config.data_dir.join(&file_name);
        std::fs::create_dir_all(&config.data_dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let index = Self {
            path,
            file_name,
            file: Mutex::new(file),
            meta: Mutex::new(IndexMeta {
                root_offset: HEADER_SIZE,
                node_count: 1,
            }),
            fsync_enabled: config.fsync_enabled,
            unique: descriptor.unique,
            key_column_count: descriptor.columns.len(),
            text_prefix_len: descriptor.text_prefix_len,
        };

        {
            let meta = index.meta.lock();
            index.write_header(&meta)?;
            index.write_node(&BTreeNode::new_leaf(HEADER_SIZE))?;
        }
        index.sync_if_enabled()?;
        Ok(index)
    }

    /// Opens an existing index, validating the header against the
    /// descriptor the catalog supplies.
    pub fn open(
        config: &StorageConfig,
        table_name: &str,
        descriptor: &IndexDescriptor,
    ) -> Result<Self> {
        let file_name = format!("{}_{}.idx", table_name, descriptor.name);
        let path = config.data_dir.join(&file_name);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let corrupted = |reason: &str| MarrowError::Corrupted {
            file: file_name.clone(),
            reason: reason.to_string(),
        };

        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)
            .map_err(|_| corrupted("missing header"))?;

        if header[0..4] != INDEX_MAGIC {
            return Err(corrupted("bad magic"));
        }
        let root_offset = u64::from_le_bytes(header[4..12].try_into().unwrap());
        let node_count = u64::from_le_bytes(header[12..20].try_into().unwrap());
        let unique = header[20] != 0;
        let key_column_count = u32::from_le_bytes(header[21..25].try_into().unwrap()) as usize;

        if unique != descriptor.unique || key_column_count != descriptor.columns.len() {
            return Err(corrupted("header does not match index descriptor"));
        }

        let expected_len = HEADER_SIZE + node_count * NODE_SIZE as u64;
        if file.metadata()?.len() != expected_len {
            return Err(corrupted("node count does not match file size"));
        }
        if root_offset < HEADER_SIZE
            || (root_offset - HEADER_SIZE) % NODE_SIZE as u64 != 0
            || root_offset >= expected_len
        {
            return Err(corrupted("root offset out of range"));
        }

        Ok(Self {
            path,
            file_name,
            file: Mutex::new(file),
            meta: Mutex::new(IndexMeta {
                root_offset,
                node_count,
            }),
            fsync_enabled: config.fsync_enabled,
            unique: descriptor.unique,
            key_column_count,
            text_prefix_len: descriptor.text_prefix_len,
        })
    }

    /// Returns the index file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if this index enforces key uniqueness.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Number of allocated nodes (including garbage left by merges).
    pub fn node_count(&self) -> u64 {
        self.meta.lock().node_count
    }

    /// Builds a key from column values, applying text prefix truncation.
    pub fn make_key(&self, values: Vec<Value>) -> Result<IndexKey> {
        if values.len() != self.key_column_count {
            return Err(MarrowError::Internal(format!(
                "index {} expects {} key columns, got {}",
                self.file_name,
                self.key_column_count,
                values.len()
            )));
        }
        Ok(IndexKey::new(values, self.text_prefix_len))
    }

    fn write_header(&self, meta: &IndexMeta) -> Result<()> {
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(&INDEX_MAGIC);
        header[4..12].copy_from_slice(&meta.root_offset.to_le_bytes());
        header[12..20].copy_from_slice(&meta.node_count.to_le_bytes());
        header[20] = self.unique as u8;
        header[21..25].copy_from_slice(&(self.key_column_count as u32).to_le_bytes());

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        Ok(())
    }

    fn read_node(&self, offset: u64) -> Result<BTreeNode> {
        if offset < HEADER_SIZE || (offset - HEADER_SIZE) % NODE_SIZE as u64 != 0 {
            return Err(MarrowError::IndexCorrupted(format!(
                "misaligned node offset {} in {}",
                offset, self.file_name
            )));
        }
        let mut buf = [0u8; NODE_SIZE];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf).map_err(|_| {
            MarrowError::IndexCorrupted(format!(
                "node read past end of {} at offset {}",
                self.file_name, offset
            ))
        })?;
        drop(file);
        BTreeNode::deserialize(offset, &buf)
    }

    fn write_node(&self, node: &BTreeNode) -> Result<()> {
        let buf = node.serialize()?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(node.offset))?;
        file.write_all(&buf)?;
        Ok(())
    }

    fn allocate_leaf(&self, meta: &mut IndexMeta) -> BTreeNode {
        let offset = HEADER_SIZE + meta.node_count * NODE_SIZE as u64;
        meta.node_count += 1;
        BTreeNode::new_leaf(offset)
    }

    fn allocate_internal(&self, meta: &mut IndexMeta) -> BTreeNode {
        let offset = HEADER_SIZE + meta.node_count * NODE_SIZE as u64;
        meta.node_count += 1;
        BTreeNode::new_internal(offset)
    }

    fn sync_if_enabled(&self) -> Result<()> {
        if self.fsync_enabled {
            self.file.lock().sync_all()?;
        }
        Ok(())
    }

    /// Descends to the leftmost leaf that can hold `key`.
    ///
    /// Separators are copied from their right sibling's first key at
    /// split time, so a run of equal keys can continue to the left of
    /// an equal separator. Lookups therefore take the left branch on
    /// equality and scan forward through the leaf chain; only inserts
    /// descend to the right of equal separators.
    fn find_leaf(&self, root_offset: u64, key: &IndexKey) -> Result<BTreeNode> {
        let mut node = self.read_node(root_offset)?;
        while !node.is_leaf {
            let idx = node.keys.partition_point(|k| k < key);
            node = self.read_node(node.children[idx])?;
        }
        Ok(node)
    }

    /// Checks for an existing entry with an equal key, scanning forward
    /// through the leaf chain past keys equal to `key`.
    fn contains_key(&self, root_offset: u64, key: &IndexKey) -> Result<bool> {
        let mut node = self.find_leaf(root_offset, key)?;
        loop {
            let pos = node.keys.partition_point(|k| k < key);
            if pos < node.keys.len() {
                return Ok(node.keys[pos] == *key);
            }
            if node.next_leaf == NO_NODE {
                return Ok(false);
            }
            node = self.read_node(node.next_leaf)?;
        }
    }

    /// Inserts a key/rid pair.
    ///
    /// For unique indexes an equal key (equal after text truncation) is
    /// rejected with [`MarrowError::DuplicateKey`] before anything is
    /// written.
    pub fn insert(&self, key: IndexKey, rid: Rid) -> Result<()> {
        // A key wider than this could overflow a node mid-split, after
        // sibling nodes have already been written. Reject it up front so
        // a failed insert leaves no partial state behind.
        let key_size = key.serialized_size();
        if key_size > MAX_KEY_SIZE {
            return Err(MarrowError::NodeOverflow {
                size: key_size,
                max: MAX_KEY_SIZE,
            });
        }

        let mut meta = self.meta.lock();

        if self.unique && self.contains_key(meta.root_offset, &key)? {
            return Err(MarrowError::DuplicateKey(key.to_string()));
        }

        let root = self.read_node(meta.root_offset)?;
        let top = if root.keys.len() >= MAX_KEYS {
            let mut new_root = self.allocate_internal(&mut meta);
            new_root.children.push(root.offset);
            self.split_child(&mut meta, &mut new_root, 0)?;
            meta.root_offset = new_root.offset;
            new_root
        } else {
            root
        };

        self.insert_nonfull(&mut meta, top, key, rid)?;
        self.write_header(&meta)?;
        self.sync_if_enabled()
    }

    /// Splits the full child at `idx`, promoting a separator into `parent`.
    ///
    /// Writes the child, the new sibling, and the parent.
    fn split_child(&self, meta: &mut IndexMeta, parent: &mut BTreeNode, idx: usize) -> Result<()> {
        let mut child = self.read_node(parent.children[idx])?;
        let mid = child.keys.len() / 2;

        let right = if child.is_leaf {
            let mut right = self.allocate_leaf(meta);
            right.keys = child.keys.split_off(mid);
            right.rids = child.rids.split_off(mid);
            right.next_leaf = child.next_leaf;
            child.next_leaf = right.offset;
            // Separator copies the right leaf's first key; the key itself
            // stays in the leaf
            parent.keys.insert(idx, right.keys[0].clone());
            right
        } else {
            let mut right = self.allocate_internal(meta);
            right.keys = child.keys.split_off(mid + 1);
            right.children = child.children.split_off(mid + 1);
            // The median moves up and out of the internal node
            let separator = child.keys.pop().expect("split of non-full node");
            parent.keys.insert(idx, separator);
            right
        };
        parent.children.insert(idx + 1, right.offset);

        self.write_node(&child)?;
        self.write_node(&right)?;
        self.write_node(parent)
    }

    fn insert_nonfull(
        &self,
        meta: &mut IndexMeta,
        mut node: BTreeNode,
        key: IndexKey,
        rid: Rid,
    ) -> Result<()> {
        if node.is_leaf {
            let pos = node.keys.partition_point(|k| k < &key);
            node.keys.insert(pos, key);
            node.rids.insert(pos, rid);
            return self.write_node(&node);
        }

        let mut idx = node.keys.partition_point(|k| k <= &key);
        let child = self.read_node(node.children[idx])?;
        if child.keys.len() >= MAX_KEYS {
            self.split_child(meta, &mut node, idx)?;
            if node.keys[idx] <= key {
                idx += 1;
            }
        }
        let child = self.read_node(node.children[idx])?;
        self.insert_nonfull(meta, child, key, rid)
    }

    /// Looks up a key, returning the rid of the first matching entry.
    pub fn search(&self, key: &IndexKey) -> Result<Option<Rid>> {
        let root_offset = self.meta.lock().root_offset;
        let mut node = self.find_leaf(root_offset, key)?;
        loop {
            let pos = node.keys.partition_point(|k| k < key);
            if pos < node.keys.len() {
                if node.keys[pos] == *key {
                    return Ok(Some(node.rids[pos]));
                }
                return Ok(None);
            }
            if node.next_leaf == NO_NODE {
                return Ok(None);
            }
            node = self.read_node(node.next_leaf)?;
        }
    }

    /// Returns a lazy iterator over rids for all keys in `[start, end]`,
    /// both bounds inclusive, in ascending key order.
    ///
    /// Only the starting leaf is read up front; the chain is followed as
    /// the iterator is consumed. The scan holds no lock, so it sees
    /// whatever state concurrent mutations leave behind, same as
    /// [`HeapFile::scan_all`](crate::heap::HeapFile::scan_all).
    pub fn range_query(&self, start: &IndexKey, end: &IndexKey) -> Result<RangeScan<'_>> {
        let node = if start > end {
            None
        } else {
            let root_offset = self.meta.lock().root_offset;
            Some(self.find_leaf(root_offset, start)?)
        };

        Ok(RangeScan {
            index: self,
            start: start.clone(),
            end: end.clone(),
            node,
            pos: 0,
        })
    }

    /// Deletes the first entry matching `key`.
    ///
    /// Returns false (without error) if no entry matches. Nodes that
    /// fall below minimum fill borrow from a sibling or merge, and the
    /// root collapses when an internal root runs out of keys.
    pub fn delete(&self, key: &IndexKey) -> Result<bool> {
        let mut meta = self.meta.lock();
        let mut root = self.read_node(meta.root_offset)?;
        let removed = self.delete_from(&mut root, key)?;

        if !root.is_leaf && root.keys.is_empty() {
            meta.root_offset = root.children[0];
        }
        self.write_header(&meta)?;
        if removed {
            self.sync_if_enabled()?;
        }
        Ok(removed)
    }

    fn delete_from(&self, node: &mut BTreeNode, key: &IndexKey) -> Result<bool> {
        if node.is_leaf {
            let pos = node.keys.partition_point(|k| k < key);
            if pos < node.keys.len() && node.keys[pos] == *key {
                node.keys.remove(pos);
                node.rids.remove(pos);
                self.write_node(node)?;
                return Ok(true);
            }
            return Ok(false);
        }

        // A run of equal keys can span several children; every separator
        // inside the run equals the key, so each child between the lower
        // and upper bound is a candidate. Failed candidates are left
        // untouched.
        let lo = node.keys.partition_point(|k| k < key);
        let hi = node.keys.partition_point(|k| k <= key);
        for idx in lo..=hi {
            let mut child = self.read_node(node.children[idx])?;
            if !self.delete_from(&mut child, key)? {
                continue;
            }
            if child.keys.len() < MIN_KEYS {
                self.rebalance_child(node, idx, child)?;
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Restores minimum fill for the child at `idx`, preferring a borrow
    /// over a merge. Writes every node it touches.
    fn rebalance_child(
        &self,
        parent: &mut BTreeNode,
        idx: usize,
        mut child: BTreeNode,
    ) -> Result<()> {
        // Borrow from the left sibling
        if idx > 0 {
            let mut left = self.read_node(parent.children[idx - 1])?;
            if left.keys.len() > MIN_KEYS {
                if child.is_leaf {
                    let k = left.keys.pop().expect("left sibling above minimum");
                    let r = left.rids.pop().expect("left sibling above minimum");
                    child.keys.insert(0, k.clone());
                    child.rids.insert(0, r);
                    parent.keys[idx - 1] = k;
                } else {
                    child.keys.insert(0, parent.keys[idx - 1].clone());
                    parent.keys[idx - 1] = left.keys.pop().expect("left sibling above minimum");
                    let c = left.children.pop().expect("left sibling above minimum");
                    child.children.insert(0, c);
                }
                self.write_node(&left)?;
                self.write_node(&child)?;
                return self.write_node(parent);
            }
        }

        // Borrow from the right sibling
        if idx + 1 < parent.children.len() {
            let mut right = self.read_node(parent.children[idx + 1])?;
            if right.keys.len() > MIN_KEYS {
                if child.is_leaf {
                    child.keys.push(right.keys.remove(0));
                    child.rids.push(right.rids.remove(0));
                    parent.keys[idx] = right.keys[0].clone();
                } else {
                    child.keys.push(parent.keys[idx].clone());
                    parent.keys[idx] = right.keys.remove(0);
                    child.children.push(right.children.remove(0));
                }
                self.write_node(&right)?;
                self.write_node(&child)?;
                return self.write_node(parent);
            }
        }

        // Merge; the right-hand node becomes unreferenced garbage
        if idx > 0 {
            let left = self.read_node(parent.children[idx - 1])?;
            self.merge_children(parent, idx - 1, left, child)
        } else {
            let right = self.read_node(parent.children[idx + 1])?;
            self.merge_children(parent, idx, child, right)
        }
    }

    /// Merges `children[left_idx + 1]` into `children[left_idx]`.
    fn merge_children(
        &self,
        parent: &mut BTreeNode,
        left_idx: usize,
        mut left: BTreeNode,
        right: BTreeNode,
    ) -> Result<()> {
        if left.is_leaf {
            left.keys.extend(right.keys);
            left.rids.extend(right.rids);
            left.next_leaf = right.next_leaf;
        } else {
            left.keys.push(parent.keys[left_idx].clone());
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }
        parent.keys.remove(left_idx);
        parent.children.remove(left_idx + 1);

        self.write_node(&left)?;
        self.write_node(parent)
    }
}

/// Lazy inclusive range scan over the leaf chain.
///
/// Yields `Err` and stops if a chained leaf fails to read.
pub struct RangeScan<'a> {
    index: &'a BTreeIndex,
    start: IndexKey,
    end: IndexKey,
    node: Option<BTreeNode>,
    pos: usize,
}

impl Iterator for RangeScan<'_> {
    type Item = Result<Rid>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.node.take()?;

            while self.pos < node.keys.len() {
                let i = self.pos;
                self.pos += 1;
                // Keys below the bound only appear in the starting leaf
                if node.keys[i] < self.start {
                    continue;
                }
                if node.keys[i] > self.end {
                    return None;
                }
                let rid = node.rids[i];
                self.node = Some(node);
                return Some(Ok(rid));
            }

            if node.next_leaf == NO_NODE {
                return None;
            }
            match self.index.read_node(node.next_leaf) {
                Ok(next) => {
                    self.node = Some(next);
                    self.pos = 0;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta.lock();
        f.debug_struct("BTreeIndex")
            .field("path", &self.path)
            .field("unique", &self.unique)
            .field("root_offset", &meta.root_offset)
            .field("node_count", &meta.node_count)
            .finish()
    }
}
