//! Storage engine core for MarrowDB.
//!
//! This crate implements the on-disk layer of the engine:
//! - `disk`: page-granular file I/O for heap files
//! - `tuple`: row serialization with a null bitmap over nullable columns
//! - `freespace`: in-memory free space map, rebuilt on open
//! - `heap`: slotted heap pages and heap files with tombstone deletes
//!   and vacuum
//! - `btree`: B+tree indexes with fixed-size nodes, unique enforcement,
//!   range scans, and delete rebalancing
//!
//! Schema is never persisted here: the catalog passes a `TableSchema` or
//! `IndexDescriptor` into every operation that interprets bytes.

pub mod btree;
pub mod disk;
pub mod freespace;
pub mod heap;
pub mod tuple;

pub use btree::{BTreeIndex, IndexKey, RangeScan};
pub use disk::DiskManager;
pub use freespace::FreeSpaceMap;
pub use heap::{HeapFile, HeapPage, SlotState, VacuumStats};
pub use tuple::{decode_tuple, encode_tuple, Rid};
