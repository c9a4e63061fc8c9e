//! Buffer pool management for MarrowDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - LRU eviction policy
//! - Dirty page tracking with write-back before frame reuse
//! - Hit/miss statistics for observability

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{
    BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage, PageReadGuard, PageWriteGuard,
};
pub use replacer::{LruReplacer, Replacer};
