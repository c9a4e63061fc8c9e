//! Configuration structures for MarrowDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the engine core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files (`<table>.dat`, `<table>_<index>.idx`).
    pub data_dir: PathBuf,
    /// Buffer pool capacity in pages.
    pub buffer_pool_pages: usize,
    /// Maximum encoded tuple size in bytes (bitmap + payload).
    pub max_tuple_size: usize,
    /// Enable fsync after page writes for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_pages: 128,
            max_tuple_size: 2048,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * crate::page::PAGE_SIZE
    }
}
