//! Page identity and file-format constants.

/// Size of a heap page in bytes (8 KB).
pub const PAGE_SIZE: usize = 8192;

/// Size of a B-tree index node in bytes (4 KB).
pub const NODE_SIZE: usize = 4096;

/// Magic bytes at the start of every heap file.
pub const HEAP_MAGIC: [u8; 4] = *b"HEAP";

/// Magic bytes at the start of every index file.
pub const INDEX_MAGIC: [u8; 4] = *b"BTIX";

/// Identifies a page within the data directory.
///
/// `file_id` is assigned by the disk manager when a file is registered;
/// `page_num` is the page's position within that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    /// File this page belongs to.
    pub file_id: u32,
    /// Page number within the file.
    pub page_num: u32,
}

impl PageId {
    /// Creates a new page ID.
    pub fn new(file_id: u32, page_num: u32) -> Self {
        Self { file_id, page_num }
    }

    /// Packs the page ID into a u64 (file_id in the upper 32 bits).
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_num as u64)
    }

    /// Unpacks a page ID from a u64.
    pub fn from_u64(packed: u64) -> Self {
        Self {
            file_id: (packed >> 32) as u32,
            page_num: packed as u32,
        }
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_num)
    }
}
