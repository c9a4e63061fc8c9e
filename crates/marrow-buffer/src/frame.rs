//! Buffer frames: page-sized slots the pool hands out and recycles.

use marrow_common::page::{PageId, PAGE_SIZE};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Packed page id meaning the frame holds nothing.
const NO_PAGE: u64 = u64::MAX;

/// Position of a frame within the pool's frame table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

/// One page-sized slot plus the bookkeeping the pool needs to decide
/// whether the slot can be recycled: a pin count and a dirty flag.
/// Recency lives in the replacer, identity in the pool's page table;
/// the frame itself does not know its own position.
///
/// All metadata is atomic and the data buffer sits behind its own
/// `RwLock`, so readers of one frame never contend with writers of
/// another.
pub struct BufferFrame {
    page_id: AtomicU64,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl BufferFrame {
    pub fn new() -> Self {
        Self {
            page_id: AtomicU64::new(NO_PAGE),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// The page held by this frame, if any.
    pub fn page_id(&self) -> Option<PageId> {
        match self.page_id.load(Ordering::Acquire) {
            NO_PAGE => None,
            packed => Some(PageId::from_u64(packed)),
        }
    }

    pub fn set_page_id(&self, page_id: Option<PageId>) {
        let packed = page_id.map_or(NO_PAGE, |pid| pid.as_u64());
        self.page_id.store(packed, Ordering::Release);
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Takes a pin, keeping the frame off the eviction table.
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Releases a pin, returning the new count. An unpin with no
    /// matching pin stays at zero.
    pub fn unpin(&self) -> u32 {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            })
            .map(|prev| prev.saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Overwrites the frame's data from a page-sized (or shorter) slice.
    pub fn copy_from(&self, src: &[u8]) {
        let len = src.len().min(PAGE_SIZE);
        self.data.write()[..len].copy_from_slice(&src[..len]);
    }

    /// Clears the frame for reuse by the next page.
    pub fn reset(&self) {
        self.page_id.store(NO_PAGE, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl Default for BufferFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
