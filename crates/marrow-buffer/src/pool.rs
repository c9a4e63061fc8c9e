//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use marrow_common::page::{PageId, PAGE_SIZE};
use marrow_common::{MarrowError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A dirty page that was evicted from the buffer pool.
///
/// The caller owns the write-back: the page bytes must reach disk before
/// the eviction is considered complete.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 128 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for newly cached pages
/// - LRU replacement for eviction
/// - Pin counting so in-use frames are never repurposed
///
/// At most one cached copy exists per page; a dirty frame's bytes are
/// handed back as an [`EvictedPage`] before its slot is reused.
#[derive(Debug)]
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: RwLock<HashMap<PageId, FrameId>>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: LruReplacer,
    /// Number of fetches served from the cache.
    hit_count: AtomicU64,
    /// Number of fetches that missed the cache.
    miss_count: AtomicU64,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames).map(|_| BufferFrame::new()).collect();

        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: RwLock::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            replacer: LruReplacer::new(num_frames),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.read().len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.read().contains_key(&page_id)
    }

    /// Fetches a cached page, pinning it and refreshing its recency.
    ///
    /// Returns None (and counts a miss) if the page is not cached; the
    /// caller then loads it from disk and calls [`BufferPool::load_page`].
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = match self.page_table.read().get(&page_id) {
            Some(&fid) => fid,
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        self.hit_count.fetch_add(1, Ordering::Relaxed);

        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
        Some(frame)
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries the free list first, then evicts the least-recently-used
    /// unpinned frame. Returns the frame ID and any evicted dirty page.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok((frame_id, None));
            }
        }

        let victim_id = self.replacer.evict().ok_or(MarrowError::BufferPoolFull)?;
        let frame = &self.frames[victim_id.0 as usize];

        // Capture the page bytes if dirty: they must hit disk before reuse.
        let evicted = if frame.is_dirty() {
            frame.page_id().map(|page_id| {
                let data_guard = frame.read_data();
                let mut data = Box::new([0u8; PAGE_SIZE]);
                data.copy_from_slice(&**data_guard);
                EvictedPage { page_id, data }
            })
        } else {
            None
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.write().remove(&old_page_id);
        }

        Ok((victim_id, evicted))
    }

    /// Inserts a new (or about-to-be-loaded) page into the buffer pool.
    ///
    /// If the page already exists, returns the existing frame pinned.
    /// Returns (frame, evicted) where evicted carries any dirty page that
    /// was displaced; the caller must write it to disk.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(&frame_id) = self.page_table.read().get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        self.page_table.write().insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Loads page data read from disk into the buffer pool.
    ///
    /// Returns the pinned frame and any evicted dirty page.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// When the pin count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let frame_id = match self.page_table.read().get(&page_id) {
            Some(&fid) => fid,
            None => return false,
        };
        let frame = &self.frames[frame_id.0 as usize];

        if is_dirty {
            frame.set_dirty(true);
        }

        if frame.unpin() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Flushes a single page through the provided write callback.
    ///
    /// Returns true if the page was dirty and got flushed.
    pub fn flush_page<F>(&self, page_id: PageId, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let frame_id = match self.page_table.read().get(&page_id) {
            Some(&fid) => fid,
            None => return Ok(false),
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_dirty() {
            let data = frame.read_data();
            flush_fn(page_id, &**data)?;
            frame.set_dirty(false);
            return Ok(true);
        }
        Ok(false)
    }

    /// Flushes all dirty pages through the provided write callback.
    ///
    /// Returns the number of pages flushed. After a successful call no
    /// frame remains dirty.
    pub fn flush_all<F>(&self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        // Snapshot the table so no guard is held across the callback.
        let entries: Vec<(PageId, FrameId)> = self
            .page_table
            .read()
            .iter()
            .map(|(&pid, &fid)| (pid, fid))
            .collect();

        let mut flushed = 0;
        for (page_id, frame_id) in entries {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(page_id, &**data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops a page from the buffer pool without writing it.
    ///
    /// Returns false if the page is pinned or not cached.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut table = self.page_table.write();
        let frame_id = match table.get(&page_id) {
            Some(&fid) => fid,
            None => return false,
        };
        let frame = &self.frames[frame_id.0 as usize];

        if frame.is_pinned() {
            return false;
        }

        table.remove(&page_id);
        drop(table);

        self.replacer.remove(frame_id);
        frame.reset();
        self.free_list.lock().push(frame_id);
        true
    }

    /// Returns a read guard for page data.
    pub fn read_page(&self, page_id: PageId) -> Option<PageReadGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Some(PageReadGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns a write guard for page data.
    pub fn write_page(&self, page_id: PageId) -> Option<PageWriteGuard<'_>> {
        let frame = self.fetch_page(page_id)?;
        Some(PageWriteGuard {
            pool: self,
            page_id,
            frame,
        })
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        for &frame_id in self.page_table.read().values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_count(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
            hit_count: hits,
            miss_count: misses,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Fetches served from cache.
    pub hit_count: u64,
    /// Fetches that missed the cache.
    pub miss_count: u64,
}

impl BufferPoolStats {
    /// Fraction of fetches served from cache, 0.0 when no fetches yet.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// RAII guard for reading a page.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, false);
    }
}

/// RAII guard for writing a page.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns mutable access to page data.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Marks the page as dirty.
    pub fn set_dirty(&self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.frame.is_dirty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_pool(num_frames: usize) -> BufferPool {
        BufferPool::new(BufferPoolConfig { num_frames })
    }

    #[test]
    fn test_buffer_pool_new() {
        let pool = create_test_pool(10);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_buffer_pool_default_capacity() {
        let pool = BufferPool::new(BufferPoolConfig::default());
        assert_eq!(pool.num_frames(), 128);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_fetch_existing() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_fetch_nonexistent() {
        let pool = create_test_pool(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        assert!(frame.is_pinned());

        pool.unpin_page(page_id, false);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_buffer_pool_dirty_tracking() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_evicts_lru_clean_frame() {
        let pool = create_test_pool(3);

        for i in 0..3 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }

        // Touch pages 1 and 2 so page 0 is the least recently used
        pool.fetch_page(PageId::new(0, 1)).unwrap();
        pool.unpin_page(PageId::new(0, 1), false);
        pool.fetch_page(PageId::new(0, 2)).unwrap();
        pool.unpin_page(PageId::new(0, 2), false);

        let new_page_id = PageId::new(0, 99);
        let (_, evicted) = pool.new_page(new_page_id).unwrap();

        assert!(evicted.is_none()); // victim was clean
        assert!(!pool.contains(PageId::new(0, 0)));
        assert!(pool.contains(PageId::new(0, 1)));
        assert!(pool.contains(PageId::new(0, 2)));
        assert!(pool.contains(new_page_id));
    }

    #[test]
    fn test_buffer_pool_eviction_returns_dirty_page() {
        let pool = create_test_pool(1);
        let page_id1 = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id1).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(page_id1, true);

        let page_id2 = PageId::new(0, 2);
        let (_, evicted) = pool.new_page(page_id2).unwrap();

        let evicted = evicted.expect("dirty page must be returned on eviction");
        assert_eq!(evicted.page_id, page_id1);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_buffer_pool_full_all_pinned() {
        let pool = create_test_pool(2);

        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(MarrowError::BufferPoolFull)));
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        assert!(pool.contains(page_id));
        assert!(pool.delete_page(page_id));
        assert!(!pool.contains(page_id));
        assert_eq!(pool.free_count(), 10);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        // Don't unpin

        assert!(!pool.delete_page(page_id));
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_buffer_pool_load_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);
        let data = [0xABu8; PAGE_SIZE];

        let (frame, _) = pool.load_page(page_id, &data).unwrap();

        let frame_data = frame.read_data();
        assert_eq!(frame_data[0], 0xAB);
        assert_eq!(frame_data[100], 0xAB);
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);

        let mut flushed_pages = vec![];
        let result = pool.flush_page(page_id, |pid, _data| {
            flushed_pages.push(pid);
            Ok(())
        });

        assert!(result.unwrap());
        assert_eq!(flushed_pages, vec![page_id]);

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(!frame.is_dirty());
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let pool = create_test_pool(10);

        for i in 0..5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, true);
        }

        let mut flushed_count = 0;
        let result = pool.flush_all(|_pid, _data| {
            flushed_count += 1;
            Ok(())
        });

        assert_eq!(result.unwrap(), 5);
        assert_eq!(flushed_count, 5);
        assert_eq!(pool.stats().dirty_frames, 0);
    }

    #[test]
    fn test_buffer_pool_read_guard() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        {
            let guard = pool.read_page(page_id).unwrap();
            assert_eq!(guard.page_id(), page_id);
        }

        // After the guard dropped the page holds no pins; fetch adds one
        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_buffer_pool_write_guard() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        {
            let guard = pool.write_page(page_id).unwrap();
            guard.set_dirty();
            {
                let mut data = guard.data_mut();
                data[0] = 0xFF;
            }
        }

        let frame = pool.fetch_page(page_id).unwrap();
        assert!(frame.is_dirty());
        assert_eq!(frame.read_data()[0], 0xFF);
    }

    #[test]
    fn test_buffer_pool_stats() {
        let pool = create_test_pool(10);

        for i in 0..5 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true); // dirty
            }
            // Odd pages remain pinned
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 2); // pages 1, 3
        assert_eq!(stats.dirty_frames, 3); // pages 0, 2, 4
    }

    #[test]
    fn test_buffer_pool_hit_rate_accounting() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        // Miss, then load, then two hits
        assert!(pool.fetch_page(page_id).is_none());
        pool.load_page(page_id, &[0u8; PAGE_SIZE]).unwrap();
        pool.unpin_page(page_id, false);

        pool.fetch_page(page_id).unwrap();
        pool.unpin_page(page_id, false);
        pool.fetch_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let stats = pool.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 2);
        let expected = 2.0 / 3.0;
        assert!((stats.hit_rate() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_pool_hit_rate_empty() {
        let pool = create_test_pool(10);
        assert_eq!(pool.stats().hit_rate(), 0.0);
    }

    #[test]
    fn test_buffer_pool_duplicate_new_page() {
        let pool = create_test_pool(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let (frame, evicted) = pool.new_page(page_id).unwrap();

        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert_eq!(pool.page_count(), 1);
    }
}
