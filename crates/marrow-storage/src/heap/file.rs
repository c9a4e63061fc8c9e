//! Heap file management.
//!
//! File layout: page 0 is the file header (magic + page count), data
//! pages start at 1. All page access goes through a per-file buffer
//! pool; dirty pages reach disk on eviction and at flush points.

use crate::disk::DiskManager;
use crate::freespace::FreeSpaceMap;
use crate::heap::page::HeapPage;
use crate::tuple::Rid;
use bytes::Bytes;
use marrow_buffer::{BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage};
use marrow_common::config::StorageConfig;
use marrow_common::page::{PageId, HEAP_MAGIC, PAGE_SIZE};
use marrow_common::{MarrowError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Heap files use a single-file pool, so the file component is constant.
const FILE_ID: u32 = 0;

/// Statistics returned by [`HeapFile::vacuum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumStats {
    /// Total pages (including the header page) before vacuum.
    pub pages_before: u32,
    /// Total pages after vacuum.
    pub pages_after: u32,
    /// Number of tombstoned tuples whose storage was reclaimed.
    pub tuples_reclaimed: u64,
}

/// A heap file: unordered tuple storage for one table.
///
/// Deletes are tombstones; storage comes back via [`HeapFile::vacuum`],
/// which rewrites all pages and therefore invalidates every rid handed
/// out before it ran. Callers that maintain indexes rebuild them after
/// a vacuum.
#[derive(Debug)]
pub struct HeapFile {
    table_name: String,
    disk: DiskManager,
    pool: BufferPool,
    fsm: Mutex<FreeSpaceMap>,
    /// Total page count including the header page.
    num_pages: AtomicU32,
    /// Page of the most recent successful insert, 0 if none yet.
    last_insert_page: AtomicU32,
    max_tuple_size: usize,
}

impl HeapFile {
    /// Creates a new heap file for a table, truncating any existing one.
    pub fn create(config: &StorageConfig, table_name: &str) -> Result<Self> {
        let path = config.data_dir.join(format!("{}.dat", table_name));
        let disk = DiskManager::create(&path, config.fsync_enabled)?;

        let heap = Self {
            table_name: table_name.to_string(),
            disk,
            pool: BufferPool::new(BufferPoolConfig {
                num_frames: config.buffer_pool_pages,
            }),
            fsm: Mutex::new(FreeSpaceMap::new()),
            num_pages: AtomicU32::new(1),
            last_insert_page: AtomicU32::new(0),
            max_tuple_size: config.max_tuple_size,
        };
        heap.write_header_to_disk()?;
        heap.disk.sync()?;
        Ok(heap)
    }

    /// Opens an existing heap file, validating the header and rebuilding
    /// the free space map from a full scan.
    pub fn open(config: &StorageConfig, table_name: &str) -> Result<Self> {
        let path = config.data_dir.join(format!("{}.dat", table_name));
        let disk = DiskManager::open(&path, config.fsync_enabled)?;
        let file_name = format!("{}.dat", table_name);

        let mut header = [0u8; PAGE_SIZE];
        disk.read_page(0, &mut header).map_err(|_| MarrowError::Corrupted {
            file: file_name.clone(),
            reason: "missing header page".to_string(),
        })?;

        if header[0..4] != HEAP_MAGIC {
            return Err(MarrowError::Corrupted {
                file: file_name,
                reason: "bad magic".to_string(),
            });
        }

        let num_pages = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if num_pages == 0 || num_pages != disk.num_pages()? {
            return Err(MarrowError::Corrupted {
                file: file_name,
                reason: format!(
                    "header page count {} does not match file size",
                    num_pages
                ),
            });
        }

        let mut fsm = FreeSpaceMap::new();
        let mut buf = [0u8; PAGE_SIZE];
        for page_num in 1..num_pages {
            disk.read_page(page_num, &mut buf)?;
            let page = HeapPage::from_bytes(page_num, &buf)?;
            fsm.update(page_num, page.free_space() + page.dead_space());
        }

        Ok(Self {
            table_name: table_name.to_string(),
            disk,
            pool: BufferPool::new(BufferPoolConfig {
                num_frames: config.buffer_pool_pages,
            }),
            fsm: Mutex::new(fsm),
            num_pages: AtomicU32::new(num_pages),
            last_insert_page: AtomicU32::new(0),
            max_tuple_size: config.max_tuple_size,
        })
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Total page count, including the header page.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Returns buffer pool statistics for this file.
    pub fn pool_stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }

    fn write_back(&self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(ev) = evicted {
            self.disk.write_page(ev.page_id.page_num, &ev.data[..])?;
        }
        Ok(())
    }

    /// Reads a page through the buffer pool, loading it on a miss.
    fn read_page(&self, page_num: u32) -> Result<HeapPage> {
        let page_id = PageId::new(FILE_ID, page_num);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            let page = HeapPage::from_bytes(page_num, &frame.read_data()[..]);
            self.pool.unpin_page(page_id, false);
            return page;
        }

        let mut buf = [0u8; PAGE_SIZE];
        self.disk.read_page(page_num, &mut buf)?;
        let page = HeapPage::from_bytes(page_num, &buf)?;
        let (_, evicted) = self.pool.load_page(page_id, &buf)?;
        self.write_back(evicted)?;
        self.pool.unpin_page(page_id, false);
        Ok(page)
    }

    /// Writes a page into the buffer pool, marking it dirty.
    fn write_page(&self, page_num: u32, page: &HeapPage) -> Result<()> {
        let page_id = PageId::new(FILE_ID, page_num);
        let (frame, evicted) = self.pool.new_page(page_id)?;
        frame.copy_from(page.as_bytes());
        self.write_back(evicted)?;
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    fn write_header_to_disk(&self) -> Result<()> {
        let mut header = [0u8; PAGE_SIZE];
        header[0..4].copy_from_slice(&HEAP_MAGIC);
        header[4..8].copy_from_slice(&self.num_pages().to_le_bytes());
        self.disk.write_page(0, &header)
    }

    /// Writes the header page through the pool. The header page is raw
    /// bytes, not a slotted page.
    fn write_header(&self) -> Result<()> {
        let mut buf = [0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(&HEAP_MAGIC);
        buf[4..8].copy_from_slice(&self.num_pages().to_le_bytes());

        let page_id = PageId::new(FILE_ID, 0);
        let (frame, evicted) = self.pool.new_page(page_id)?;
        frame.copy_from(&buf);
        self.write_back(evicted)?;
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Inserts a tuple, returning its rid.
    ///
    /// Placement is first fit via the free space map, which counts
    /// tombstoned storage as available: a candidate page whose
    /// contiguous region is too small is compacted in place and
    /// retried. A new page is appended when no existing page has room.
    pub fn insert_tuple(&self, tuple: &[u8]) -> Result<Rid> {
        let ceiling = self.max_tuple_size.min(HeapPage::capacity());
        if tuple.len() > ceiling {
            return Err(MarrowError::TupleTooLarge {
                size: tuple.len(),
                max: ceiling,
            });
        }

        let mut fsm = self.fsm.lock();
        loop {
            // Try the page of the last insert before a full first-fit scan
            let hint = self.last_insert_page.load(Ordering::Acquire);
            let candidate = if hint != 0
                && fsm.free_bytes(hint).is_some_and(|free| free >= tuple.len())
            {
                Some(hint)
            } else {
                fsm.find_page_with_space(tuple.len())
            };

            match candidate {
                Some(page_num) => {
                    let mut page = self.read_page(page_num)?;
                    match page.insert(tuple) {
                        Ok(slot) => {
                            self.write_page(page_num, &page)?;
                            fsm.update(page_num, page.free_space());
                            self.last_insert_page.store(page_num, Ordering::Release);
                            return Ok(Rid::new(page_num, slot));
                        }
                        Err(MarrowError::PageFull) if page.dead_count() > 0 => {
                            // Tombstoned storage blocks the contiguous
                            // region; reclaim it and retry in place
                            page.compact();
                            match page.insert(tuple) {
                                Ok(slot) => {
                                    self.write_page(page_num, &page)?;
                                    fsm.update(page_num, page.free_space());
                                    self.last_insert_page.store(page_num, Ordering::Release);
                                    return Ok(Rid::new(page_num, slot));
                                }
                                Err(MarrowError::PageFull) => {
                                    self.write_page(page_num, &page)?;
                                    fsm.update(page_num, page.free_space());
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        Err(MarrowError::PageFull) => {
                            // Stale map entry; correct it and retry
                            fsm.update(page_num, page.free_space());
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    // Fill the page before claiming a number, so a failed
                    // insert cannot leave a gap in the page count
                    let mut page = HeapPage::new();
                    let slot = page.insert(tuple)?;
                    let page_num = self.num_pages.fetch_add(1, Ordering::AcqRel);
                    self.write_page(page_num, &page)?;
                    self.write_header()?;
                    fsm.update(page_num, page.free_space());
                    self.last_insert_page.store(page_num, Ordering::Release);
                    return Ok(Rid::new(page_num, slot));
                }
            }
        }
    }

    /// Reads the tuple at a rid.
    pub fn read_tuple(&self, rid: Rid) -> Result<Bytes> {
        if rid.page_num == 0 || rid.page_num >= self.num_pages() {
            return Err(MarrowError::TupleNotFound {
                page_num: rid.page_num,
                slot: rid.slot,
            });
        }
        let page = self.read_page(rid.page_num)?;
        match page.get(rid.slot) {
            Some(bytes) => Ok(Bytes::copy_from_slice(bytes)),
            None => Err(MarrowError::TupleNotFound {
                page_num: rid.page_num,
                slot: rid.slot,
            }),
        }
    }

    /// Tombstones the tuple at a rid.
    ///
    /// Storage is reclaimed later by [`HeapFile::vacuum`].
    pub fn delete_tuple(&self, rid: Rid) -> Result<()> {
        if rid.page_num == 0 || rid.page_num >= self.num_pages() {
            return Err(MarrowError::TupleNotFound {
                page_num: rid.page_num,
                slot: rid.slot,
            });
        }
        let mut page = self.read_page(rid.page_num)?;
        if !page.tombstone(rid.slot) {
            return Err(MarrowError::TupleNotFound {
                page_num: rid.page_num,
                slot: rid.slot,
            });
        }
        self.write_page(rid.page_num, &page)?;
        // Tombstoned bytes count as available: inserts compact on demand
        self.fsm
            .lock()
            .update(rid.page_num, page.free_space() + page.dead_space());
        Ok(())
    }

    /// Returns a lazy scan over all live tuples in file order.
    pub fn scan_all(&self) -> ScanAll<'_> {
        ScanAll {
            heap: self,
            page_num: 1,
            current: None,
            slot: 0,
            done: false,
        }
    }

    /// Rewrites the file keeping only live tuples.
    ///
    /// Every rid handed out before the vacuum is invalid afterwards;
    /// callers rebuild any indexes over this table.
    pub fn vacuum(&self) -> Result<VacuumStats> {
        let mut fsm = self.fsm.lock();
        let pages_before = self.num_pages();

        let mut live: Vec<Vec<u8>> = Vec::new();
        let mut tuples_reclaimed = 0u64;
        for page_num in 1..pages_before {
            let page = self.read_page(page_num)?;
            tuples_reclaimed += page.dead_count() as u64;
            for (_, bytes) in page.iter_active() {
                live.push(bytes.to_vec());
            }
        }

        // Repack into fresh pages
        let mut pages: Vec<HeapPage> = Vec::new();
        for tuple in &live {
            let fits = pages
                .last_mut()
                .map(|p| p.insert(tuple).is_ok())
                .unwrap_or(false);
            if !fits {
                let mut page = HeapPage::new();
                page.insert(tuple)?;
                pages.push(page);
            }
        }

        // The pool may hold stale copies of rewritten pages
        for page_num in 0..pages_before {
            self.pool.delete_page(PageId::new(FILE_ID, page_num));
        }

        let pages_after = pages.len() as u32 + 1;
        self.num_pages.store(pages_after, Ordering::Release);
        self.write_header_to_disk()?;
        for (i, page) in pages.iter().enumerate() {
            self.disk.write_page(i as u32 + 1, page.as_bytes())?;
        }
        self.disk.truncate(pages_after)?;
        self.disk.sync()?;

        fsm.clear();
        for (i, page) in pages.iter().enumerate() {
            fsm.update(i as u32 + 1, page.free_space());
        }
        self.last_insert_page.store(0, Ordering::Release);

        Ok(VacuumStats {
            pages_before,
            pages_after,
            tuples_reclaimed,
        })
    }

    /// Flushes all dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.pool
            .flush_all(|page_id, data| self.disk.write_page(page_id.page_num, data))?;
        self.disk.sync()
    }
}

impl Drop for HeapFile {
    fn drop(&mut self) {
        // Best effort; an explicit flush reports errors
        let _ = self.flush();
    }
}

/// Lazy iterator over live tuples, yielding `(rid, bytes)`.
pub struct ScanAll<'a> {
    heap: &'a HeapFile,
    page_num: u32,
    current: Option<HeapPage>,
    slot: u16,
    done: bool,
}

impl Iterator for ScanAll<'_> {
    type Item = Result<(Rid, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.current.is_none() {
                if self.page_num >= self.heap.num_pages() {
                    self.done = true;
                    return None;
                }
                match self.heap.read_page(self.page_num) {
                    Ok(page) => {
                        self.current = Some(page);
                        self.slot = 0;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            let page = self.current.as_ref().unwrap();
            while self.slot < page.slot_count() {
                let slot = self.slot;
                self.slot += 1;
                if let Some(bytes) = page.get(slot) {
                    return Some(Ok((
                        Rid::new(self.page_num, slot),
                        Bytes::copy_from_slice(bytes),
                    )));
                }
            }

            self.current = None;
            self.page_num += 1;
        }
    }
}
