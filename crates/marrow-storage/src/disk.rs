//! Page-granular disk I/O for heap files.

use marrow_common::page::PAGE_SIZE;
use marrow_common::{MarrowError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Manages page-granular reads and writes against a single file.
///
/// All offsets are multiples of PAGE_SIZE. Writes go straight to the OS;
/// when `fsync_enabled` is set, [`DiskManager::sync`] flushes them to
/// stable storage (callers decide when, typically at flush points).
pub struct DiskManager {
    path: PathBuf,
    file: Mutex<File>,
    fsync_enabled: bool,
}

impl DiskManager {
    /// Creates a new file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            fsync_enabled,
        })
    }

    /// Opens an existing file.
    pub fn open(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            fsync_enabled,
        })
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of whole pages in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    /// Reads a page into the provided buffer.
    ///
    /// The buffer must be exactly PAGE_SIZE bytes. Reading past the end of
    /// the file is a [`MarrowError::PageNotFound`].
    pub fn read_page(&self, page_num: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let offset = page_num as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();

        let len = file.metadata()?.len();
        if offset + PAGE_SIZE as u64 > len {
            return Err(MarrowError::PageNotFound {
                page_id: page_num as u64,
            });
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page at the given page number, extending the file if needed.
    pub fn write_page(&self, page_num: u32, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        let offset = page_num as u64 * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Truncates the file to the given page count.
    pub fn truncate(&self, num_pages: u32) -> Result<()> {
        let file = self.file.lock();
        file.set_len(num_pages as u64 * PAGE_SIZE as u64)?;
        Ok(())
    }

    /// Flushes OS buffers to stable storage if fsync is enabled.
    pub fn sync(&self) -> Result<()> {
        if self.fsync_enabled {
            let file = self.file.lock();
            file.sync_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("path", &self.path)
            .field("fsync_enabled", &self.fsync_enabled)
            .finish()
    }
}
