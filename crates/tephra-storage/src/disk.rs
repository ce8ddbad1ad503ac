//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tephra_buffer::PageStore;
use tephra_common::page::{PageId, PAGE_SIZE};
use tephra_common::{Result, TephraError};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Path to the database file.
    pub db_path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./tephra.db"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages to a single database file.
///
/// Page ids are allocated monotonically; deallocated ids go to a free
/// list and are handed out again before the high-water mark advances.
/// Reading an allocated page that was never written yields zeroes.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// File handle and allocation state.
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    /// The database file.
    file: File,
    /// Number of pages the file has room for.
    num_pages: u32,
    /// Next page id to hand out.
    next_page_id: u32,
    /// Page ids returned by deallocation, available for reuse.
    free_ids: Vec<PageId>,
}

impl DiskManager {
    /// Creates a new disk manager, opening or creating the database file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.db_path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                next_page_id: num_pages,
                free_ids: Vec::new(),
            }),
        })
    }

    /// Opens a disk manager on the given path with fsync enabled.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::new(DiskManagerConfig {
            db_path: db_path.as_ref().to_path_buf(),
            fsync_enabled: true,
        })
    }

    /// Returns the database file path.
    pub fn db_path(&self) -> &Path {
        &self.config.db_path
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_all()?;
        Ok(())
    }
}

impl PageStore for DiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(TephraError::IoError("read of invalid page id".to_string()));
        }
        let mut inner = self.inner.lock();

        // Allocated but never written: the page reads as zeroes.
        if page_id.0 >= inner.num_pages {
            buf.fill(0);
            return Ok(());
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(TephraError::IoError("write of invalid page id".to_string()));
        }
        let mut inner = self.inner.lock();

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }

        if page_id.0 >= inner.num_pages {
            inner.num_pages = page_id.0 + 1;
        }
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        if let Some(page_id) = inner.free_ids.pop() {
            return Ok(page_id);
        }
        let page_id = PageId(inner.next_page_id);
        inner.next_page_id += 1;
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.free_ids.push(page_id);
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        let _ = inner.file.sync_all();
    }
}
