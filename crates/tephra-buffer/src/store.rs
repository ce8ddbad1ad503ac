//! Backing store abstraction for the buffer pool.

use parking_lot::Mutex;
use std::collections::HashMap;
use tephra_common::page::{PageId, PAGE_SIZE};
use tephra_common::Result;

/// Byte-addressable page store backing a buffer pool.
///
/// The disk manager implements this for file-backed storage; tests use
/// [`MemStore`]. Reading a page that was allocated but never written
/// yields a zeroed buffer.
pub trait PageStore: Send + Sync {
    /// Reads a page into the provided buffer.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes a page from the provided buffer.
    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Allocates a new page identifier.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns a page identifier to the store for reuse.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;
}

/// In-memory page store.
///
/// Keeps every page in a hash map. Useful for unit tests and for
/// workloads that fit in RAM.
pub struct MemStore {
    inner: Mutex<MemStoreInner>,
}

struct MemStoreInner {
    pages: HashMap<PageId, Box<[u8; PAGE_SIZE]>>,
    next_page_id: u32,
    free_ids: Vec<PageId>,
}

impl MemStore {
    /// Creates an empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemStoreInner {
                pages: HashMap::new(),
                next_page_id: 0,
                free_ids: Vec::new(),
            }),
        }
    }

    /// Returns the number of pages that have been written.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemStore {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let inner = self.inner.lock();
        match inner.pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(&data[..]),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pages.insert(page_id, Box::new(*data));
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
        inner.pages.remove(&page_id);
        inner.free_ids.push(page_id);
        Ok(())
    }
}
