//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::replacer::{LruKReplacer, Replacer};
use crate::store::PageStore;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;
use tephra_common::config::BufferPoolConfig;
use tephra_common::page::{PageId, PAGE_SIZE};
use tephra_common::{Result, TephraError};

/// State protected by the pool latch.
///
/// Invariant: every resident page is in exactly one of the page table or
/// the free list (a frame id in the free list holds no live page).
struct PoolInner {
    /// Page ID to frame ID mapping.
    page_table: HashMap<PageId, FrameId>,
    /// Frame IDs currently holding no live page.
    free_list: Vec<FrameId>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping under a single pool latch
/// - LRU-K replacement for eviction
/// - Pin counting for concurrent access
/// - Dirty page tracking with write-back through the page store
///
/// Latch order is pool latch, then replacer, then frame latch. Frame
/// latches are only taken after the pool latch is released, except for
/// the brief data copy during load and write-back.
pub struct BufferPoolManager {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page table and free list behind the pool latch.
    inner: Mutex<PoolInner>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// Backing page store.
    store: Arc<dyn PageStore>,
}

impl BufferPoolManager {
    /// Creates a new buffer pool over the given page store.
    pub fn new(config: BufferPoolConfig, store: Arc<dyn PageStore>) -> Self {
        let pool_size = config.pool_size;
        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list; pop from the back so frame 0
        // is handed out first.
        let free_list: Vec<_> = (0..pool_size).rev().map(|i| FrameId(i as u32)).collect();

        let replacer = LruKReplacer::new(pool_size, config.replacer_k);

        Self {
            config,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer,
            store,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 64 frames so small systems still get a useful cache.
    pub fn auto_sized(replacer_k: usize, store: Arc<dyn PageStore>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let pool_size = (target_bytes / PAGE_SIZE).max(64);

        Self::new(
            BufferPoolConfig {
                pool_size,
                replacer_k,
            },
            store,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the frame holding the given page, if resident. Test hook;
    /// page data must be reached through guards.
    pub(crate) fn frame_of(&self, page_id: PageId) -> Option<&BufferFrame> {
        let inner = self.inner.lock();
        let fid = inner.page_table.get(&page_id)?;
        Some(&self.frames[fid.0 as usize])
    }

    /// Acquires a frame for a new resident page, evicting if necessary.
    ///
    /// Called with the pool latch held. The returned frame is absent from
    /// the page table, the free list, and the replacer.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(fid) = inner.free_list.pop() {
            return Ok(fid);
        }

        let Some(victim) = self.replacer.evict() else {
            return Err(TephraError::BufferPoolFull);
        };
        let frame = &self.frames[victim.0 as usize];
        assert_eq!(
            frame.pin_count(),
            0,
            "replacer evicted pinned {}",
            victim
        );

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                if let Err(e) = self.store.write_page(old_page_id, &data) {
                    // Put the victim back so the dirty page is not lost.
                    drop(data);
                    warn!("write-back of {} failed during eviction: {}", old_page_id, e);
                    self.replacer.record_access(victim);
                    self.replacer.set_evictable(victim, true);
                    return Err(e);
                }
                frame.set_dirty(false);
            }
            inner.page_table.remove(&old_page_id);
        }

        Ok(victim)
    }

    /// Makes the given page resident and pinned, loading it from the
    /// store on a miss. Returns the frame with one new pin held.
    fn fetch_frame(&self, page_id: PageId) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        if let Some(&fid) = inner.page_table.get(&page_id) {
            let frame = &self.frames[fid.0 as usize];
            frame.pin();
            self.replacer.access_and_pin(fid);
            return Ok(frame);
        }

        let fid = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[fid.0 as usize];
        frame.reset();
        {
            let mut data = frame.write_data();
            if let Err(e) = self.store.read_page(page_id, &mut data) {
                drop(data);
                inner.free_list.push(fid);
                return Err(e);
            }
        }
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, fid);
        self.replacer.access_and_pin(fid);
        Ok(frame)
    }

    /// Allocates a new page and pins it into a frame.
    fn new_frame(&self) -> Result<(PageId, &BufferFrame)> {
        let mut inner = self.inner.lock();
        let fid = self.acquire_frame(&mut inner)?;
        let page_id = match self.store.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                inner.free_list.push(fid);
                return Err(e);
            }
        };

        let frame = &self.frames[fid.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        inner.page_table.insert(page_id, fid);
        self.replacer.access_and_pin(fid);
        Ok((page_id, frame))
    }

    /// Allocates a new page.
    ///
    /// The page is left pinned once; the caller must balance it with an
    /// `unpin_page`. Prefer `new_page_guarded` outside of tests.
    pub fn new_page(&self) -> Result<PageId> {
        self.new_frame().map(|(page_id, _)| page_id)
    }

    /// Allocates a new page and returns a pin-holding guard for it.
    pub fn new_page_guarded(&self) -> Result<PageGuard<'_>> {
        let (page_id, frame) = self.new_frame()?;
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Fetches a page and returns a pin-holding guard.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.fetch_frame(page_id)?;
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Fetches a page and returns a guard holding the shared frame latch.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<ReadPageGuard<'_>> {
        Ok(self.fetch_page(page_id)?.upgrade_read())
    }

    /// Fetches a page and returns a guard holding the exclusive frame latch.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<WritePageGuard<'_>> {
        Ok(self.fetch_page(page_id)?.upgrade_write())
    }

    /// Unpins a page, ORing the dirty flag into the frame.
    ///
    /// Returns false if the page is not resident or its pin count is
    /// already zero. When the pin count reaches zero the frame becomes
    /// evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock();
        let Some(&fid) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[fid.0 as usize];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            self.replacer.set_evictable(fid, true);
        }
        true
    }

    /// Writes a page back to the store unconditionally and clears its
    /// dirty flag. Residence and pins are unaffected.
    ///
    /// Returns Ok(false) if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let inner = self.inner.lock();
        let Some(&fid) = inner.page_table.get(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[fid.0 as usize];
        let data = frame.read_data();
        self.store.write_page(page_id, &data)?;
        drop(data);
        frame.set_dirty(false);
        Ok(true)
    }

    /// Flushes every resident page.
    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.inner.lock();
        for (&page_id, &fid) in &inner.page_table {
            let frame = &self.frames[fid.0 as usize];
            let data = frame.read_data();
            self.store.write_page(page_id, &data)?;
            drop(data);
            frame.set_dirty(false);
        }
        Ok(())
    }

    /// Deletes a page from the pool and releases its identifier.
    ///
    /// Returns Ok(true) if the page is gone (including the case where it
    /// was never resident), Ok(false) if it is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(&fid) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[fid.0 as usize];
        if frame.is_pinned() {
            return Ok(false);
        }
        inner.page_table.remove(&page_id);
        self.replacer.remove(fid);
        frame.reset();
        inner.free_list.push(fid);
        self.store.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for &fid in inner.page_table.values() {
            let frame = &self.frames[fid.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }
        BufferPoolStats {
            total_frames: self.config.pool_size,
            free_frames: inner.free_list.len(),
            used_frames: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
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
}
