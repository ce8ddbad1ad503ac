//! RAII page guards.
//!
//! A guard is scoped ownership of a pinned frame. The read and write
//! variants additionally hold the frame's latch. Guards are move-only;
//! drop releases the latch first, then the pin, and runs exactly once,
//! so release is guaranteed on every exit path including panics.

use crate::frame::BufferFrame;
use crate::pool::BufferPoolManager;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};
use tephra_common::page::{PageId, PAGE_SIZE};

/// Guard holding only a pin on a page.
///
/// Upgrade into a [`ReadPageGuard`] or [`WritePageGuard`] to access the
/// page data.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    /// Cleared when the pin is handed off to an upgraded guard.
    active: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(bpm: &'a BufferPoolManager, frame: &'a BufferFrame, page_id: PageId) -> Self {
        Self {
            bpm,
            frame,
            page_id,
            active: true,
        }
    }

    /// Returns the guarded page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Acquires the shared frame latch, converting this into a read guard.
    pub fn upgrade_read(self) -> ReadPageGuard<'a> {
        let (bpm, frame, page_id) = (self.bpm, self.frame, self.page_id);
        std::mem::forget(self);
        let latch = frame.read_data();
        ReadPageGuard {
            bpm,
            frame,
            page_id,
            latch: Some(latch),
        }
    }

    /// Acquires the exclusive frame latch, converting this into a write guard.
    pub fn upgrade_write(self) -> WritePageGuard<'a> {
        let (bpm, frame, page_id) = (self.bpm, self.frame, self.page_id);
        std::mem::forget(self);
        let latch = frame.write_data();
        WritePageGuard {
            bpm,
            frame,
            page_id,
            latch: Some(latch),
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.bpm.unpin_page(self.page_id, self.frame.is_dirty());
        }
    }
}

/// Guard holding a pin and the shared frame latch.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    latch: Option<RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl ReadPageGuard<'_> {
    /// Returns the guarded page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        self.latch.as_deref().expect("read guard latch released")
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch released before the pin.
        drop(self.latch.take());
        self.bpm.unpin_page(self.page_id, false);
    }
}

/// Guard holding a pin and the exclusive frame latch.
///
/// The frame is marked dirty on the first mutable data access.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    latch: Option<RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>>,
}

impl WritePageGuard<'_> {
    /// Returns the guarded page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        self.latch.as_deref().expect("write guard latch released")
    }

    /// Returns mutable page data, marking the frame dirty.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.frame.set_dirty(true);
        self.latch.as_deref_mut().expect("write guard latch released")
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        // Latch released before the pin.
        drop(self.latch.take());
        self.bpm.unpin_page(self.page_id, self.frame.is_dirty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use std::sync::Arc;
    use tephra_common::config::BufferPoolConfig;

    fn create_test_pool() -> BufferPoolManager {
        BufferPoolManager::new(
            BufferPoolConfig {
                pool_size: 8,
                replacer_k: 2,
            },
            Arc::new(MemStore::new()),
        )
    }

    #[test]
    fn test_basic_guard_unpins_on_drop() {
        let pool = create_test_pool();
        let page_id = {
            let guard = pool.new_page_guarded().unwrap();
            guard.page_id()
        };
        // Guard dropped; pin released.
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_upgrade_read_keeps_single_pin() {
        let pool = create_test_pool();
        let page_id = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        {
            let basic = pool.fetch_page(page_id).unwrap();
            let read = basic.upgrade_read();
            assert_eq!(read.page_id(), page_id);
            let _ = read.data()[0];
        }
        // Exactly one pin released by the upgraded guard.
        assert!(!pool.unpin_page(page_id, false));
    }

    #[test]
    fn test_write_guard_marks_dirty() {
        let pool = create_test_pool();
        let page_id = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        {
            let mut guard = pool.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0] = 0x99;
        }
        let guard = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(guard.data()[0], 0x99);
    }

    #[test]
    fn test_read_guards_are_shared() {
        let pool = create_test_pool();
        let page_id = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        let g1 = pool.fetch_page_read(page_id).unwrap();
        let g2 = pool.fetch_page_read(page_id).unwrap();
        assert_eq!(g1.data()[0], g2.data()[0]);
    }

    #[test]
    fn test_write_guard_blocks_readers() {
        let pool = Arc::new(create_test_pool());
        let page_id = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        let mut wguard = pool.fetch_page_write(page_id).unwrap();
        wguard.data_mut()[0] = 1;

        let pool2 = pool.clone();
        let handle = std::thread::spawn(move || {
            let rguard = pool2.fetch_page_read(page_id).unwrap();
            rguard.data()[0]
        });

        // Give the reader a moment to block on the latch, then finish
        // the write.
        std::thread::sleep(std::time::Duration::from_millis(20));
        wguard.data_mut()[0] = 2;
        drop(wguard);

        assert_eq!(handle.join().unwrap(), 2);
    }

    #[test]
    fn test_guard_survives_move() {
        let pool = create_test_pool();
        let page_id = pool.new_page().unwrap();
        pool.unpin_page(page_id, false);

        let guard = pool.fetch_page_read(page_id).unwrap();
        let moved = guard;
        assert_eq!(moved.page_id(), page_id);
        drop(moved);
        assert!(!pool.unpin_page(page_id, false));
    }
}
