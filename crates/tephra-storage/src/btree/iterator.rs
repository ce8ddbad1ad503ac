//! In-order iteration over B+Tree leaves.

use super::index::BPlusTree;
use super::key::IndexKey;
use super::page::{page_type, BTreePageType, HeaderPage, InternalPage, LeafPage};
use log::warn;
use std::marker::PhantomData;
use tephra_buffer::{BufferPoolManager, ReadPageGuard};
use tephra_common::types::RecordId;
use tephra_common::Result;

/// Iterator over (key, record id) pairs in key order.
///
/// Holds a read guard on the current leaf and an in-page slot index;
/// when a leaf is exhausted its guard is released before the next leaf
/// in the chain is latched.
pub struct TreeIterator<'a, K: IndexKey> {
    bpm: &'a BufferPoolManager,
    guard: Option<ReadPageGuard<'a>>,
    index: usize,
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> TreeIterator<'a, K> {
    fn end(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            guard: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Positions an iterator at the first entry of the tree.
    pub(crate) fn begin(tree: &'a BPlusTree<K>) -> Result<Self> {
        let bpm = tree.bpm();
        let header = bpm.fetch_page_read(tree.header_page_id())?;
        let root_id = HeaderPage::view(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(Self::end(bpm));
        }
        let mut guard = bpm.fetch_page_read(root_id)?;
        drop(header);
        loop {
            match page_type(guard.data()) {
                Some(BTreePageType::Leaf) => {
                    return Ok(Self {
                        bpm,
                        guard: Some(guard),
                        index: 0,
                        _marker: PhantomData,
                    });
                }
                Some(BTreePageType::Internal) => {
                    let child = InternalPage::<K, _>::view(guard.data()).child_at(0);
                    guard = bpm.fetch_page_read(child)?;
                }
                _ => return Ok(Self::end(bpm)),
            }
        }
    }

    /// Positions an iterator at the first entry with key >= `key`.
    pub(crate) fn begin_at(tree: &'a BPlusTree<K>, key: &K) -> Result<Self> {
        let bpm = tree.bpm();
        let header = bpm.fetch_page_read(tree.header_page_id())?;
        let root_id = HeaderPage::view(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(Self::end(bpm));
        }
        let mut guard = bpm.fetch_page_read(root_id)?;
        drop(header);
        loop {
            match page_type(guard.data()) {
                Some(BTreePageType::Leaf) => {
                    let index = {
                        let leaf = LeafPage::<K, _>::view(guard.data());
                        leaf.search(key).unwrap_or_else(|slot| slot)
                    };
                    return Ok(Self {
                        bpm,
                        guard: Some(guard),
                        index,
                        _marker: PhantomData,
                    });
                }
                Some(BTreePageType::Internal) => {
                    let child = {
                        let node = InternalPage::<K, _>::view(guard.data());
                        node.child_at(node.child_index(key))
                    };
                    guard = bpm.fetch_page_read(child)?;
                }
                _ => return Ok(Self::end(bpm)),
            }
        }
    }

    /// Returns true if the iterator is exhausted.
    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }
}

impl<K: IndexKey> Iterator for TreeIterator<'_, K> {
    type Item = (K, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = {
                let guard = self.guard.as_ref()?;
                let leaf = LeafPage::<K, _>::view(guard.data());
                if self.index < leaf.size() {
                    Ok((leaf.key_at(self.index), leaf.value_at(self.index)))
                } else {
                    Err(leaf.next_leaf())
                }
            };
            match step {
                Ok(item) => {
                    self.index += 1;
                    return Some(item);
                }
                Err(next_leaf) => {
                    // Release the exhausted leaf before latching its
                    // successor.
                    self.guard = None;
                    self.index = 0;
                    match next_leaf {
                        Some(pid) => match self.bpm.fetch_page_read(pid) {
                            Ok(guard) => self.guard = Some(guard),
                            Err(e) => {
                                warn!("iterator stopped: failed to fetch {}: {}", pid, e);
                                return None;
                            }
                        },
                        None => return None,
                    }
                }
            }
        }
    }
}
