//! Clustered B+Tree index over buffer-pool pages.
//!
//! The tree is a map from fixed-width keys to record ids. A persistent
//! header page carries the current root page id; the root changes when
//! the tree grows a level or collapses one.
//!
//! Reads descend with shared latches, releasing each parent as soon as
//! the child is latched. Writes descend with exclusive latches and keep
//! an ancestor stack; once the leaf is reached, every ancestor above
//! the lowest one that can absorb the structural change is released.

use super::iterator::TreeIterator;
use super::key::IndexKey;
use super::page::{
    internal_capacity, leaf_capacity, page_type, BTreePageType, HeaderPage, InternalPage,
    LeafInsert, LeafPage,
};
use log::debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tephra_buffer::{BufferPoolManager, WritePageGuard};
use tephra_common::page::PageId;
use tephra_common::types::RecordId;
use tephra_common::{Result, TephraError};

/// One level of retained write-latch context during a write descent:
/// the latched internal node and the child slot the descent took.
type AncestorStack<'a> = Vec<(WritePageGuard<'a>, usize)>;

/// Clustered B+Tree keyed by a fixed-width key type.
pub struct BPlusTree<K: IndexKey> {
    /// Index name, for diagnostics.
    name: String,
    /// Page storing the root page id.
    header_page_id: PageId,
    /// Buffer pool all tree pages go through.
    bpm: Arc<BufferPoolManager>,
    /// Maximum entries in a leaf page.
    leaf_max_size: usize,
    /// Maximum children in an internal page.
    internal_max_size: usize,
    /// Phantom marker for the key type this tree is parameterized over.
    _key: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Creates a new tree, initializing the header page to an empty
    /// tree. The header page must already be allocated.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let tree = Self::open(name, header_page_id, bpm, leaf_max_size, internal_max_size)?;
        {
            let mut header = tree.bpm.fetch_page_write(header_page_id)?;
            HeaderPage::init(header.data_mut());
        }
        Ok(tree)
    }

    /// Opens an existing tree without resetting the header page.
    pub fn open(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        assert!(leaf_max_size >= 2, "leaf_max_size must be at least 2");
        assert!(
            internal_max_size >= 3,
            "internal_max_size must be at least 3"
        );
        if leaf_max_size > leaf_capacity::<K>() {
            return Err(TephraError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: leaf_max_size.to_string(),
            });
        }
        if internal_max_size > internal_capacity::<K>() {
            return Err(TephraError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: internal_max_size.to_string(),
            });
        }
        Ok(Self {
            name: name.into(),
            header_page_id,
            bpm,
            leaf_max_size,
            internal_max_size,
            _key: PhantomData,
        })
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the buffer pool this tree runs on.
    pub(crate) fn bpm(&self) -> &BufferPoolManager {
        &self.bpm
    }

    /// Returns the page id of the header page.
    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    /// Returns the current root page id (INVALID for an empty tree).
    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(HeaderPage::view(guard.data()).root_page_id())
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(!self.root_page_id()?.is_valid())
    }

    fn corrupted(&self, what: &str) -> TephraError {
        TephraError::TreeCorrupted(format!("{}: {}", self.name, what))
    }

    /// Point lookup with read-latch crabbing.
    pub fn get_value(&self, key: &K) -> Result<Option<RecordId>> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = HeaderPage::view(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(None);
        }
        // Child latched before the parent guard is released on each hop.
        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        loop {
            match page_type(guard.data()) {
                Some(BTreePageType::Leaf) => {
                    let leaf = LeafPage::<K, _>::view(guard.data());
                    return Ok(leaf.lookup(key));
                }
                Some(BTreePageType::Internal) => {
                    let child = {
                        let node = InternalPage::<K, _>::view(guard.data());
                        node.child_at(node.child_index(key))
                    };
                    guard = self.bpm.fetch_page_read(child)?;
                }
                _ => return Err(self.corrupted("unexpected page type during descent")),
            }
        }
    }

    /// Descends with exclusive latches, returning the latched leaf and
    /// the stack of latched ancestors with the child slot taken at each.
    fn descend_write(
        &self,
        root_id: PageId,
        key: &K,
    ) -> Result<(WritePageGuard<'_>, AncestorStack<'_>)> {
        let mut ctx: AncestorStack<'_> = Vec::new();
        let mut guard = self.bpm.fetch_page_write(root_id)?;
        loop {
            match page_type(guard.data()) {
                Some(BTreePageType::Leaf) => return Ok((guard, ctx)),
                Some(BTreePageType::Internal) => {
                    let (child_id, child_idx) = {
                        let node = InternalPage::<K, _>::view(guard.data());
                        let idx = node.child_index(key);
                        (node.child_at(idx), idx)
                    };
                    let child = self.bpm.fetch_page_write(child_id)?;
                    ctx.push((guard, child_idx));
                    guard = child;
                }
                _ => return Err(self.corrupted("unexpected page type during descent")),
            }
        }
    }

    /// Inserts a key/value pair. Returns false if the key already exists.
    pub fn insert(&self, key: &K, value: &RecordId) -> Result<bool> {
        let mut header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = HeaderPage::view(header_guard.data()).root_page_id();

        if !root_id.is_valid() {
            // Empty tree: the first leaf becomes the root.
            let mut root = self.bpm.new_page_guarded()?.upgrade_write();
            let root_id = root.page_id();
            let mut leaf = LeafPage::init(root.data_mut(), self.leaf_max_size);
            leaf.insert(key, value);
            HeaderPage::view(header_guard.data_mut()).set_root_page_id(root_id);
            return Ok(true);
        }

        let mut header_guard = Some(header_guard);
        let (mut leaf_guard, mut ctx) = self.descend_write(root_id, key)?;

        {
            let mut leaf = LeafPage::<K, _>::view(leaf_guard.data_mut());
            match leaf.insert(key, value) {
                LeafInsert::Inserted => return Ok(true),
                LeafInsert::Duplicate => return Ok(false),
                LeafInsert::Full => {}
            }
        }

        // The leaf splits. Every ancestor above the lowest non-full one
        // cannot be touched by the propagation; release those latches
        // (and the header latch if the root is among them).
        let lowest_safe = ctx.iter().rposition(|(g, _)| {
            InternalPage::<K, _>::view(g.data()).size() < self.internal_max_size
        });
        if let Some(j) = lowest_safe {
            header_guard = None;
            ctx.drain(0..j);
        }

        // Split the leaf around the incoming entry.
        let mut right_guard = self.bpm.new_page_guarded()?.upgrade_write();
        let right_id = right_guard.page_id();
        let split_key = {
            let mut left = LeafPage::<K, _>::view(leaf_guard.data_mut());
            let mut right = LeafPage::init(right_guard.data_mut(), self.leaf_max_size);
            let old_next = left.next_leaf();
            let split_key = left.split_with(&mut right, key, value);
            right.set_next_leaf(old_next);
            left.set_next_leaf(Some(right_id));
            split_key
        };
        let mut split_left_id = leaf_guard.page_id();
        drop(right_guard);
        drop(leaf_guard);

        // Walk up, inserting the promoted separator.
        let mut up_key = split_key;
        let mut new_child = right_id;
        loop {
            match ctx.pop() {
                Some((mut node_guard, child_idx)) => {
                    let insert_idx = child_idx + 1;
                    let inserted = {
                        let mut node = InternalPage::<K, _>::view(node_guard.data_mut());
                        node.insert_at(insert_idx, &up_key, new_child)
                    };
                    if inserted {
                        return Ok(true);
                    }

                    let mut right_guard = self.bpm.new_page_guarded()?.upgrade_write();
                    let right_id = right_guard.page_id();
                    let promoted = {
                        let mut left = InternalPage::<K, _>::view(node_guard.data_mut());
                        let mut right =
                            InternalPage::init(right_guard.data_mut(), self.internal_max_size);
                        left.split_with(&mut right, insert_idx, &up_key, new_child)
                    };
                    up_key = promoted;
                    new_child = right_id;
                    split_left_id = node_guard.page_id();
                }
                None => {
                    // The root itself split; grow the tree by one level.
                    let mut new_root = self.bpm.new_page_guarded()?.upgrade_write();
                    let new_root_id = new_root.page_id();
                    let mut node =
                        InternalPage::init(new_root.data_mut(), self.internal_max_size);
                    node.populate_as_root(split_left_id, &up_key, new_child);

                    let mut header = header_guard
                        .take()
                        .expect("header latch retained across root split");
                    HeaderPage::view(header.data_mut()).set_root_page_id(new_root_id);
                    debug!("{}: root split, new root {}", self.name, new_root_id);
                    return Ok(true);
                }
            }
        }
    }

    /// Removes a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        let header_guard = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = HeaderPage::view(header_guard.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut header_guard = Some(header_guard);
        let (mut leaf_guard, mut ctx) = self.descend_write(root_id, key)?;

        // The root is the leaf: no minimum applies; an emptied root
        // leaves the tree empty.
        if ctx.is_empty() {
            let size_after = {
                let mut leaf = LeafPage::<K, _>::view(leaf_guard.data_mut());
                if !leaf.remove(key) {
                    return Ok(());
                }
                leaf.size()
            };
            if size_after == 0 {
                let root_pid = leaf_guard.page_id();
                let mut header = header_guard.take().expect("header latch held");
                HeaderPage::view(header.data_mut()).set_root_page_id(PageId::INVALID);
                drop(leaf_guard);
                self.free_page(root_pid)?;
            }
            return Ok(());
        }

        let leaf_min = {
            let leaf = LeafPage::<K, _>::view(leaf_guard.data());
            leaf.min_size()
        };
        let underflow = {
            let mut leaf = LeafPage::<K, _>::view(leaf_guard.data_mut());
            if !leaf.remove(key) {
                return Ok(());
            }
            leaf.size() < leaf_min
        };
        if !underflow {
            return Ok(());
        }

        // Release ancestors above the lowest one that can lose a
        // separator without cascading: a non-root node above its
        // minimum, or the root while it keeps at least two children.
        let lowest_safe = ctx.iter().enumerate().rposition(|(i, (g, _))| {
            let node = InternalPage::<K, _>::view(g.data());
            if i == 0 {
                node.size() > 2
            } else {
                node.size() > node.min_size()
            }
        });
        if let Some(j) = lowest_safe {
            header_guard = None;
            ctx.drain(0..j);
        }

        // Rebalance the leaf against its siblings under the parent.
        let idx_del = {
            let (parent_guard, idx_cur) = {
                let last = ctx.last_mut().expect("leaf has a latched parent");
                (&mut last.0, last.1)
            };
            debug_assert_eq!(
                InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur),
                leaf_guard.page_id()
            );

            // Prefer borrowing from the left sibling.
            if idx_cur > 0 {
                let left_id =
                    InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur - 1);
                let mut left_guard = self.bpm.fetch_page_write(left_id)?;
                let left_size = LeafPage::<K, _>::view(left_guard.data()).size();
                if left_size > leaf_min {
                    let (mk, mv) = {
                        let left = LeafPage::<K, _>::view(left_guard.data());
                        (left.key_at(left_size - 1), left.value_at(left_size - 1))
                    };
                    LeafPage::<K, _>::view(left_guard.data_mut()).remove_at(left_size - 1);
                    LeafPage::<K, _>::view(leaf_guard.data_mut()).insert(&mk, &mv);
                    InternalPage::<K, _>::view(parent_guard.data_mut())
                        .set_key_at(idx_cur, &mk);
                    return Ok(());
                }

                // Left cannot spare; try the right sibling before merging.
                let parent_size = InternalPage::<K, _>::view(parent_guard.data()).size();
                if idx_cur + 1 < parent_size {
                    let right_id =
                        InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur + 1);
                    let mut right_guard = self.bpm.fetch_page_write(right_id)?;
                    let right_size = LeafPage::<K, _>::view(right_guard.data()).size();
                    if right_size > leaf_min {
                        let (mk, mv) = {
                            let right = LeafPage::<K, _>::view(right_guard.data());
                            (right.key_at(0), right.value_at(0))
                        };
                        LeafPage::<K, _>::view(right_guard.data_mut()).remove_at(0);
                        LeafPage::<K, _>::view(leaf_guard.data_mut()).insert(&mk, &mv);
                        let new_sep = LeafPage::<K, _>::view(right_guard.data()).key_at(0);
                        InternalPage::<K, _>::view(parent_guard.data_mut())
                            .set_key_at(idx_cur + 1, &new_sep);
                        return Ok(());
                    }
                }

                // Merge this leaf into the left sibling.
                {
                    let mut left = LeafPage::<K, _>::view(left_guard.data_mut());
                    let cur = LeafPage::<K, _>::view(leaf_guard.data());
                    left.merge_from(&cur);
                }
                let dead = leaf_guard.page_id();
                drop(leaf_guard);
                self.free_page(dead)?;
                idx_cur
            } else {
                // Leftmost child: work with the right sibling only.
                let right_id =
                    InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur + 1);
                let mut right_guard = self.bpm.fetch_page_write(right_id)?;
                let right_size = LeafPage::<K, _>::view(right_guard.data()).size();
                if right_size > leaf_min {
                    let (mk, mv) = {
                        let right = LeafPage::<K, _>::view(right_guard.data());
                        (right.key_at(0), right.value_at(0))
                    };
                    LeafPage::<K, _>::view(right_guard.data_mut()).remove_at(0);
                    LeafPage::<K, _>::view(leaf_guard.data_mut()).insert(&mk, &mv);
                    let new_sep = LeafPage::<K, _>::view(right_guard.data()).key_at(0);
                    InternalPage::<K, _>::view(parent_guard.data_mut())
                        .set_key_at(idx_cur + 1, &new_sep);
                    return Ok(());
                }

                // Merge the right sibling into this leaf.
                {
                    let mut cur = LeafPage::<K, _>::view(leaf_guard.data_mut());
                    let right = LeafPage::<K, _>::view(right_guard.data());
                    cur.merge_from(&right);
                }
                let dead = right_guard.page_id();
                drop(right_guard);
                self.free_page(dead)?;
                idx_cur + 1
            }
        };

        self.remove_separator(header_guard, ctx, idx_del)
    }

    /// Removes a separator from the lowest retained internal node and
    /// rebalances internal levels upward.
    fn remove_separator(
        &self,
        mut header_guard: Option<WritePageGuard<'_>>,
        mut ctx: AncestorStack<'_>,
        mut idx_del: usize,
    ) -> Result<()> {
        loop {
            let (mut node_guard, _) = ctx.pop().expect("separator has an owning node");
            // The stack bottom is either the true root or an ancestor
            // that cannot underflow (the release pass keeps nothing
            // above the lowest such node), so exhausting the stack with
            // a possible collapse implies the node is the root.
            let is_root = ctx.is_empty();

            let size_after = {
                let mut node = InternalPage::<K, _>::view(node_guard.data_mut());
                node.remove_at(idx_del);
                node.size()
            };

            if is_root {
                if size_after == 1 {
                    // The root has a single child left: collapse a level.
                    let new_root = InternalPage::<K, _>::view(node_guard.data()).child_at(0);
                    let mut header = header_guard
                        .take()
                        .expect("header latch retained across root collapse");
                    HeaderPage::view(header.data_mut()).set_root_page_id(new_root);
                    let dead = node_guard.page_id();
                    drop(node_guard);
                    self.free_page(dead)?;
                    debug!("{}: root collapsed into {}", self.name, new_root);
                }
                return Ok(());
            }

            let min = {
                let node = InternalPage::<K, _>::view(node_guard.data());
                node.min_size()
            };
            if size_after >= min {
                return Ok(());
            }

            // Underfull internal node: rebalance against a sibling.
            let (parent_guard, idx_cur) = {
                let last = ctx.last_mut().expect("non-root node has a latched parent");
                (&mut last.0, last.1)
            };
            debug_assert_eq!(
                InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur),
                node_guard.page_id()
            );

            if idx_cur > 0 {
                let left_id =
                    InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur - 1);
                let mut left_guard = self.bpm.fetch_page_write(left_id)?;
                let left_size = InternalPage::<K, _>::view(left_guard.data()).size();
                if left_size > min {
                    // Rotate through the parent: the left sibling's last
                    // child moves over; the old separator descends and
                    // the sibling's trailing key replaces it.
                    let (borrow_key, borrow_child) = {
                        let left = InternalPage::<K, _>::view(left_guard.data());
                        (left.key_at(left_size - 1), left.child_at(left_size - 1))
                    };
                    InternalPage::<K, _>::view(left_guard.data_mut()).remove_at(left_size - 1);
                    let sep = InternalPage::<K, _>::view(parent_guard.data()).key_at(idx_cur);
                    {
                        let mut node = InternalPage::<K, _>::view(node_guard.data_mut());
                        let mut entries = node.entries();
                        entries[0].0 = sep;
                        entries.insert(0, (K::default(), borrow_child));
                        node.set_entries(&entries);
                    }
                    InternalPage::<K, _>::view(parent_guard.data_mut())
                        .set_key_at(idx_cur, &borrow_key);
                    return Ok(());
                }

                let parent_size = InternalPage::<K, _>::view(parent_guard.data()).size();
                if idx_cur + 1 < parent_size {
                    let right_id =
                        InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur + 1);
                    let mut right_guard = self.bpm.fetch_page_write(right_id)?;
                    let right_size = InternalPage::<K, _>::view(right_guard.data()).size();
                    if right_size > min {
                        self.rotate_from_right_internal(
                            parent_guard,
                            &mut node_guard,
                            &mut right_guard,
                            idx_cur,
                        );
                        return Ok(());
                    }
                }

                // Merge into the left sibling.
                let sep = InternalPage::<K, _>::view(parent_guard.data()).key_at(idx_cur);
                {
                    let mut left = InternalPage::<K, _>::view(left_guard.data_mut());
                    let cur = InternalPage::<K, _>::view(node_guard.data());
                    left.merge_from(&sep, &cur);
                }
                let dead = node_guard.page_id();
                drop(node_guard);
                self.free_page(dead)?;
                idx_del = idx_cur;
            } else {
                let right_id =
                    InternalPage::<K, _>::view(parent_guard.data()).child_at(idx_cur + 1);
                let mut right_guard = self.bpm.fetch_page_write(right_id)?;
                let right_size = InternalPage::<K, _>::view(right_guard.data()).size();
                if right_size > min {
                    self.rotate_from_right_internal(
                        parent_guard,
                        &mut node_guard,
                        &mut right_guard,
                        idx_cur,
                    );
                    return Ok(());
                }

                // Merge the right sibling into this node.
                let sep = InternalPage::<K, _>::view(parent_guard.data()).key_at(idx_cur + 1);
                {
                    let mut cur = InternalPage::<K, _>::view(node_guard.data_mut());
                    let right = InternalPage::<K, _>::view(right_guard.data());
                    cur.merge_from(&sep, &right);
                }
                let dead = right_guard.page_id();
                drop(right_guard);
                self.free_page(dead)?;
                idx_del = idx_cur + 1;
            }
        }
    }

    /// Moves the right sibling's first child into `node`, rotating
    /// separators through the parent.
    fn rotate_from_right_internal(
        &self,
        parent_guard: &mut WritePageGuard<'_>,
        node_guard: &mut WritePageGuard<'_>,
        right_guard: &mut WritePageGuard<'_>,
        idx_cur: usize,
    ) {
        let sep = InternalPage::<K, _>::view(parent_guard.data()).key_at(idx_cur + 1);
        let moved_child = InternalPage::<K, _>::view(right_guard.data()).child_at(0);
        {
            let mut node = InternalPage::<K, _>::view(node_guard.data_mut());
            let size = node.size();
            let inserted = node.insert_at(size, &sep, moved_child);
            debug_assert!(inserted, "underfull node rejected a borrowed entry");
        }
        let new_sep = InternalPage::<K, _>::view(right_guard.data()).key_at(1);
        InternalPage::<K, _>::view(right_guard.data_mut()).remove_at(0);
        InternalPage::<K, _>::view(parent_guard.data_mut()).set_key_at(idx_cur + 1, &new_sep);
    }

    /// Drops a page that fell out of the tree.
    fn free_page(&self, page_id: PageId) -> Result<()> {
        let deleted = self.bpm.delete_page(page_id)?;
        if !deleted {
            return Err(self.corrupted(&format!("freed page {} still pinned", page_id)));
        }
        Ok(())
    }

    /// Iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<TreeIterator<'_, K>> {
        TreeIterator::begin(self)
    }

    /// Iterator starting at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K>> {
        TreeIterator::begin_at(self, key)
    }

    /// Walks the whole tree validating structural invariants. Returns
    /// the number of entries.
    ///
    /// Checks, for every non-root page, min_size <= size <= max_size;
    /// keys strictly increasing within pages; subtree key ranges nested
    /// within separator bounds; and the leaf chain visiting every leaf
    /// exactly once in key order.
    pub fn check_integrity(&self) -> Result<usize> {
        let root_id = self.root_page_id()?;
        if !root_id.is_valid() {
            return Ok(0);
        }
        let mut leaves = Vec::new();
        let count = self.check_subtree(root_id, true, None, None, &mut leaves)?;

        // The chain from the leftmost leaf must visit the collected
        // leaves in order.
        let mut chain = Vec::new();
        let mut cursor = Some(leaves[0]);
        while let Some(pid) = cursor {
            chain.push(pid);
            let guard = self.bpm.fetch_page_read(pid)?;
            cursor = LeafPage::<K, _>::view(guard.data()).next_leaf();
        }
        if chain != leaves {
            return Err(self.corrupted("leaf chain does not match tree order"));
        }
        Ok(count)
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        is_root: bool,
        lower: Option<K>,
        upper: Option<K>,
        leaves: &mut Vec<PageId>,
    ) -> Result<usize> {
        let guard = self.bpm.fetch_page_read(page_id)?;
        match page_type(guard.data()) {
            Some(BTreePageType::Leaf) => {
                let leaf = LeafPage::<K, _>::view(guard.data());
                if !is_root && leaf.size() < leaf.min_size() {
                    return Err(self.corrupted(&format!("leaf {} underfull", page_id)));
                }
                if leaf.size() > leaf.max_size() {
                    return Err(self.corrupted(&format!("leaf {} overfull", page_id)));
                }
                for i in 0..leaf.size() {
                    let k = leaf.key_at(i);
                    if i > 0 && leaf.key_at(i - 1) >= k {
                        return Err(self.corrupted(&format!("leaf {} keys out of order", page_id)));
                    }
                    if lower.map_or(false, |lo| k < lo) || upper.map_or(false, |hi| k >= hi) {
                        return Err(
                            self.corrupted(&format!("leaf {} key outside bounds", page_id))
                        );
                    }
                }
                leaves.push(page_id);
                Ok(leaf.size())
            }
            Some(BTreePageType::Internal) => {
                let (size, min, max) = {
                    let node = InternalPage::<K, _>::view(guard.data());
                    (node.size(), node.min_size(), node.max_size())
                };
                if !is_root && size < min {
                    return Err(self.corrupted(&format!("internal {} underfull", page_id)));
                }
                if is_root && size < 2 {
                    return Err(self.corrupted(&format!("root {} has fewer than 2 children", page_id)));
                }
                if size > max {
                    return Err(self.corrupted(&format!("internal {} overfull", page_id)));
                }
                let mut count = 0;
                for i in 0..size {
                    let (child, child_lower, child_upper) = {
                        let node = InternalPage::<K, _>::view(guard.data());
                        let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                        let child_upper = if i + 1 < size {
                            Some(node.key_at(i + 1))
                        } else {
                            upper
                        };
                        if i >= 2 && node.key_at(i - 1) >= node.key_at(i) {
                            return Err(
                                self.corrupted(&format!("internal {} keys out of order", page_id))
                            );
                        }
                        (node.child_at(i), child_lower, child_upper)
                    };
                    count += self.check_subtree(child, false, child_lower, child_upper, leaves)?;
                }
                Ok(count)
            }
            _ => Err(self.corrupted(&format!("page {} has no tree tag", page_id))),
        }
    }
}
