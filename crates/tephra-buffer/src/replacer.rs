//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unpinned) or not.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Combined operation: records access and pins the frame (sets non-evictable).
    /// Single lock acquisition instead of two separate calls.
    fn access_and_pin(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction and removes it from tracking.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Removes a frame from the replacer.
    ///
    /// Panics if the frame is tracked but not evictable.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Per-frame replacement state.
struct LruKNode {
    /// Timestamps of the most recent accesses, oldest first, bounded to k.
    history: VecDeque<u64>,
    /// Timestamp of the very first access, used to order frames that have
    /// not yet accumulated k accesses.
    first_access: u64,
    /// Whether this frame may be chosen as a victim.
    evictable: bool,
}

struct LruKInner {
    /// Global logical clock, bumped on every recorded access.
    current_timestamp: u64,
    /// Tracked frames.
    nodes: HashMap<FrameId, LruKNode>,
    /// Number of tracked frames currently evictable.
    evictable_count: usize,
}

/// LRU-K replacement algorithm.
///
/// Frames with fewer than k recorded accesses are preferred victims,
/// ordered by their earliest access. Frames with k or more accesses are
/// ordered by backward k-distance: the frame whose k-th most recent
/// access is oldest goes first.
pub struct LruKReplacer {
    /// Maximum number of frames this replacer may track.
    num_frames: usize,
    /// The K in LRU-K.
    k: usize,
    /// All state behind a single mutex.
    inner: Mutex<LruKInner>,
}

impl LruKReplacer {
    /// Creates a new LRU-K replacer.
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        Self {
            num_frames,
            k,
            inner: Mutex::new(LruKInner {
                current_timestamp: 0,
                nodes: HashMap::with_capacity(num_frames),
                evictable_count: 0,
            }),
        }
    }

    /// Returns the total tracking capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }

    /// Returns the K parameter.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Picks the victim among evictable frames without removing it.
    fn pick_victim(inner: &LruKInner, k: usize) -> Option<FrameId> {
        // First pass: frames with fewer than k accesses, earliest first
        // access wins.
        let mut victim: Option<(FrameId, u64)> = None;
        for (&fid, node) in &inner.nodes {
            if !node.evictable || node.history.len() >= k {
                continue;
            }
            match victim {
                Some((_, ts)) if node.first_access >= ts => {}
                _ => victim = Some((fid, node.first_access)),
            }
        }
        if let Some((fid, _)) = victim {
            return Some(fid);
        }

        // Second pass: frames with k accesses, oldest k-th-last access
        // (largest backward k-distance) wins.
        for (&fid, node) in &inner.nodes {
            if !node.evictable {
                continue;
            }
            let kth_recent = *node.history.front().expect("tracked frame has accesses");
            match victim {
                Some((_, ts)) if kth_recent >= ts => {}
                _ => victim = Some((fid, kth_recent)),
            }
        }
        victim.map(|(fid, _)| fid)
    }
}

impl Replacer for LruKReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;
        let k = self.k;

        match inner.nodes.get_mut(&frame_id) {
            Some(node) => {
                node.history.push_back(now);
                if node.history.len() > k {
                    node.history.pop_front();
                }
            }
            None => {
                assert!(
                    inner.nodes.len() < self.num_frames,
                    "replacer tracking more frames than capacity {}",
                    self.num_frames
                );
                let mut history = VecDeque::with_capacity(k);
                history.push_back(now);
                inner.nodes.insert(
                    frame_id,
                    LruKNode {
                        history,
                        first_access: now,
                        evictable: false,
                    },
                );
            }
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.nodes.get_mut(&frame_id) else {
            return;
        };
        if node.evictable == evictable {
            return;
        }
        node.evictable = evictable;
        if evictable {
            inner.evictable_count += 1;
        } else {
            inner.evictable_count -= 1;
        }
    }

    fn access_and_pin(&self, frame_id: FrameId) {
        self.record_access(frame_id);
        self.set_evictable(frame_id, false);
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.evictable_count == 0 {
            return None;
        }
        let victim = Self::pick_victim(&inner, self.k)?;
        inner.nodes.remove(&victim);
        inner.evictable_count -= 1;
        Some(victim)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let Some(node) = inner.nodes.get(&frame_id) else {
            return;
        };
        assert!(
            node.evictable,
            "removing non-evictable {} from replacer",
            frame_id
        );
        inner.nodes.remove(&frame_id);
        inner.evictable_count -= 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_new() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.k(), 2);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_evict_empty() {
        let replacer = LruKReplacer::new(10, 2);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_k_set_evictable() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
        assert_eq!(replacer.size(), 0);

        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);
        replacer.set_evictable(FrameId(2), true);
        assert_eq!(replacer.size(), 3);

        replacer.set_evictable(FrameId(1), false);
        assert_eq!(replacer.size(), 2);

        // Toggling to the same value changes nothing.
        replacer.set_evictable(FrameId(1), false);
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_lru_k_evicts_earliest_first_access() {
        let replacer = LruKReplacer::new(10, 2);

        // All frames have a single access (< k); victim is the one
        // touched first.
        replacer.record_access(FrameId(3));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
        for fid in [1, 2, 3] {
            replacer.set_evictable(FrameId(fid), true);
        }

        assert_eq!(replacer.evict(), Some(FrameId(3)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_k_prefers_history_over_cache() {
        let replacer = LruKReplacer::new(10, 2);

        // Frame 0 reaches k accesses, frame 1 does not.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);

        // Even though frame 0 was touched first, frame 1 has fewer than
        // k accesses and is preferred.
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_lru_k_backward_k_distance() {
        let replacer = LruKReplacer::new(10, 2);

        // ts: f0 @ 1,2 ; f1 @ 3,4 ; then f0 touched again @ 5.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);

        // Histories are bounded to k=2: f0 holds [2,5], f1 holds [3,4].
        // f0's k-th-last access (2) is older than f1's (3), so f0 is the
        // victim despite being touched most recently.
        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_lru_k_evicted_frame_forgotten() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.evict(), Some(FrameId(0)));

        // Re-registering starts a fresh history.
        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_lru_k_remove() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);
        assert_eq!(replacer.size(), 2);

        replacer.remove(FrameId(0));
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(FrameId(1)));
    }

    #[test]
    fn test_lru_k_remove_untracked_is_noop() {
        let replacer = LruKReplacer::new(10, 2);
        replacer.remove(FrameId(99));
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    #[should_panic(expected = "removing non-evictable")]
    fn test_lru_k_remove_pinned_panics() {
        let replacer = LruKReplacer::new(10, 2);
        replacer.record_access(FrameId(0));
        replacer.remove(FrameId(0));
    }

    #[test]
    fn test_lru_k_access_and_pin() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.access_and_pin(FrameId(0));
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());
    }

    #[test]
    #[should_panic(expected = "tracking more frames than capacity")]
    fn test_lru_k_capacity_overflow_panics() {
        let replacer = LruKReplacer::new(2, 2);
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
    }

    #[test]
    fn test_lru_k_k_equals_one() {
        let replacer = LruKReplacer::new(10, 1);

        // With k=1 every tracked frame is in the cache tier; eviction
        // degenerates to plain LRU on the last access.
        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(0));
        replacer.set_evictable(FrameId(0), true);
        replacer.set_evictable(FrameId(1), true);

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }
}
