//! Buffer pool management for TephraDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - LRU-K eviction policy
//! - Pin counting and per-frame readers-writer latches
//! - RAII page guards for latched page access
//! - Dirty page tracking with write-back

mod frame;
mod guard;
mod pool;
mod replacer;
mod store;

pub use frame::{BufferFrame, FrameId};
pub use guard::{PageGuard, ReadPageGuard, WritePageGuard};
pub use pool::{BufferPoolManager, BufferPoolStats};
pub use replacer::{LruKReplacer, Replacer};
pub use store::{MemStore, PageStore};
