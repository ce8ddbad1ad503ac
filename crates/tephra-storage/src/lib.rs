//! Storage engine for TephraDB.
//!
//! This crate provides:
//! - Disk manager for page-level file I/O
//! - Clustered B+Tree index over buffer-pool pages

mod btree;
mod disk;

pub use btree::{
    internal_capacity, leaf_capacity, BPlusTree, BTreePageType, HeaderPage, IndexKey,
    InternalPage, LeafInsert, LeafPage, TreeIterator,
};
pub use disk::{DiskManager, DiskManagerConfig};
