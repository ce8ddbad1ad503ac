//! Transaction and concurrency control for TephraDB.
//!
//! This crate provides:
//! - Transactions with strict 2PL state tracking and per-mode lock sets
//! - A multi-granularity lock manager (IS/IX/S/SIX/X tables, S/X rows)
//!   with FIFO queues, upgrade priority, and typed abort reasons
//! - A background deadlock detector over the waits-for graph

mod deadlock;
mod lock_manager;
mod transaction;

pub use deadlock::WaitsForGraph;
pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    IsolationLevel, LockSets, Transaction, TransactionManager, TransactionState,
};
