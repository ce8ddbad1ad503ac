//! Error types for TephraDB.

use crate::types::{AbortReason, TxnId};
use thiserror::Error;

/// Result type alias using TephraError.
pub type Result<T> = std::result::Result<T, TephraError>;

/// Errors that can occur in TephraDB operations.
#[derive(Debug, Error)]
pub enum TephraError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: u32 },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    // B+ tree errors
    #[error("Key not found")]
    KeyNotFound,

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("B+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Transaction errors
    #[error("Transaction {txn_id} aborted: {reason}")]
    TransactionAborted { txn_id: TxnId, reason: AbortReason },

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TephraError {
    /// Returns the abort reason if this is a transaction abort error.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            TephraError::TransactionAborted { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}
