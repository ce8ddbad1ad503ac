//! Shared identifier types for TephraDB.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// Unique identifier for a row within the database.
///
/// Combines a PageId with a slot number to identify where a row is
/// stored. B+Tree indexes map keys to RecordIds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Page containing this row.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u16,
}

impl RecordId {
    /// Size of a RecordId when packed on a page (page_id:4 + slot:2 + pad:2).
    pub const ENCODED_LEN: usize = 8;

    /// Creates a new record ID.
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }

    /// Invalid record ID.
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot: u16::MAX,
    };

    /// Returns true if this is a valid record ID.
    pub fn is_valid(&self) -> bool {
        self.page_id.is_valid()
    }

    /// Packs the record ID into a fixed 8-byte buffer.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot.to_le_bytes());
        buf[6..8].fill(0);
    }

    /// Unpacks a record ID from a fixed 8-byte buffer.
    pub fn decode_from(buf: &[u8]) -> Self {
        let page_id = PageId(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]));
        let slot = u16::from_le_bytes([buf[4], buf[5]]);
        Self { page_id, slot }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

/// Object identifier for a table, used as the coarse lock granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableOid(pub u32);

impl std::fmt::Display for TableOid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Monotonic transaction identifier.
///
/// Ordering on TxnId defines transaction age: a larger id is a younger
/// transaction, which is what the deadlock detector aborts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Reason a transaction was transitioned to the aborted state by the
/// lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Lock requested while the transaction was shrinking.
    LockOnShrinking,
    /// Shared-flavored lock requested under read-uncommitted.
    LockSharedOnReadUncommitted,
    /// Lock requested after the transaction committed or aborted.
    LockOnAnotherPhase,
    /// Another transaction is already upgrading its lock on the resource.
    UpgradeConflict,
    /// The requested upgrade transition is not allowed.
    IncompatibleUpgrade,
    /// Intention lock requested at row granularity.
    AttemptedIntentionLockOnRow,
    /// Row lock requested without the required table lock.
    TableLockNotPresent,
    /// Table unlocked while row locks on it were still held.
    TableUnlockedBeforeUnlockingRows,
    /// Unlock of a resource the transaction does not hold.
    AttemptedUnlockButNoLockHeld,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read-uncommitted"
            }
            AbortReason::LockOnAnotherPhase => "lock requested after commit or abort",
            AbortReason::UpgradeConflict => "concurrent lock upgrade on the same resource",
            AbortReason::IncompatibleUpgrade => "incompatible lock upgrade",
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "row lock without a table lock",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked before its row locks"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a held lock",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_new() {
        let rid = RecordId::new(PageId(3), 7);
        assert_eq!(rid.page_id, PageId(3));
        assert_eq!(rid.slot, 7);
        assert!(rid.is_valid());
    }

    #[test]
    fn test_record_id_invalid() {
        assert!(!RecordId::INVALID.is_valid());
    }

    #[test]
    fn test_record_id_encode_decode() {
        let rid = RecordId::new(PageId(123_456), 42);
        let mut buf = [0u8; RecordId::ENCODED_LEN];
        rid.encode_into(&mut buf);
        assert_eq!(RecordId::decode_from(&buf), rid);
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(PageId(5), 2);
        assert_eq!(rid.to_string(), "page:5:2");
    }

    #[test]
    fn test_txn_id_ordering() {
        // Larger id means younger transaction.
        assert!(TxnId(10) > TxnId(3));
    }

    #[test]
    fn test_abort_reason_display() {
        assert_eq!(
            AbortReason::UpgradeConflict.to_string(),
            "concurrent lock upgrade on the same resource"
        );
        assert_eq!(
            AbortReason::LockOnShrinking.to_string(),
            "lock requested while shrinking"
        );
    }

    #[test]
    fn test_table_oid_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(TableOid(1));
        set.insert(TableOid(1));
        set.insert(TableOid(2));
        assert_eq!(set.len(), 2);
    }
}
