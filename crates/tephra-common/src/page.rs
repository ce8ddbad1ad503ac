//! Page identifiers and constants for TephraDB storage.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4 * 1024;

/// Unique identifier for a page in the database file.
///
/// Page ids are handed out monotonically by the disk manager. The
/// all-ones value is reserved as the invalid sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Invalid page ID.
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Returns true if this is a valid page ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Returns the page id as a u32 for on-page storage.
    #[inline]
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
