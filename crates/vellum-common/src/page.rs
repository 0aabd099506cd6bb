//! Page and record identifiers for VellumDB storage.

use serde::{Deserialize, Serialize};

/// Fixed page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Transaction identifier. Allocated monotonically from 0.
pub type TxnId = i64;

/// Sentinel for "no transaction".
pub const INVALID_TXN_ID: TxnId = -1;

/// Unique identifier for a page within the data file.
///
/// Page ids are non-negative; -1 is reserved as "invalid". Page 0 holds
/// the catalog metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Invalid page id.
    pub const INVALID: PageId = PageId(-1);

    /// The catalog page.
    pub const CATALOG: PageId = PageId(0);

    /// Creates a new page id.
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns true if this is a valid (non-negative) page id.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    /// Byte offset of this page in the data file.
    pub fn file_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Stable identifier of a heap record: (page, slot).
///
/// A record keeps its id for its lifetime; an update that no longer fits
/// in place relocates the record and yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot_id: u16,
}

impl RecordId {
    /// Invalid record id.
    pub const INVALID: RecordId = RecordId {
        page_id: PageId::INVALID,
        slot_id: 0,
    };

    /// Creates a new record id.
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }

    /// Returns true if this record id points at a valid page.
    pub fn is_valid(&self) -> bool {
        self.page_id.is_valid()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.slot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId::new(0).is_valid());
        assert!(PageId::new(17).is_valid());
        assert!(!PageId::INVALID.is_valid());
        assert!(!PageId::new(-1).is_valid());
    }

    #[test]
    fn test_page_id_file_offset() {
        assert_eq!(PageId::new(0).file_offset(), 0);
        assert_eq!(PageId::new(1).file_offset(), 4096);
        assert_eq!(PageId::new(10).file_offset(), 40960);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId::new(5).to_string(), "page:5");
        assert_eq!(PageId::INVALID.to_string(), "page:-1");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId::new(1) < PageId::new(2));
        assert!(PageId::INVALID < PageId::new(0));
    }

    #[test]
    fn test_record_id_validity() {
        let rid = RecordId::new(PageId::new(3), 7);
        assert!(rid.is_valid());
        assert_eq!(rid.page_id.0, 3);
        assert_eq!(rid.slot_id, 7);

        assert!(!RecordId::INVALID.is_valid());
    }

    #[test]
    fn test_record_id_display() {
        let rid = RecordId::new(PageId::new(5), 2);
        assert_eq!(rid.to_string(), "5:2");
    }

    #[test]
    fn test_record_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(RecordId::new(PageId::new(1), 0));
        set.insert(RecordId::new(PageId::new(1), 1));
        set.insert(RecordId::new(PageId::new(1), 0));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId::new(123);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_record_id_serde_roundtrip() {
        let original = RecordId::new(PageId::new(9), 4);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: RecordId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
