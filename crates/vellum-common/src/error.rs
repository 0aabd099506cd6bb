//! Error types for VellumDB.

use thiserror::Error;

/// Result type alias using VellumError.
pub type Result<T> = std::result::Result<T, VellumError>;

/// Errors that can occur in VellumDB operations.
#[derive(Debug, Error)]
pub enum VellumError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: i32 },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: i32, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Record too large for a single page: {size} bytes")]
    RecordTooLarge { size: usize },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // Document errors
    #[error("Document corrupted: {0}")]
    DocumentCorrupted(String),

    #[error("Unknown document type tag: {0:#04x}")]
    UnknownTypeTag(u8),

    // B+ tree errors
    #[error("Key not found")]
    KeyNotFound,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("B+ tree corrupted: {0}")]
    BTreeCorrupted(String),

    // WAL errors
    #[error("WAL corrupted at LSN {lsn}: {reason}")]
    WalCorrupted { lsn: i64, reason: String },

    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    // Transaction errors
    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    // Catalog errors
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Index already exists on field: {0}")]
    IndexAlreadyExists(String),

    #[error("Catalog corrupted: {0}")]
    CatalogCorrupted(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: VellumError = io_err.into();
        assert!(matches!(err, VellumError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_errors_display() {
        let err = VellumError::PageNotFound { page_id: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");

        let err = VellumError::PageCorrupted {
            page_id: 100,
            reason: "bad slot directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Page corrupted: 100, reason: bad slot directory"
        );

        let err = VellumError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");
    }

    #[test]
    fn test_record_too_large_display() {
        let err = VellumError::RecordTooLarge { size: 9000 };
        assert_eq!(
            err.to_string(),
            "Record too large for a single page: 9000 bytes"
        );
    }

    #[test]
    fn test_wal_errors_display() {
        let err = VellumError::WalCorrupted {
            lsn: 12,
            reason: "truncated record".to_string(),
        };
        assert_eq!(err.to_string(), "WAL corrupted at LSN 12: truncated record");

        let err = VellumError::RecoveryFailed("missing log file".to_string());
        assert_eq!(err.to_string(), "Recovery failed: missing log file");
    }

    #[test]
    fn test_catalog_errors_display() {
        let err = VellumError::CollectionNotFound("users".to_string());
        assert_eq!(err.to_string(), "Collection not found: users");

        let err = VellumError::CollectionAlreadyExists("orders".to_string());
        assert_eq!(err.to_string(), "Collection already exists: orders");

        let err = VellumError::IndexAlreadyExists("name".to_string());
        assert_eq!(err.to_string(), "Index already exists on field: name");
    }

    #[test]
    fn test_unknown_type_tag_display() {
        let err = VellumError::UnknownTypeTag(0x7f);
        assert_eq!(err.to_string(), "Unknown document type tag: 0x7f");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(VellumError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VellumError>();
    }
}
