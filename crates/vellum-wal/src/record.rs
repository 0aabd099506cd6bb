//! WAL log record format.
//!
//! On-disk layout (little-endian):
//! ```text
//! total_size: u32 | lsn: i64 | txn_id: i64 | prev_lsn: i64 | type: u8 |
//! page_id: i32 | slot_id: u16 | before_len: u32 | before_bytes |
//! after_len: u32 | after_bytes
//! ```
//!
//! `total_size` covers the whole record including itself. BEGIN, COMMIT,
//! and ABORT carry no page, slot, or images; INSERT carries the after
//! image, DELETE the before image, UPDATE both.

use bytes::{BufMut, Bytes, BytesMut};
use vellum_common::page::{PageId, RecordId, TxnId};
use vellum_common::{Result, VellumError};

/// Log sequence number. Assigned monotonically from 0.
pub type Lsn = i64;

/// Sentinel for "no LSN" (head of a transaction's chain).
pub const INVALID_LSN: Lsn = -1;

/// Fixed byte size of a record with empty images.
pub const RECORD_MIN_SIZE: usize = 4 + 8 + 8 + 8 + 1 + 4 + 2 + 4 + 4;

/// Types of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    Begin = 0,
    Commit = 1,
    Abort = 2,
    Insert = 3,
    Delete = 4,
    Update = 5,
}

impl TryFrom<u8> for LogRecordType {
    type Error = VellumError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(LogRecordType::Begin),
            1 => Ok(LogRecordType::Commit),
            2 => Ok(LogRecordType::Abort),
            3 => Ok(LogRecordType::Insert),
            4 => Ok(LogRecordType::Delete),
            5 => Ok(LogRecordType::Update),
            other => Err(VellumError::WalCorrupted {
                lsn: INVALID_LSN,
                reason: format!("invalid record type: {}", other),
            }),
        }
    }
}

/// A single log record.
///
/// `lsn` and `prev_lsn` are assigned by the log at append time; the
/// constructors leave them invalid.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// LSN of this record.
    pub lsn: Lsn,
    /// Owning transaction.
    pub txn_id: TxnId,
    /// Previous record of the same transaction (reverse chain).
    pub prev_lsn: Lsn,
    /// Record type.
    pub record_type: LogRecordType,
    /// Affected page (INVALID for BEGIN/COMMIT/ABORT).
    pub page_id: PageId,
    /// Affected slot.
    pub slot_id: u16,
    /// Pre-mutation record bytes (DELETE, UPDATE).
    pub before_image: Bytes,
    /// Post-mutation record bytes (INSERT, UPDATE).
    pub after_image: Bytes,
}

impl LogRecord {
    fn control(txn_id: TxnId, record_type: LogRecordType) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn: INVALID_LSN,
            record_type,
            page_id: PageId::INVALID,
            slot_id: 0,
            before_image: Bytes::new(),
            after_image: Bytes::new(),
        }
    }

    /// Creates a transaction begin record.
    pub fn begin(txn_id: TxnId) -> Self {
        Self::control(txn_id, LogRecordType::Begin)
    }

    /// Creates a transaction commit record.
    pub fn commit(txn_id: TxnId) -> Self {
        Self::control(txn_id, LogRecordType::Commit)
    }

    /// Creates a transaction abort record.
    pub fn abort(txn_id: TxnId) -> Self {
        Self::control(txn_id, LogRecordType::Abort)
    }

    /// Creates an insert record carrying the after image.
    pub fn insert(txn_id: TxnId, rid: RecordId, after_image: Bytes) -> Self {
        Self {
            page_id: rid.page_id,
            slot_id: rid.slot_id,
            after_image,
            ..Self::control(txn_id, LogRecordType::Insert)
        }
    }

    /// Creates a delete record carrying the before image.
    pub fn delete(txn_id: TxnId, rid: RecordId, before_image: Bytes) -> Self {
        Self {
            page_id: rid.page_id,
            slot_id: rid.slot_id,
            before_image,
            ..Self::control(txn_id, LogRecordType::Delete)
        }
    }

    /// Creates an update record carrying both images.
    pub fn update(txn_id: TxnId, rid: RecordId, before_image: Bytes, after_image: Bytes) -> Self {
        Self {
            page_id: rid.page_id,
            slot_id: rid.slot_id,
            before_image,
            after_image,
            ..Self::control(txn_id, LogRecordType::Update)
        }
    }

    /// Returns the affected record id.
    pub fn record_id(&self) -> RecordId {
        RecordId::new(self.page_id, self.slot_id)
    }

    /// Returns true for INSERT/DELETE/UPDATE records.
    pub fn is_data_record(&self) -> bool {
        matches!(
            self.record_type,
            LogRecordType::Insert | LogRecordType::Delete | LogRecordType::Update
        )
    }

    /// Total serialized size.
    pub fn size_on_disk(&self) -> usize {
        RECORD_MIN_SIZE + self.before_image.len() + self.after_image.len()
    }

    /// Serializes this record.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size_on_disk());

        buf.put_u32_le(self.size_on_disk() as u32);
        buf.put_i64_le(self.lsn);
        buf.put_i64_le(self.txn_id);
        buf.put_i64_le(self.prev_lsn);
        buf.put_u8(self.record_type as u8);
        buf.put_i32_le(self.page_id.0);
        buf.put_u16_le(self.slot_id);
        buf.put_u32_le(self.before_image.len() as u32);
        buf.put_slice(&self.before_image);
        buf.put_u32_le(self.after_image.len() as u32);
        buf.put_slice(&self.after_image);

        buf.freeze()
    }

    /// Deserializes one record at `*offset`, advancing it past the record.
    ///
    /// Any truncation or malformed field is an error; readers treat the
    /// first failure as end-of-log.
    pub fn deserialize(data: &[u8], offset: &mut usize) -> Result<LogRecord> {
        let truncated = |what: &str| VellumError::WalCorrupted {
            lsn: INVALID_LSN,
            reason: format!("truncated log record ({what})"),
        };

        let mut pos = *offset;

        let total_size = read_u32(data, &mut pos).ok_or_else(|| truncated("size"))? as usize;
        if total_size < RECORD_MIN_SIZE || *offset + total_size > data.len() {
            return Err(truncated("body"));
        }
        let record_end = *offset + total_size;

        let lsn = read_i64(data, &mut pos).ok_or_else(|| truncated("lsn"))?;
        let txn_id = read_i64(data, &mut pos).ok_or_else(|| truncated("txn_id"))?;
        let prev_lsn = read_i64(data, &mut pos).ok_or_else(|| truncated("prev_lsn"))?;
        let type_byte = *data.get(pos).ok_or_else(|| truncated("type"))?;
        pos += 1;
        let record_type = LogRecordType::try_from(type_byte)?;
        let page_id = read_i32(data, &mut pos).ok_or_else(|| truncated("page_id"))?;
        let slot_id = read_u16(data, &mut pos).ok_or_else(|| truncated("slot_id"))?;

        let before_len = read_u32(data, &mut pos).ok_or_else(|| truncated("before_len"))? as usize;
        if pos + before_len > record_end {
            return Err(truncated("before_image"));
        }
        let before_image = Bytes::copy_from_slice(&data[pos..pos + before_len]);
        pos += before_len;

        let after_len = read_u32(data, &mut pos).ok_or_else(|| truncated("after_len"))? as usize;
        if pos + after_len > record_end {
            return Err(truncated("after_image"));
        }
        let after_image = Bytes::copy_from_slice(&data[pos..pos + after_len]);
        pos += after_len;

        if pos != record_end {
            return Err(VellumError::WalCorrupted {
                lsn,
                reason: "record size does not match contents".to_string(),
            });
        }
        *offset = record_end;

        Ok(LogRecord {
            lsn,
            txn_id,
            prev_lsn,
            record_type,
            page_id: PageId::new(page_id),
            slot_id,
            before_image,
            after_image,
        })
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> Option<u32> {
    let bytes = data.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_i32(data: &[u8], pos: &mut usize) -> Option<i32> {
    let bytes = data.get(*pos..*pos + 4)?;
    *pos += 4;
    Some(i32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_i64(data: &[u8], pos: &mut usize) -> Option<i64> {
    let bytes = data.get(*pos..*pos + 8)?;
    *pos += 8;
    Some(i64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u16(data: &[u8], pos: &mut usize) -> Option<u16> {
    let bytes = data.get(*pos..*pos + 2)?;
    *pos += 2;
    Some(u16::from_le_bytes(bytes.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(page: i32, slot: u16) -> RecordId {
        RecordId::new(PageId::new(page), slot)
    }

    #[test]
    fn test_type_tag_roundtrip() {
        for t in [
            LogRecordType::Begin,
            LogRecordType::Commit,
            LogRecordType::Abort,
            LogRecordType::Insert,
            LogRecordType::Delete,
            LogRecordType::Update,
        ] {
            assert_eq!(LogRecordType::try_from(t as u8).unwrap(), t);
        }
        assert!(LogRecordType::try_from(99).is_err());
    }

    #[test]
    fn test_control_records_carry_no_payload() {
        let begin = LogRecord::begin(7);
        assert_eq!(begin.record_type, LogRecordType::Begin);
        assert_eq!(begin.page_id, PageId::INVALID);
        assert!(begin.before_image.is_empty());
        assert!(begin.after_image.is_empty());
        assert!(!begin.is_data_record());

        assert_eq!(LogRecord::commit(7).record_type, LogRecordType::Commit);
        assert_eq!(LogRecord::abort(7).record_type, LogRecordType::Abort);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut record = LogRecord::update(
            42,
            rid(5, 3),
            Bytes::from_static(b"old bytes"),
            Bytes::from_static(b"new bytes!"),
        );
        record.lsn = 10;
        record.prev_lsn = 9;

        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.size_on_disk());

        let mut offset = 0;
        let parsed = LogRecord::deserialize(&bytes, &mut offset).unwrap();
        assert_eq!(offset, bytes.len());
        assert_eq!(parsed.lsn, 10);
        assert_eq!(parsed.txn_id, 42);
        assert_eq!(parsed.prev_lsn, 9);
        assert_eq!(parsed.record_type, LogRecordType::Update);
        assert_eq!(parsed.page_id, PageId::new(5));
        assert_eq!(parsed.slot_id, 3);
        assert_eq!(parsed.before_image, Bytes::from_static(b"old bytes"));
        assert_eq!(parsed.after_image, Bytes::from_static(b"new bytes!"));
    }

    #[test]
    fn test_size_field_layout() {
        let record = LogRecord::insert(1, rid(2, 0), Bytes::from_static(b"abc"));
        let bytes = record.serialize();
        let total = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(total as usize, bytes.len());
        assert_eq!(total as usize, RECORD_MIN_SIZE + 3);
    }

    #[test]
    fn test_deserialize_sequence() {
        let mut buf = Vec::new();
        for i in 0..3 {
            let mut r = LogRecord::begin(i);
            r.lsn = i;
            buf.extend_from_slice(&r.serialize());
        }

        let mut offset = 0;
        for i in 0..3 {
            let r = LogRecord::deserialize(&buf, &mut offset).unwrap();
            assert_eq!(r.txn_id, i);
        }
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_deserialize_truncated() {
        let record = LogRecord::insert(1, rid(2, 0), Bytes::from_static(b"payload"));
        let bytes = record.serialize();

        for cut in [0, 3, 10, bytes.len() - 1] {
            let mut offset = 0;
            assert!(
                LogRecord::deserialize(&bytes[..cut], &mut offset).is_err(),
                "cut at {cut} should fail"
            );
        }
    }

    #[test]
    fn test_deserialize_bad_image_length() {
        let record = LogRecord::delete(1, rid(2, 0), Bytes::from_static(b"img"));
        let mut bytes = record.serialize().to_vec();
        // Claim a before image longer than the record.
        let before_len_off = 4 + 8 + 8 + 8 + 1 + 4 + 2;
        bytes[before_len_off..before_len_off + 4].copy_from_slice(&1000u32.to_le_bytes());

        let mut offset = 0;
        assert!(LogRecord::deserialize(&bytes, &mut offset).is_err());
    }

    #[test]
    fn test_record_id_accessor() {
        let record = LogRecord::insert(1, rid(9, 4), Bytes::new());
        assert_eq!(record.record_id(), rid(9, 4));
        assert!(record.is_data_record());
    }
}
