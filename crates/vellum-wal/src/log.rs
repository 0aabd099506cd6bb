//! Append-only write-ahead log.
//!
//! Records accumulate in an in-memory buffer; a COMMIT append writes the
//! buffer through and forces it to disk, so a returned COMMIT implies
//! every record of that transaction is durable. `read_all` parses the
//! log file sequentially and treats the first parse failure as the end
//! of the log (a torn final record is silently dropped).

use crate::record::{LogRecord, LogRecordType, Lsn, INVALID_LSN};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use vellum_common::page::TxnId;
use vellum_common::Result;

/// The write-ahead log over a single append-only file.
pub struct WriteAheadLog {
    path: PathBuf,
    inner: Mutex<WalInner>,
}

struct WalInner {
    file: File,
    /// Serialized records not yet written to the file.
    buffer: Vec<u8>,
    next_lsn: Lsn,
    /// Last LSN appended per transaction, for the prev_lsn chain.
    txn_last_lsn: HashMap<TxnId, Lsn>,
}

impl WriteAheadLog {
    /// Opens (creating if necessary) the log file at `path`.
    ///
    /// LSN assignment continues after the highest LSN already in the
    /// file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().append(true).create(true).open(&path)?;

        let next_lsn = read_records_from(&path)?
            .iter()
            .map(|r| r.lsn + 1)
            .max()
            .unwrap_or(0);

        Ok(Self {
            path,
            inner: Mutex::new(WalInner {
                file,
                buffer: Vec::new(),
                next_lsn,
                txn_last_lsn: HashMap::new(),
            }),
        })
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record, assigning its LSN and transaction chain link.
    ///
    /// A COMMIT record forces the buffer to disk before returning.
    pub fn append(&self, record: &mut LogRecord) -> Result<Lsn> {
        let mut inner = self.inner.lock();

        record.lsn = inner.next_lsn;
        inner.next_lsn += 1;
        record.prev_lsn = inner
            .txn_last_lsn
            .get(&record.txn_id)
            .copied()
            .unwrap_or(INVALID_LSN);
        inner.txn_last_lsn.insert(record.txn_id, record.lsn);

        let serialized = record.serialize();
        inner.buffer.extend_from_slice(&serialized);

        if record.record_type == LogRecordType::Commit {
            Self::write_out(&mut inner)?;
        }

        Ok(record.lsn)
    }

    /// Forces buffered records to disk.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::write_out(&mut inner)
    }

    fn write_out(inner: &mut WalInner) -> Result<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        let buffer = std::mem::take(&mut inner.buffer);
        inner.file.write_all(&buffer)?;
        inner.file.sync_data()?;
        Ok(())
    }

    /// Reads every durable record from the log file in order.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        read_records_from(&self.path)
    }

    /// Discards the entire log, restarting LSNs from 0.
    ///
    /// Only valid once every logged effect is durable elsewhere (after a
    /// completed recovery or a full flush of the data file).
    pub fn truncate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(0)?;
        inner.file.sync_data()?;
        inner.buffer.clear();
        inner.txn_last_lsn.clear();
        inner.next_lsn = 0;
        Ok(())
    }

    /// Returns the next LSN that would be assigned.
    pub fn current_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn
    }

    /// Returns the last LSN appended by `txn_id`, or [`INVALID_LSN`].
    pub fn last_lsn(&self, txn_id: TxnId) -> Lsn {
        self.inner
            .lock()
            .txn_last_lsn
            .get(&txn_id)
            .copied()
            .unwrap_or(INVALID_LSN)
    }
}

/// Parses records from a log file, stopping silently at the first parse
/// failure (truncation tolerance).
fn read_records_from(path: &Path) -> Result<Vec<LogRecord>> {
    let mut data = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut data)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match LogRecord::deserialize(&data, &mut offset) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
    }
    Ok(records)
}
