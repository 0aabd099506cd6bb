//! ARIES-style crash recovery.
//!
//! Runs once at database open, before any request is serviced:
//!
//! 1. **Analysis** — forward pass building the set of transactions with
//!    no COMMIT/ABORT and the dirty page table (page -> earliest LSN).
//! 2. **Redo** — forward pass reapplying INSERT/DELETE/UPDATE records to
//!    pages in the dirty page table at or after their first dirtying LSN.
//! 3. **Undo** — reverse pass rolling back every record of a still-active
//!    transaction.
//!
//! A page that cannot be fetched during redo or undo is logged and
//! skipped; recovery never halts on a single bad page.

use crate::log::WriteAheadLog;
use crate::record::{LogRecord, LogRecordType, Lsn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use vellum_buffer::BufferPool;
use vellum_common::page::{PageId, TxnId};
use vellum_common::Result;
use vellum_storage::SlottedPage;

/// Summary of a recovery run.
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    /// Log records read.
    pub records: usize,
    /// Operations reapplied during redo.
    pub redone: usize,
    /// Operations rolled back during undo.
    pub undone: usize,
    /// Transactions that never committed.
    pub active_txns: usize,
}

/// Replays the write-ahead log against the buffer pool.
pub struct RecoveryManager {
    wal: Arc<WriteAheadLog>,
    pool: Arc<BufferPool>,
}

impl RecoveryManager {
    pub fn new(wal: Arc<WriteAheadLog>, pool: Arc<BufferPool>) -> Self {
        Self { wal, pool }
    }

    /// Runs all three phases and returns their counters.
    pub fn recover(&self) -> Result<RecoveryStats> {
        let records = self.wal.read_all()?;
        if records.is_empty() {
            info!("no WAL records, clean start");
            return Ok(RecoveryStats::default());
        }

        let mut stats = RecoveryStats {
            records: records.len(),
            ..Default::default()
        };

        let (active_txns, dirty_pages) = Self::analysis(&records);
        stats.active_txns = active_txns.len();
        info!(
            records = records.len(),
            active = active_txns.len(),
            dirty_pages = dirty_pages.len(),
            "recovery starting"
        );

        stats.redone = self.redo(&records, &dirty_pages)?;
        stats.undone = self.undo(&records, &active_txns)?;

        info!(redone = stats.redone, undone = stats.undone, "recovery complete");
        Ok(stats)
    }

    /// Forward pass: collect uncommitted transactions and the earliest
    /// LSN that touched each page.
    fn analysis(records: &[LogRecord]) -> (HashSet<TxnId>, HashMap<PageId, Lsn>) {
        let mut active_txns = HashSet::new();
        let mut dirty_pages: HashMap<PageId, Lsn> = HashMap::new();

        for record in records {
            match record.record_type {
                LogRecordType::Begin => {
                    active_txns.insert(record.txn_id);
                }
                LogRecordType::Commit | LogRecordType::Abort => {
                    active_txns.remove(&record.txn_id);
                }
                LogRecordType::Insert | LogRecordType::Delete | LogRecordType::Update => {
                    active_txns.insert(record.txn_id);
                    if record.page_id.is_valid() {
                        dirty_pages.entry(record.page_id).or_insert(record.lsn);
                    }
                }
            }
        }

        (active_txns, dirty_pages)
    }

    /// Forward pass: reapply data records to dirty pages.
    fn redo(&self, records: &[LogRecord], dirty_pages: &HashMap<PageId, Lsn>) -> Result<usize> {
        let mut redone = 0;

        for record in records {
            if !record.is_data_record() || !record.page_id.is_valid() {
                continue;
            }
            match dirty_pages.get(&record.page_id) {
                Some(&first_lsn) if record.lsn >= first_lsn => {}
                _ => continue,
            }

            let guard = match self.pool.fetch(record.page_id) {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    warn!(page_id = %record.page_id, lsn = record.lsn, "redo skipped: no frame");
                    continue;
                }
                Err(e) => {
                    warn!(page_id = %record.page_id, lsn = record.lsn, error = %e, "redo skipped");
                    continue;
                }
            };

            let mut data = guard.data_mut();
            let applied = match record.record_type {
                LogRecordType::Insert => !record.after_image.is_empty()
                    && SlottedPage::insert(&mut data[..], &record.after_image).is_some(),
                LogRecordType::Delete => SlottedPage::delete(&mut data[..], record.slot_id),
                LogRecordType::Update => {
                    !record.after_image.is_empty()
                        && SlottedPage::update(&mut data[..], record.slot_id, &record.after_image)
                }
                _ => unreachable!(),
            };
            drop(data);

            if applied {
                guard.mark_dirty();
                redone += 1;
            }
        }

        Ok(redone)
    }

    /// Reverse pass: roll back every data record of an uncommitted
    /// transaction.
    fn undo(&self, records: &[LogRecord], active_txns: &HashSet<TxnId>) -> Result<usize> {
        if active_txns.is_empty() {
            return Ok(0);
        }

        let mut undone = 0;

        for record in records.iter().rev() {
            if !active_txns.contains(&record.txn_id)
                || !record.is_data_record()
                || !record.page_id.is_valid()
            {
                continue;
            }

            let guard = match self.pool.fetch(record.page_id) {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    warn!(page_id = %record.page_id, lsn = record.lsn, "undo skipped: no frame");
                    continue;
                }
                Err(e) => {
                    warn!(page_id = %record.page_id, lsn = record.lsn, error = %e, "undo skipped");
                    continue;
                }
            };

            let mut data = guard.data_mut();
            let applied = match record.record_type {
                // Undo insert -> tombstone the slot.
                LogRecordType::Insert => SlottedPage::delete(&mut data[..], record.slot_id),
                // Undo delete -> re-install the before image.
                LogRecordType::Delete => !record.before_image.is_empty()
                    && SlottedPage::insert(&mut data[..], &record.before_image).is_some(),
                // Undo update -> overwrite with the before image.
                LogRecordType::Update => {
                    !record.before_image.is_empty()
                        && SlottedPage::update(&mut data[..], record.slot_id, &record.before_image)
                }
                _ => unreachable!(),
            };
            drop(data);

            if applied {
                guard.mark_dirty();
                undone += 1;
            }
        }

        Ok(undone)
    }
}
