//! Write-ahead logging and crash recovery for VellumDB.
//!
//! Heap record mutations are logged before their pages reach disk;
//! COMMIT forces the log. Recovery replays the log in three phases
//! (analysis, redo, undo) at database open.

mod log;
mod record;
mod recovery;

pub use log::WriteAheadLog;
pub use record::{LogRecord, LogRecordType, Lsn, INVALID_LSN, RECORD_MIN_SIZE};
pub use recovery::{RecoveryManager, RecoveryStats};
