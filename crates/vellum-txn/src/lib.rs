//! Concurrency control for VellumDB.
//!
//! Strict two-phase locking: a record-level lock manager with shared and
//! exclusive modes, and a transaction manager that releases all locks at
//! commit or abort.

mod lock;
mod transaction;

pub use lock::{LockManager, LockMode};
pub use transaction::{Transaction, TransactionManager, TransactionState};
