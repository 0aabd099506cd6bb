//! Transaction lifecycle management.
//!
//! Two-phase locking states: a transaction acquires locks only while
//! growing and releases them exactly once, at commit or abort, passing
//! through shrinking into its terminal state.

use crate::lock::LockManager;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;
use vellum_common::page::TxnId;

/// Two-phase locking state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Acquiring locks.
    Growing,
    /// Releasing locks (commit/abort in progress).
    Shrinking,
    Committed,
    Aborted,
}

/// A single transaction handle.
#[derive(Debug)]
pub struct Transaction {
    txn_id: TxnId,
    state: Mutex<TransactionState>,
}

impl Transaction {
    fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            state: Mutex::new(TransactionState::Growing),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }
}

/// Allocates transaction ids and drives commit/abort.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    next_txn_id: AtomicI64,
    table: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            next_txn_id: AtomicI64::new(0),
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a transaction in the growing state.
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::AcqRel);
        let txn = Arc::new(Transaction::new(txn_id));
        self.table.lock().insert(txn_id, txn.clone());
        debug!(txn_id, "begin");
        txn
    }

    /// Commits: enters shrinking, releases every lock, then commits.
    pub fn commit(&self, txn: &Transaction) {
        txn.set_state(TransactionState::Shrinking);
        self.lock_manager.unlock_all(txn.id());
        txn.set_state(TransactionState::Committed);
        debug!(txn_id = txn.id(), "committed");
    }

    /// Aborts: enters shrinking, releases every lock, then aborts.
    pub fn abort(&self, txn: &Transaction) {
        txn.set_state(TransactionState::Shrinking);
        self.lock_manager.unlock_all(txn.id());
        txn.set_state(TransactionState::Aborted);
        debug!(txn_id = txn.id(), "aborted");
    }

    /// Looks up a transaction by id.
    pub fn get(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.table.lock().get(&txn_id).cloned()
    }
}
