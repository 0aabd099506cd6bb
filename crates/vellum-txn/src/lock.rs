//! Record-level lock manager implementing strict two-phase locking.
//!
//! Locks are keyed by record id and come in shared and exclusive modes,
//! with in-place upgrade. Each key has a queue of requests; waiters block
//! on the queue's condition variable and are woken by `unlock_all`, the
//! only release point (locks are never dropped early).
//!
//! There is no deadlock detection: callers must impose a consistent
//! acquisition order or tolerate indefinite blocking.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;
use vellum_common::page::{RecordId, TxnId};

/// Lock compatibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct LockQueue {
    requests: Vec<LockRequest>,
    cv: Arc<Condvar>,
}

impl Default for LockQueue {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            cv: Arc::new(Condvar::new()),
        }
    }
}

struct LockTable {
    queues: HashMap<RecordId, LockQueue>,
    /// Keys each transaction holds grants on, for `unlock_all`.
    holdings: HashMap<TxnId, BTreeSet<RecordId>>,
}

/// Table of per-record lock queues behind one mutex.
pub struct LockManager {
    table: Mutex<LockTable>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable {
                queues: HashMap::new(),
                holdings: HashMap::new(),
            }),
        }
    }

    /// Acquires a shared lock, blocking while an exclusive grant is held
    /// by another transaction. Idempotent for a transaction that already
    /// holds any grant on the key.
    pub fn lock_shared(&self, txn_id: TxnId, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        let queue = table.queues.entry(rid).or_default();
        if queue
            .requests
            .iter()
            .any(|r| r.txn_id == txn_id && r.granted)
        {
            return true;
        }

        queue.requests.push(LockRequest {
            txn_id,
            mode: LockMode::Shared,
            granted: false,
        });
        let cv = queue.cv.clone();

        loop {
            let Some(queue) = table.queues.get(&rid) else {
                return false;
            };
            let compatible = queue
                .requests
                .iter()
                .all(|r| !r.granted || r.mode == LockMode::Shared);
            if compatible {
                break;
            }
            cv.wait(&mut table);
        }

        let Some(queue) = table.queues.get_mut(&rid) else {
            return false;
        };
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && !r.granted)
        {
            request.granted = true;
        }
        table.holdings.entry(txn_id).or_default().insert(rid);
        true
    }

    /// Acquires an exclusive lock, blocking while any other transaction
    /// holds a grant on the key. Idempotent if the transaction already
    /// holds exclusive.
    pub fn lock_exclusive(&self, txn_id: TxnId, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        let queue = table.queues.entry(rid).or_default();
        if queue
            .requests
            .iter()
            .any(|r| r.txn_id == txn_id && r.granted && r.mode == LockMode::Exclusive)
        {
            return true;
        }

        queue.requests.push(LockRequest {
            txn_id,
            mode: LockMode::Exclusive,
            granted: false,
        });
        let cv = queue.cv.clone();

        loop {
            let Some(queue) = table.queues.get(&rid) else {
                return false;
            };
            let others_hold = queue
                .requests
                .iter()
                .any(|r| r.txn_id != txn_id && r.granted);
            if !others_hold {
                break;
            }
            cv.wait(&mut table);
        }

        let Some(queue) = table.queues.get_mut(&rid) else {
            return false;
        };
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && !r.granted)
        {
            request.granted = true;
        }
        table.holdings.entry(txn_id).or_default().insert(rid);
        true
    }

    /// Upgrades an existing granted shared lock to exclusive, blocking
    /// while any other transaction holds a grant. Returns false if the
    /// transaction holds no grant on the key.
    pub fn lock_upgrade(&self, txn_id: TxnId, rid: RecordId) -> bool {
        let mut table = self.table.lock();

        let Some(queue) = table.queues.get(&rid) else {
            return false;
        };
        let Some(request) = queue
            .requests
            .iter()
            .find(|r| r.txn_id == txn_id && r.granted)
        else {
            return false;
        };
        if request.mode == LockMode::Exclusive {
            return true;
        }
        let cv = queue.cv.clone();

        loop {
            let Some(queue) = table.queues.get(&rid) else {
                return false;
            };
            let others_hold = queue
                .requests
                .iter()
                .any(|r| r.txn_id != txn_id && r.granted);
            if !others_hold {
                break;
            }
            cv.wait(&mut table);
        }

        let Some(queue) = table.queues.get_mut(&rid) else {
            return false;
        };
        if let Some(request) = queue
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id && r.granted)
        {
            request.mode = LockMode::Exclusive;
        }
        true
    }

    /// Releases every lock held by `txn_id`, waking waiters on each
    /// affected queue. Empty queues are dropped.
    pub fn unlock_all(&self, txn_id: TxnId) {
        let mut table = self.table.lock();

        let Some(keys) = table.holdings.remove(&txn_id) else {
            return;
        };
        debug!(txn_id, locks = keys.len(), "releasing locks");

        for rid in keys {
            if let Some(queue) = table.queues.get_mut(&rid) {
                queue.requests.retain(|r| r.txn_id != txn_id);
                queue.cv.notify_all();
                if queue.requests.is_empty() {
                    table.queues.remove(&rid);
                }
            }
        }
    }

    /// Returns true if any request (granted or waiting) exists for the
    /// key.
    pub fn is_held(&self, rid: RecordId) -> bool {
        self.table.lock().queues.contains_key(&rid)
    }

    /// Number of keys a transaction holds grants on.
    pub fn held_count(&self, txn_id: TxnId) -> usize {
        self.table
            .lock()
            .holdings
            .get(&txn_id)
            .map_or(0, |keys| keys.len())
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use vellum_common::page::PageId;

    fn rid(page: i32, slot: u16) -> RecordId {
        RecordId::new(PageId::new(page), slot)
    }

    #[test]
    fn test_shared_locks_compatible() {
        let lm = LockManager::new();
        let key = rid(1, 0);

        assert!(lm.lock_shared(1, key));
        assert!(lm.lock_shared(2, key));
        assert!(lm.lock_shared(3, key));
        assert_eq!(lm.held_count(1), 1);

        lm.unlock_all(1);
        lm.unlock_all(2);
        lm.unlock_all(3);
        assert!(!lm.is_held(key));
    }

    #[test]
    fn test_reacquire_is_idempotent() {
        let lm = LockManager::new();
        let key = rid(1, 0);

        assert!(lm.lock_shared(1, key));
        assert!(lm.lock_shared(1, key));
        assert!(lm.lock_exclusive(2, rid(2, 0)));
        assert!(lm.lock_exclusive(2, rid(2, 0)));

        // Shared after exclusive on the same key also short-circuits.
        assert!(lm.lock_shared(2, rid(2, 0)));
        assert_eq!(lm.held_count(2), 1);
    }

    #[test]
    fn test_exclusive_blocks_shared() {
        let lm = Arc::new(LockManager::new());
        let key = rid(5, 0);

        assert!(lm.lock_exclusive(1, key));

        let (tx, rx) = mpsc::channel();
        let lm2 = lm.clone();
        let handle = thread::spawn(move || {
            lm2.lock_shared(2, key);
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        lm.unlock_all(1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();

        lm.unlock_all(2);
    }

    #[test]
    fn test_shared_blocks_exclusive_until_release() {
        let lm = Arc::new(LockManager::new());
        let key = rid(5, 0);

        // Txn A holds shared.
        assert!(lm.lock_shared(1, key));

        // Txn B requests exclusive and blocks.
        let (tx, rx) = mpsc::channel();
        let lm2 = lm.clone();
        let handle = thread::spawn(move || {
            assert!(lm2.lock_exclusive(2, key));
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        // A commits: B's request is granted.
        lm.unlock_all(1);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();

        // B releasing leaves the table empty for the key.
        lm.unlock_all(2);
        assert!(!lm.is_held(key));
    }

    #[test]
    fn test_upgrade_without_shared_fails() {
        let lm = LockManager::new();
        assert!(!lm.lock_upgrade(1, rid(1, 0)));

        lm.lock_shared(2, rid(1, 0));
        assert!(!lm.lock_upgrade(1, rid(1, 0)));
        lm.unlock_all(2);
    }

    #[test]
    fn test_upgrade_succeeds_when_sole_holder() {
        let lm = LockManager::new();
        let key = rid(3, 1);

        assert!(lm.lock_shared(1, key));
        assert!(lm.lock_upgrade(1, key));
        // Upgrading an exclusive grant is a no-op success.
        assert!(lm.lock_upgrade(1, key));
        lm.unlock_all(1);
    }

    #[test]
    fn test_upgrade_waits_for_other_readers() {
        let lm = Arc::new(LockManager::new());
        let key = rid(4, 0);

        lm.lock_shared(1, key);
        lm.lock_shared(2, key);

        let (tx, rx) = mpsc::channel();
        let lm2 = lm.clone();
        let handle = thread::spawn(move || {
            assert!(lm2.lock_upgrade(1, key));
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        lm.unlock_all(2);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();

        // Now exclusive: a third reader must wait until release.
        let lm3 = lm.clone();
        let (tx2, rx2) = mpsc::channel();
        let handle2 = thread::spawn(move || {
            lm3.lock_shared(3, key);
            tx2.send(()).unwrap();
        });
        assert!(rx2.recv_timeout(Duration::from_millis(100)).is_err());

        lm.unlock_all(1);
        rx2.recv_timeout(Duration::from_secs(5)).unwrap();
        handle2.join().unwrap();
        lm.unlock_all(3);
    }

    #[test]
    fn test_unlock_all_releases_multiple_keys() {
        let lm = LockManager::new();

        for slot in 0..5 {
            lm.lock_exclusive(1, rid(1, slot));
        }
        assert_eq!(lm.held_count(1), 5);

        lm.unlock_all(1);
        assert_eq!(lm.held_count(1), 0);
        for slot in 0..5 {
            assert!(!lm.is_held(rid(1, slot)));
        }
    }

    #[test]
    fn test_unlock_all_unknown_txn_is_noop() {
        let lm = LockManager::new();
        lm.unlock_all(42);
    }

    #[test]
    fn test_writers_serialize() {
        let lm = Arc::new(LockManager::new());
        let key = rid(9, 0);
        let counter = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for txn in 0..8 {
            let lm = lm.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                lm.lock_exclusive(txn, key);
                {
                    let mut c = counter.lock();
                    *c += 1;
                }
                lm.unlock_all(txn);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*counter.lock(), 8);
        assert!(!lm.is_held(key));
    }
}
