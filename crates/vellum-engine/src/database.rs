//! The database facade.
//!
//! Ties the storage, logging, and concurrency layers together behind the
//! service surface the shell and network dispatcher call into. Opening a
//! database runs crash recovery before anything else; once recovered
//! state is flushed, the log restarts empty.
//!
//! Write operations run as single-statement transactions: exclusive
//! record locks, a WAL chain of BEGIN, one data record per touched
//! record, and a forced COMMIT. Reads take no locks.
//!
//! Known limitation carried from the storage design: secondary indexes
//! are maintained on insert only; updates and deletes leave stale
//! entries, which index scans skip at read time.

use crate::catalog::{Catalog, CollectionInfo};
use crate::executor::{CompareOp, Executor, FilterExecutor, Predicate, SeqScanExecutor, Tuple};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use vellum_buffer::BufferPool;
use vellum_common::page::{PageId, RecordId};
use vellum_common::{DbConfig, Result, VellumError};
use vellum_storage::{DiskManager, Document, Value};
use vellum_txn::{LockManager, Transaction, TransactionManager};
use vellum_wal::{LogRecord, RecoveryManager, WriteAheadLog};

/// An open VellumDB instance.
pub struct Database {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    wal: Arc<WriteAheadLog>,
    lock_manager: Arc<LockManager>,
    txn_manager: TransactionManager,
    catalog: Mutex<Catalog>,
}

impl Database {
    /// Opens (creating if necessary) the database described by `config`.
    ///
    /// Order matters: recovery replays the WAL against the data file
    /// before the catalog is read and before any request is serviced.
    pub fn open(config: DbConfig) -> Result<Database> {
        let disk = Arc::new(DiskManager::open_with(&config.db_path, config.fsync_enabled)?);
        let pool = Arc::new(BufferPool::new(disk.clone(), config.pool_frames));

        if disk.num_pages() == 0 {
            // Reserve page 0 for the catalog.
            let Some(guard) = pool.new_page()? else {
                return Err(VellumError::BufferPoolFull);
            };
            guard.mark_dirty();
        }

        let wal = Arc::new(WriteAheadLog::open(&config.wal_path)?);
        let stats = RecoveryManager::new(wal.clone(), pool.clone()).recover()?;
        pool.flush_all()?;
        // Recovered state is durable in the data file; restart the log so
        // a later recovery does not replay these records a second time.
        wal.truncate()?;

        let mut catalog = Catalog::new(pool.clone());
        catalog.load()?;

        // Reconstructed heap files only know their first page; re-derive
        // the scan bound from the file size.
        let scan_bound = PageId::new(disk.num_pages() - 1);
        for name in catalog.list_collections() {
            if let Some(coll) = catalog.get_collection(&name) {
                coll.heap.set_max_page_id(scan_bound);
            }
        }

        let lock_manager = Arc::new(LockManager::new());
        let txn_manager = TransactionManager::new(lock_manager.clone());

        info!(
            db = %config.db_path.display(),
            replayed = stats.records,
            "database open"
        );

        Ok(Database {
            disk,
            pool,
            wal,
            lock_manager,
            txn_manager,
            catalog: Mutex::new(catalog),
        })
    }

    /// Saves the catalog, flushes every dirty page, and truncates the
    /// now-redundant log.
    pub fn close(self) -> Result<()> {
        self.catalog.lock().save()?;
        self.pool.flush_all()?;
        self.wal.flush()?;
        self.wal.truncate()?;
        Ok(())
    }

    /// Liveness probe.
    pub fn ping(&self) -> &'static str {
        "pong"
    }

    /// Names of all collections.
    pub fn list_collections(&self) -> Vec<String> {
        self.catalog.lock().list_collections()
    }

    /// Creates a collection. Returns false if the name is taken.
    pub fn create_collection(&self, name: &str) -> Result<bool> {
        let mut catalog = self.catalog.lock();
        let created = catalog.create_collection(name)?;
        if created {
            catalog.save()?;
        }
        Ok(created)
    }

    /// Drops a collection from the catalog (its pages stay allocated).
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let mut catalog = self.catalog.lock();
        let dropped = catalog.drop_collection(name);
        if dropped {
            catalog.save()?;
        }
        Ok(dropped)
    }

    /// Returns a handle to a collection.
    pub fn get_collection(&self, name: &str) -> Option<Arc<CollectionInfo>> {
        self.catalog.lock().get_collection(name)
    }

    /// Creates an index on `collection.field`, backfilled from existing
    /// documents. Returns false if it already exists.
    pub fn create_index(&self, collection: &str, field: &str) -> Result<bool> {
        let catalog = self.catalog.lock();
        let created = catalog.create_index(collection, field)?;
        if created {
            catalog.save()?;
        }
        Ok(created)
    }

    /// Inserts a document, returning its record id.
    pub fn insert(&self, collection: &str, doc: &Document) -> Result<RecordId> {
        let coll = self.collection(collection)?;

        let rid = self.run_in_txn(|txn| {
            let rid = coll.heap.insert(doc)?;
            self.lock_manager.lock_exclusive(txn.id(), rid);
            self.wal.append(&mut LogRecord::insert(
                txn.id(),
                rid,
                Bytes::from(doc.to_bytes()),
            ))?;
            Ok(rid)
        })?;

        for idx in coll.indexes.read().iter() {
            if let Some(key) = doc.get(&idx.field).and_then(Value::index_key) {
                idx.btree.insert(&key, rid)?;
            }
        }
        Ok(rid)
    }

    /// Returns every document matching the equality filter. An empty
    /// filter is a full scan.
    pub fn find(&self, collection: &str, filter: &Document) -> Result<Vec<Document>> {
        let coll = self.collection(collection)?;
        Ok(self
            .matching(&coll, filter)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    /// Merges `fields` into every document matching the filter,
    /// overwriting matching keys. Returns the number updated.
    pub fn update(&self, collection: &str, filter: &Document, fields: &Document) -> Result<usize> {
        let coll = self.collection(collection)?;
        let matches = self.matching(&coll, filter)?;
        if matches.is_empty() {
            return Ok(0);
        }

        self.run_in_txn(|txn| {
            let mut updated = 0;
            for (rid, doc) in &matches {
                let mut merged = doc.clone();
                merged.merge(fields);

                self.lock_manager.lock_exclusive(txn.id(), *rid);
                let before = Bytes::from(doc.to_bytes());
                let after = Bytes::from(merged.to_bytes());

                let new_rid = coll.heap.update(*rid, &merged)?;
                if new_rid == *rid {
                    self.wal
                        .append(&mut LogRecord::update(txn.id(), *rid, before, after))?;
                } else {
                    // The record moved: log the move as delete + insert so
                    // each image stays attached to the id it describes.
                    self.lock_manager.lock_exclusive(txn.id(), new_rid);
                    self.wal
                        .append(&mut LogRecord::delete(txn.id(), *rid, before))?;
                    self.wal
                        .append(&mut LogRecord::insert(txn.id(), new_rid, after))?;
                }
                updated += 1;
            }
            Ok(updated)
        })
    }

    /// Deletes every document matching the filter. Returns the number
    /// deleted.
    pub fn delete(&self, collection: &str, filter: &Document) -> Result<usize> {
        let coll = self.collection(collection)?;
        let matches = self.matching(&coll, filter)?;
        if matches.is_empty() {
            return Ok(0);
        }

        self.run_in_txn(|txn| {
            let mut deleted = 0;
            for (rid, doc) in &matches {
                self.lock_manager.lock_exclusive(txn.id(), *rid);
                if coll.heap.delete(*rid)? {
                    self.wal.append(&mut LogRecord::delete(
                        txn.id(),
                        *rid,
                        Bytes::from(doc.to_bytes()),
                    ))?;
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    /// Number of documents in the collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let coll = self.collection(collection)?;

        let mut scan = SeqScanExecutor::new(coll.heap.clone());
        scan.init()?;
        let mut tuple = Tuple::default();
        let mut count = 0;
        while scan.next(&mut tuple)? {
            count += 1;
        }
        scan.close();
        Ok(count)
    }

    fn collection(&self, name: &str) -> Result<Arc<CollectionInfo>> {
        self.catalog
            .lock()
            .get_collection(name)
            .ok_or_else(|| VellumError::CollectionNotFound(name.to_string()))
    }

    /// Collects (rid, document) pairs matching an equality filter
    /// through the executor pipeline.
    fn matching(
        &self,
        coll: &Arc<CollectionInfo>,
        filter: &Document,
    ) -> Result<Vec<(RecordId, Document)>> {
        let mut exec: Box<dyn Executor> = Box::new(SeqScanExecutor::new(coll.heap.clone()));
        if !filter.is_empty() {
            let predicates = filter
                .iter()
                .map(|(field, value)| Predicate::new(field, CompareOp::Eq, value.clone()))
                .collect();
            exec = Box::new(FilterExecutor::new(exec, predicates));
        }

        exec.init()?;
        let mut tuple = Tuple::default();
        let mut out = Vec::new();
        while exec.next(&mut tuple)? {
            out.push((tuple.rid, std::mem::take(&mut tuple.doc)));
        }
        exec.close();
        Ok(out)
    }

    /// Runs `body` inside a fresh transaction: BEGIN is logged up front;
    /// success appends a forced COMMIT and releases locks, failure logs
    /// an ABORT and releases locks before surfacing the error.
    fn run_in_txn<T>(&self, body: impl FnOnce(&Arc<Transaction>) -> Result<T>) -> Result<T> {
        let txn = self.txn_manager.begin();
        self.wal.append(&mut LogRecord::begin(txn.id()))?;

        match body(&txn) {
            Ok(value) => {
                self.wal.append(&mut LogRecord::commit(txn.id()))?;
                self.txn_manager.commit(&txn);
                Ok(value)
            }
            Err(e) => {
                let _ = self.wal.append(&mut LogRecord::abort(txn.id()));
                let _ = self.wal.flush();
                self.txn_manager.abort(&txn);
                Err(e)
            }
        }
    }

    /// The data file size in pages (diagnostic).
    pub fn num_pages(&self) -> i32 {
        self.disk.num_pages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> Database {
        let config = DbConfig {
            fsync_enabled: false,
            ..DbConfig::in_dir(dir.path())
        };
        Database::open(config).unwrap()
    }

    fn user(name: &str, city: &str, age: i32) -> Document {
        let mut doc = Document::new();
        doc.set("name", name);
        doc.set("city", city);
        doc.set("age", age);
        doc
    }

    fn eq_filter(field: &str, value: impl Into<Value>) -> Document {
        let mut doc = Document::new();
        doc.set(field, value);
        doc
    }

    #[test]
    fn test_ping() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        assert_eq!(db.ping(), "pong");
    }

    #[test]
    fn test_collection_lifecycle() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        assert!(db.create_collection("users").unwrap());
        assert!(!db.create_collection("users").unwrap());
        assert_eq!(db.list_collections(), vec!["users"]);
        assert!(db.get_collection("users").is_some());

        assert!(db.drop_collection("users").unwrap());
        assert!(!db.drop_collection("users").unwrap());
        assert!(db.get_collection("users").is_none());
    }

    #[test]
    fn test_insert_and_find() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.create_collection("users").unwrap();

        let alice = user("Alice", "NYC", 30);
        let rid = db.insert("users", &alice).unwrap();
        assert!(rid.is_valid());

        let found = db.find("users", &eq_filter("name", "Alice")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], alice);
    }

    #[test]
    fn test_find_unknown_collection() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        assert!(matches!(
            db.find("nope", &Document::new()),
            Err(VellumError::CollectionNotFound(_))
        ));
    }

    #[test]
    fn test_update_merges_fields() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.create_collection("users").unwrap();

        db.insert("users", &user("Alice", "NYC", 30)).unwrap();
        db.insert("users", &user("Bob", "NYC", 25)).unwrap();

        let mut patch = Document::new();
        patch.set("city", "LA");
        patch.set("moved", true);

        let updated = db
            .update("users", &eq_filter("name", "Alice"), &patch)
            .unwrap();
        assert_eq!(updated, 1);

        let found = db.find("users", &eq_filter("name", "Alice")).unwrap();
        assert_eq!(found[0].get("city").unwrap().as_str(), Some("LA"));
        assert_eq!(found[0].get("age").unwrap().as_i32(), Some(30));
        assert_eq!(found[0].get("moved").unwrap().as_bool(), Some(true));

        // Bob untouched.
        let bob = db.find("users", &eq_filter("name", "Bob")).unwrap();
        assert_eq!(bob[0].get("city").unwrap().as_str(), Some("NYC"));
    }

    #[test]
    fn test_update_no_match() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.create_collection("users").unwrap();

        let updated = db
            .update("users", &eq_filter("name", "Nobody"), &eq_filter("x", 1))
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.create_collection("users").unwrap();

        for i in 0..6 {
            db.insert("users", &user(&format!("U{i}"), if i % 2 == 0 { "NYC" } else { "LA" }, i))
                .unwrap();
        }

        let deleted = db.delete("users", &eq_filter("city", "NYC")).unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(db.count("users").unwrap(), 3);
        assert!(db.find("users", &eq_filter("city", "NYC")).unwrap().is_empty());
    }

    #[test]
    fn test_count() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.create_collection("users").unwrap();

        assert_eq!(db.count("users").unwrap(), 0);
        for i in 0..4 {
            db.insert("users", &user(&format!("U{i}"), "NYC", i)).unwrap();
        }
        assert_eq!(db.count("users").unwrap(), 4);
    }

    #[test]
    fn test_insert_maintains_indexes() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        db.create_collection("users").unwrap();
        db.create_index("users", "name").unwrap();

        let rid = db.insert("users", &user("Carol", "NYC", 41)).unwrap();

        let coll = db.get_collection("users").unwrap();
        let index = coll.index_for("name").unwrap();
        assert_eq!(index.search("Carol").unwrap(), rid);
    }

    #[test]
    fn test_reopen_after_close_preserves_data() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(&dir);
            db.create_collection("users").unwrap();
            db.insert("users", &user("Alice", "NYC", 30)).unwrap();
            db.create_index("users", "name").unwrap();
            db.close().unwrap();
        }

        let db = open_db(&dir);
        assert_eq!(db.list_collections(), vec!["users"]);
        assert_eq!(db.count("users").unwrap(), 1);

        let found = db.find("users", &eq_filter("name", "Alice")).unwrap();
        assert_eq!(found.len(), 1);

        let coll = db.get_collection("users").unwrap();
        let index = coll.index_for("name").unwrap();
        assert!(index.search("Alice").unwrap().is_valid());
    }

    #[test]
    fn test_reopen_twice_no_duplicates() {
        let dir = tempdir().unwrap();

        {
            let db = open_db(&dir);
            db.create_collection("users").unwrap();
            db.insert("users", &user("Alice", "NYC", 30)).unwrap();
            db.close().unwrap();
        }
        {
            let db = open_db(&dir);
            assert_eq!(db.count("users").unwrap(), 1);
            db.close().unwrap();
        }

        let db = open_db(&dir);
        assert_eq!(db.count("users").unwrap(), 1);
    }
}
