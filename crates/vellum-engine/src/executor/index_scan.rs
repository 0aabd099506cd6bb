//! Index scan executor.

use super::{Executor, Tuple};
use std::sync::Arc;
use tracing::warn;
use vellum_common::page::RecordId;
use vellum_common::Result;
use vellum_storage::{BPlusTree, HeapFile};

/// Runs a B+ tree range scan and hydrates each record id through the
/// heap file.
///
/// Indexes are not maintained on update or delete, so an entry may point
/// at a record that no longer exists; such entries are skipped.
pub struct IndexScanExecutor {
    index: Arc<BPlusTree>,
    heap: Arc<HeapFile>,
    lo_key: String,
    hi_key: String,
    results: Vec<(String, RecordId)>,
    pos: usize,
}

impl IndexScanExecutor {
    pub fn new(
        index: Arc<BPlusTree>,
        heap: Arc<HeapFile>,
        lo_key: impl Into<String>,
        hi_key: impl Into<String>,
    ) -> Self {
        Self {
            index,
            heap,
            lo_key: lo_key.into(),
            hi_key: hi_key.into(),
            results: Vec::new(),
            pos: 0,
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<()> {
        self.results = self.index.range_scan(&self.lo_key, &self.hi_key)?;
        self.pos = 0;
        Ok(())
    }

    fn next(&mut self, tuple: &mut Tuple) -> Result<bool> {
        while self.pos < self.results.len() {
            let (key, rid) = &self.results[self.pos];
            self.pos += 1;

            match self.heap.get(*rid)? {
                Some(doc) => {
                    tuple.rid = *rid;
                    tuple.doc = doc;
                    return Ok(true);
                }
                None => warn!(key, %rid, "index entry points at missing record"),
            }
        }
        Ok(false)
    }

    fn close(&mut self) {
        self.results.clear();
        self.pos = 0;
    }
}
