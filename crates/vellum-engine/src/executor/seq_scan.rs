//! Sequential scan executor.

use super::{Executor, Tuple};
use std::sync::Arc;
use vellum_common::Result;
use vellum_storage::{HeapFile, HeapIterator};

/// Yields every live record of a heap file in page/slot order.
pub struct SeqScanExecutor {
    heap: Arc<HeapFile>,
    iter: Option<HeapIterator>,
}

impl SeqScanExecutor {
    pub fn new(heap: Arc<HeapFile>) -> Self {
        Self { heap, iter: None }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<()> {
        self.iter = Some(self.heap.clone().begin());
        Ok(())
    }

    fn next(&mut self, tuple: &mut Tuple) -> Result<bool> {
        let Some(iter) = self.iter.as_mut() else {
            return Ok(false);
        };

        match iter.next() {
            Some((rid, doc)) => {
                tuple.rid = rid;
                tuple.doc = doc;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn close(&mut self) {
        self.iter = None;
    }
}
