//! Volcano-style query executors.
//!
//! Every executor exposes `init` / `next` / `close`. `next` writes the
//! yielded tuple into a caller-provided slot and returns false on
//! exhaustion, so pipelines allocate nothing per row beyond the documents
//! themselves.

mod filter;
mod index_scan;
mod seq_scan;

pub use filter::FilterExecutor;
pub use index_scan::IndexScanExecutor;
pub use seq_scan::SeqScanExecutor;

use std::cmp::Ordering;
use vellum_common::page::RecordId;
use vellum_common::Result;
use vellum_storage::{Document, Value};

/// A single result row: the record id and its document.
#[derive(Debug, Clone)]
pub struct Tuple {
    pub rid: RecordId,
    pub doc: Document,
}

impl Default for Tuple {
    fn default() -> Self {
        Self {
            rid: RecordId::INVALID,
            doc: Document::new(),
        }
    }
}

/// Pull-based iterator over tuples.
pub trait Executor {
    /// Prepares for iteration.
    fn init(&mut self) -> Result<()>;

    /// Writes the next tuple into `tuple`; returns false when exhausted.
    fn next(&mut self, tuple: &mut Tuple) -> Result<bool>;

    /// Releases any buffered state.
    fn close(&mut self);
}

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single field comparison.
///
/// Comparison requires matching value kinds; a missing field or a kind
/// mismatch fails the predicate. Booleans support only Eq/Ne.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluates the predicate against a document.
    pub fn evaluate(&self, doc: &Document) -> bool {
        let Some(actual) = doc.get(&self.field) else {
            return false;
        };

        if let (Value::Boolean(a), Value::Boolean(b)) = (actual, &self.value) {
            return match self.op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                _ => false,
            };
        }

        let Some(ordering) = actual.compare(&self.value) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}
