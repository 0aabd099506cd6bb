//! Filter executor.

use super::{Executor, Predicate, Tuple};
use vellum_common::Result;

/// Wraps a child executor, yielding tuples that satisfy the conjunction
/// of its predicates.
pub struct FilterExecutor {
    child: Box<dyn Executor>,
    predicates: Vec<Predicate>,
}

impl FilterExecutor {
    pub fn new(child: Box<dyn Executor>, predicates: Vec<Predicate>) -> Self {
        Self { child, predicates }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<()> {
        self.child.init()
    }

    fn next(&mut self, tuple: &mut Tuple) -> Result<bool> {
        while self.child.next(tuple)? {
            if self.predicates.iter().all(|p| p.evaluate(&tuple.doc)) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn close(&mut self) {
        self.child.close();
    }
}
