// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Operation predicates: a caller-supplied filter evaluated once per compile.

use std::sync::Arc;

use crate::operation::Operation;

/// A filter over operations, applied before pruning. An operation the predicate rejects is
/// dropped from the plan exactly as if it had never been composed into the network for this
/// compile.
///
/// Predicates are compared by pointer identity for plan-cache purposes (two `Predicate`s built
/// from the same `Arc` are "the same filter"; two predicates with merely-equal behavior are not,
/// since there is no general way to compare closures for equality).
#[derive(Clone)]
pub struct Predicate {
    filter: Arc<dyn Fn(&Operation) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new(filter: impl Fn(&Operation) -> bool + Send + Sync + 'static) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }

    pub fn allows(&self, operation: &Operation) -> bool {
        (self.filter)(operation)
    }

    /// A stable identity for this predicate's underlying closure, for use as a plan-cache key
    /// component. Two clones of the same `Predicate` share an identity; two separately built
    /// predicates never do, even if their behavior happens to coincide.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.filter) as *const () as usize
    }
}
