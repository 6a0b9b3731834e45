// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `Network`: a durable collection of composed operations, held in composition order.
//!
//! Composition order matters downstream: when the planner has to break a tie between two
//! operations that are otherwise equally eligible to run next, it prefers the one that was
//! composed first. `IndexMap` gives us that ordering for free while still supporting O(1)
//! lookup by name.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::DuplicateOperationError;
use crate::operation::Operation;

/// How to handle a name collision when composing an operation into a `Network`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Composition {
    /// Fail with `DuplicateOperationError` if an operation with this name already exists.
    Append,
    /// Replace any existing operation with this name, keeping its original position in
    /// composition order.
    Merge,
}

/// A named collection of operations, in the order they were added.
#[derive(Default)]
pub struct Network {
    operations: IndexMap<Arc<str>, Arc<Operation>>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            operations: IndexMap::new(),
        }
    }

    /// Adds `operation`, failing if its name collides with an existing one.
    pub fn compose(&mut self, operation: Operation) -> Result<(), DuplicateOperationError> {
        self.compose_with(operation, Composition::Append)
    }

    /// Adds `operation`, replacing any existing operation of the same name in place.
    pub fn compose_merged(&mut self, operation: Operation) {
        self.compose_with(operation, Composition::Merge)
            .expect("Composition::Merge never raises DuplicateOperationError");
    }

    /// Adds `operation` under the given collision policy.
    pub fn compose_with(
        &mut self,
        operation: Operation,
        policy: Composition,
    ) -> Result<(), DuplicateOperationError> {
        let name = operation.name().clone();
        if self.operations.contains_key(&name) && policy == Composition::Append {
            return Err(DuplicateOperationError { name });
        }
        self.operations.insert(name, Arc::new(operation));
        Ok(())
    }

    /// Composes every operation from `other` into `self`, in `other`'s composition order,
    /// under the given collision policy.
    pub fn compose_network(
        &mut self,
        other: Network,
        policy: Composition,
    ) -> Result<(), DuplicateOperationError> {
        for (_, op) in other.operations {
            self.compose_with(op.clone_shallow(), policy)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Operation>> {
        self.operations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Iterates operations in composition order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.operations.values()
    }

    /// The position of `name` in composition order, used as the planner's tie-break key.
    pub fn composition_index(&self, name: &str) -> Option<usize> {
        self.operations.get_index_of(name)
    }
}

impl Operation {
    /// Used only when an `Arc<Operation>` needs to be re-wrapped during network merges; bodies
    /// are cheap `Arc` clones so this never duplicates user closures.
    fn clone_shallow(&self) -> Operation {
        Operation {
            name: self.name.clone(),
            needs: self.needs.clone(),
            provides: self.provides.clone(),
            body: self.body.clone(),
            rescheduled: self.rescheduled,
            endured: self.endured,
            parallel: self.parallel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::{Need, Provide};
    use crate::operation::NamedValues;

    fn noop(name: &str) -> Operation {
        Operation::builder(name)
            .provides([Provide::value("out")])
            .build(|_: &NamedValues| Ok(NamedValues::new()))
    }

    #[test]
    fn append_rejects_duplicate_names() {
        let mut net = Network::new();
        net.compose(noop("a")).unwrap();
        let err = net.compose(noop("a")).unwrap_err();
        assert_eq!(err.name.as_ref(), "a");
    }

    #[test]
    fn merge_replaces_in_place() {
        let mut net = Network::new();
        net.compose(noop("a")).unwrap();
        net.compose(
            Operation::builder("b")
                .needs([Need::value("x")])
                .build(|_: &NamedValues| Ok(NamedValues::new())),
        )
        .unwrap();
        net.compose_merged(noop("a"));

        let order: Vec<&str> = net.iter().map(|op| op.name().as_ref()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn composition_index_reflects_insertion_order() {
        let mut net = Network::new();
        net.compose(noop("first")).unwrap();
        net.compose(noop("second")).unwrap();
        assert_eq!(net.composition_index("first"), Some(0));
        assert_eq!(net.composition_index("second"), Some(1));
        assert_eq!(net.composition_index("missing"), None);
    }
}
