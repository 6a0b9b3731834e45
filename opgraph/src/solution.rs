// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! `Solution`: the name-to-value mapping and execution metadata a pipeline run produces.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::SolutionFinalizedError;
use crate::plan::Plan;

/// Why an operation did not deliver a value that ended up missing from the final solution.
#[derive(Clone, Debug)]
pub enum Failure {
    /// The operation's body raised, and the operation is `endured`, so execution continued.
    Endured(Arc<str>),
    /// The operation returned a partial result and was rescheduled, but failed again.
    PartialAfterReschedule(Arc<str>),
    /// The operation was never run because an upstream, non-endured dependency failed fatally.
    Canceled,
}

/// The result of one pipeline execution: every value produced, plus bookkeeping the caller and
/// diagnostics can use to understand what ran, what didn't, and why.
pub struct Solution {
    pub(crate) plan: Arc<Plan>,
    values: IndexMap<Arc<str>, Value>,
    /// Overwrites: when an operation runs more than once against the same name (a reschedule, or
    /// two operations racing to provide the same aliased name), every value after the first is
    /// recorded here instead of silently discarded.
    overwrites: IndexMap<Arc<str>, Vec<Value>>,
    executed: Vec<Arc<str>>,
    canceled: Vec<Arc<str>>,
    failures: IndexMap<Arc<str>, Failure>,
    finalized: bool,
}

impl Solution {
    pub fn new(plan: Arc<Plan>) -> Self {
        Self {
            plan,
            values: IndexMap::new(),
            overwrites: IndexMap::new(),
            executed: Vec::new(),
            canceled: Vec::new(),
            failures: IndexMap::new(),
            finalized: false,
        }
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.values.iter()
    }

    pub fn executed(&self) -> &[Arc<str>] {
        &self.executed
    }

    pub fn canceled(&self) -> &[Arc<str>] {
        &self.canceled
    }

    pub fn failures(&self) -> &IndexMap<Arc<str>, Failure> {
        &self.failures
    }

    pub fn overwrites(&self) -> &IndexMap<Arc<str>, Vec<Value>> {
        &self.overwrites
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Records a value produced for `name`; if one is already present, the old value moves to
    /// `overwrites` rather than being lost.
    pub fn set(&mut self, name: Arc<str>, value: Value) -> Result<(), SolutionFinalizedError> {
        self.guard_mutation()?;
        if let Some(previous) = self.values.insert(name.clone(), value) {
            self.overwrites.entry(name).or_default().push(previous);
        }
        Ok(())
    }

    pub fn mark_executed(&mut self, operation: Arc<str>) -> Result<(), SolutionFinalizedError> {
        self.guard_mutation()?;
        self.executed.push(operation);
        Ok(())
    }

    pub fn mark_canceled(&mut self, operation: Arc<str>) -> Result<(), SolutionFinalizedError> {
        self.guard_mutation()?;
        self.canceled.push(operation);
        Ok(())
    }

    pub fn record_failure(
        &mut self,
        operation: Arc<str>,
        failure: Failure,
    ) -> Result<(), SolutionFinalizedError> {
        self.guard_mutation()?;
        self.failures.insert(operation, failure);
        Ok(())
    }

    pub fn evict(&mut self, name: &str) -> Result<(), SolutionFinalizedError> {
        self.guard_mutation()?;
        self.values.shift_remove(name);
        Ok(())
    }

    /// Locks the solution against further mutation. Called once an execution (including all of
    /// its reschedules) has settled; a finalized solution is safe to hand out as `Arc<Solution>`.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    fn guard_mutation(&self) -> Result<(), SolutionFinalizedError> {
        if self.finalized {
            Err(SolutionFinalizedError)
        } else {
            Ok(())
        }
    }
}
