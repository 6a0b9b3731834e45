// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Typed errors for every fallible boundary in the crate.
//!
//! Each kind is its own struct/enum with a hand-written `Display` and `Error` impl, rather than
//! a derive-macro error crate: this mirrors how the graph/rule-graph lineage this crate grew out
//! of plumbs its own errors.

use std::fmt;
use std::sync::Arc;

use crate::solution::Solution;

/// Raised at compose-time when two operations in the same `Network` share a name and the
/// composition was `append`ed rather than `merge`d.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DuplicateOperationError {
    pub name: Arc<str>,
}

impl fmt::Display for DuplicateOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation `{}` already exists in this network (use a merging composition to override it)",
            self.name
        )
    }
}

impl std::error::Error for DuplicateOperationError {}

/// Raised at compile-time when the pruned DAG contains a cycle over non-sideffect data names.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CyclicDependencyError {
    /// Operation names participating in the cycle, in the order they were discovered.
    pub cycle: Vec<Arc<str>>,
}

impl fmt::Display for CyclicDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cyclic dependency among operations: {}",
            self.cycle.join(" -> ")
        )
    }
}

impl std::error::Error for CyclicDependencyError {}

/// Raised at compile-time when an asked-for output cannot be produced from `known_inputs` by any
/// surviving operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsolvableGraphError {
    pub missing_output: Arc<str>,
    /// Operations that were pruned during compilation and would otherwise have been candidates
    /// to provide `missing_output`, innermost cause first.
    pub removed_chain: Vec<Arc<str>>,
}

impl fmt::Display for UnsolvableGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot produce output `{}`", self.missing_output)?;
        if !self.removed_chain.is_empty() {
            write!(
                f,
                ": would have required {}, which were pruned (unsatisfied needs or filtered by predicate)",
                self.removed_chain.join(", ")
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for UnsolvableGraphError {}

/// Raised at execute-time when an operation's body raises. Wraps the underlying error with the
/// context needed to debug it: which operation, and what it was called with.
#[derive(Debug)]
pub struct UserFnError {
    pub operation: Arc<str>,
    pub offending_inputs: Vec<Arc<str>>,
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl fmt::Display for UserFnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation `{}` raised with inputs [{}]: {}",
            self.operation,
            self.offending_inputs.join(", "),
            self.source
        )
    }
}

impl std::error::Error for UserFnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Raised at execute-time when a non-`rescheduled` operation returns a mapping missing one or
/// more of its non-optional `provides`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissingOutputsError {
    pub operation: Arc<str>,
    pub missing: Vec<Arc<str>>,
}

impl fmt::Display for MissingOutputsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation `{}` did not deliver required outputs: {} (it is not marked `rescheduled`, so partial results are not allowed)",
            self.operation,
            self.missing.join(", ")
        )
    }
}

impl std::error::Error for MissingOutputsError {}

/// Raised at execute-time when a `rescheduled` operation has already triggered one reschedule in
/// this execution and fails to deliver its provides again.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartialOutputFailure {
    pub operation: Arc<str>,
    pub missing: Vec<Arc<str>>,
}

impl fmt::Display for PartialOutputFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation `{}` again failed to deliver {} after a reschedule was already attempted for it in this execution",
            self.operation,
            self.missing.join(", ")
        )
    }
}

impl std::error::Error for PartialOutputFailure {}

/// Raised after `Solution::finalize()` when a caller attempts to mutate it further.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SolutionFinalizedError;

impl fmt::Display for SolutionFinalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solution has already been finalized and cannot be mutated")
    }
}

impl std::error::Error for SolutionFinalizedError {}

/// The terminal wrapper for a fatal (non-endured) execution failure: carries the first fatal
/// cause plus a snapshot of the solution as it stood at the moment of failure, so a caller can
/// inspect what *did* complete before giving up.
#[derive(Debug)]
pub struct PipelineExecutionError {
    pub cause: Box<dyn std::error::Error + Send + Sync>,
    pub solution: Arc<Solution>,
}

impl fmt::Display for PipelineExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline execution failed: {} ({} operation(s) executed before the failure, {} canceled)",
            self.cause,
            self.solution.executed().len(),
            self.solution.canceled().len()
        )
    }
}

impl std::error::Error for PipelineExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Compile-time errors, unified for callers that want to `match` once.
#[derive(Debug)]
pub enum CompileError {
    Cyclic(CyclicDependencyError),
    Unsolvable(UnsolvableGraphError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Cyclic(e) => e.fmt(f),
            CompileError::Unsolvable(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Cyclic(e) => Some(e),
            CompileError::Unsolvable(e) => Some(e),
        }
    }
}

impl From<CyclicDependencyError> for CompileError {
    fn from(e: CyclicDependencyError) -> Self {
        CompileError::Cyclic(e)
    }
}

impl From<UnsolvableGraphError> for CompileError {
    fn from(e: UnsolvableGraphError) -> Self {
        CompileError::Unsolvable(e)
    }
}
