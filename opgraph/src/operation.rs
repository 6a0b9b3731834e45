// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Operations: named, side-effect-free units of work with a declared `needs`/`provides` contract.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{MissingOutputsError, UserFnError};
use crate::name::{ModifiedName, Need, Provide};

/// The input mapping an operation body is called with: base/keyword names to values. Sideffect
/// and implicit needs never appear here.
pub type NamedValues = BTreeMap<Arc<str>, Value>;

/// A body's own error type, wrapped into a `UserFnError` with operation context by `Operation::compute`.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// The callable contract every operation body implements. Implemented automatically for any
/// `Fn(&NamedValues) -> Result<NamedValues, BodyError>` closure.
pub trait OperationBody: Send + Sync {
    fn call(&self, inputs: &NamedValues) -> Result<NamedValues, BodyError>;
}

impl<F> OperationBody for F
where
    F: Fn(&NamedValues) -> Result<NamedValues, BodyError> + Send + Sync,
{
    fn call(&self, inputs: &NamedValues) -> Result<NamedValues, BodyError> {
        self(inputs)
    }
}

/// A named, side-effect-free operation: its `needs`/`provides` contract plus the callable body.
///
/// Operations are immutable once built; a `Network` holds them behind `Arc` so that plans can
/// share them across compiles without cloning bodies.
pub struct Operation {
    pub(crate) name: Arc<str>,
    pub(crate) needs: Vec<Need>,
    pub(crate) provides: Vec<Provide>,
    pub(crate) body: Arc<dyn OperationBody>,
    /// If true, a partial result (missing some non-optional provides) does not fail the
    /// execution outright; see `executor::reschedule`.
    pub(crate) rescheduled: bool,
    /// If true, a fatal failure of this operation does not abort the whole execution; its
    /// dependents are canceled instead. See §4.5.1's endurance rule.
    pub(crate) endured: bool,
    /// Hint to the parallel scheduler: when `Config::parallel_tasks` has engaged worker-pool
    /// execution for a layer, operations marked `parallel` run concurrently with each other;
    /// operations left `false` still run in that same layer, but serially, after the concurrent
    /// subset has drained. See `executor::run_layer_parallel`.
    pub(crate) parallel: bool,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("needs", &self.needs)
            .field("provides", &self.provides)
            .field("rescheduled", &self.rescheduled)
            .field("endured", &self.endured)
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl Operation {
    pub fn builder(name: impl Into<Arc<str>>) -> OperationBuilder {
        OperationBuilder::new(name)
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn needs(&self) -> &[Need] {
        &self.needs
    }

    pub fn provides(&self) -> &[Provide] {
        &self.provides
    }

    pub fn is_rescheduled(&self) -> bool {
        self.rescheduled
    }

    pub fn is_endured(&self) -> bool {
        self.endured
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// A short, stable string for diagnostics: name plus rendered needs/provides, in the same
    /// spirit as `ModifiedName::render` but for a whole operation. Meant for a future
    /// plotting/debugging collaborator's node labels, not for end-user error messages.
    pub fn render(&self) -> String {
        let needs: Vec<String> = self.needs.iter().map(ModifiedName::render).collect();
        let provides: Vec<String> = self.provides.iter().map(ModifiedName::render).collect();
        format!("{}({}) -> ({})", self.name, needs.join(", "), provides.join(", "))
    }

    /// Base names of non-optional, non-implicit, non-sideffect needs: the set that must be
    /// satisfiable for this operation to survive pruning.
    pub fn required_need_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.needs
            .iter()
            .filter(|n| !n.is_optional() && !n.is_sideffect())
            .map(|n| n.base_name())
    }

    /// Base names of everything this operation provides, including the alias targets of any
    /// `Provide::Aliased` entries and sideffect tokens.
    pub fn provided_names(&self) -> impl Iterator<Item = &Arc<str>> + '_ {
        self.provides.iter().flat_map(|p| {
            std::iter::once(p.base_name()).chain(p.alias_target())
        })
    }

    /// Base names of non-sideffect provides: the ones the executor expects an output mapping
    /// entry for.
    pub fn value_provide_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.provides.iter().filter(|p| !p.is_sideffect()).map(|p| p.base_name())
    }

    /// Base names of every need except optional ones: the set whose producer must have *run*
    /// (though not necessarily delivered a value, in the sideffect case) before this operation is
    /// eligible to run. Used by the executor to decide whether an upstream failure should cascade
    /// into canceling this operation.
    pub fn blocking_need_names(&self) -> impl Iterator<Item = &Arc<str>> {
        self.needs.iter().filter(|n| !n.is_optional()).map(|n| n.base_name())
    }

    /// The non-sideffect provides missing from `output`, after a call to `compute`.
    pub fn missing_provides(&self, output: &NamedValues) -> Vec<Arc<str>> {
        self.value_provide_names()
            .filter(|name| !output.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Runs the body, applying keyword renames to build its input mapping and validating its
    /// output mapping against `provides`.
    ///
    /// `allow_partial` is set by the executor when this is a reschedule attempt (or the operation
    /// is `rescheduled`) and a short output should not itself raise `MissingOutputsError`.
    ///
    /// `debug` controls whether a `UserFnError` carries the call's actual input names
    /// (`Config::debug`); when `false` the error is still raised, just without that extra context.
    pub fn compute(
        &self,
        available: &NamedValues,
        allow_partial: bool,
        debug: bool,
    ) -> Result<NamedValues, ComputeError> {
        let mut call_inputs = NamedValues::new();
        for need in &self.needs {
            if need.is_implicit() || need.is_sideffect() {
                continue;
            }
            let base = need.base_name();
            let Some(value) = available.get(base) else {
                if need.is_optional() {
                    continue;
                }
                // Planning guarantees required needs are satisfiable; reaching here means the
                // upstream producer itself failed to deliver and this op was not pruned for it
                // (reschedule/endurance path), so just skip; compute() callers are responsible
                // for not calling at all when a hard prerequisite is missing.
                continue;
            };
            let key = need.keyword_override().cloned().unwrap_or_else(|| base.clone());
            call_inputs.insert(key, value.clone());
        }

        let raw_output = self
            .body
            .call(&call_inputs)
            .map_err(|source| {
                ComputeError::UserFn(UserFnError {
                    operation: self.name.clone(),
                    offending_inputs: if debug { call_inputs.keys().cloned().collect() } else { Vec::new() },
                    source,
                })
            })?;

        let mut output = NamedValues::new();
        let mut missing = Vec::new();
        for provide in &self.provides {
            if provide.is_sideffect() {
                continue;
            }
            let base = provide.base_name();
            match raw_output.get(base) {
                Some(value) => {
                    output.insert(base.clone(), value.clone());
                    if let Some(alias) = provide.alias_target() {
                        output.insert(alias.clone(), value.clone());
                    }
                }
                None => missing.push(base.clone()),
            }
        }

        if !missing.is_empty() && !allow_partial {
            return Err(ComputeError::MissingOutputs(MissingOutputsError {
                operation: self.name.clone(),
                missing,
            }));
        }

        Ok(output)
    }
}

/// Errors `Operation::compute` can raise; distinct from the crate-wide `CompileError` because it
/// only ever happens at execute-time.
#[derive(Debug)]
pub enum ComputeError {
    UserFn(UserFnError),
    MissingOutputs(MissingOutputsError),
}

impl fmt::Display for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeError::UserFn(e) => e.fmt(f),
            ComputeError::MissingOutputs(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for ComputeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ComputeError::UserFn(e) => Some(e),
            ComputeError::MissingOutputs(e) => Some(e),
        }
    }
}

/// Builds an `Operation` from a name, a `needs`/`provides` list, and a body.
pub struct OperationBuilder {
    name: Arc<str>,
    needs: Vec<Need>,
    provides: Vec<Provide>,
    rescheduled: bool,
    endured: bool,
    parallel: bool,
}

impl OperationBuilder {
    fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            provides: Vec::new(),
            rescheduled: false,
            endured: false,
            parallel: false,
        }
    }

    pub fn needs(mut self, needs: impl IntoIterator<Item = Need>) -> Self {
        self.needs.extend(needs);
        self
    }

    pub fn provides(mut self, provides: impl IntoIterator<Item = Provide>) -> Self {
        self.provides.extend(provides);
        self
    }

    pub fn rescheduled(mut self, rescheduled: bool) -> Self {
        self.rescheduled = rescheduled;
        self
    }

    pub fn endured(mut self, endured: bool) -> Self {
        self.endured = endured;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn build(self, body: impl OperationBody + 'static) -> Operation {
        Operation {
            name: self.name,
            needs: self.needs,
            provides: self.provides,
            body: Arc::new(body),
            rescheduled: self.rescheduled,
            endured: self.endured,
            parallel: self.parallel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> NamedValues {
        pairs.iter().map(|(k, v)| (Arc::from(*k), v.clone())).collect()
    }

    #[test]
    fn compute_applies_keyword_rename_and_produces_outputs() {
        let op = Operation::builder("add_one")
            .needs([Need::keyword("x", "the_x")])
            .provides([Provide::value("y")])
            .build(|inputs: &NamedValues| {
                let x = inputs.get("the_x").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(values(&[("y", json!(x + 1))]))
            });

        let available = values(&[("x", json!(41))]);
        let out = op.compute(&available, false, false).unwrap();
        assert_eq!(out.get(&Arc::from("y")), Some(&json!(42)));
    }

    #[test]
    fn compute_fails_on_missing_non_optional_output() {
        let op = Operation::builder("broken")
            .provides([Provide::value("y")])
            .build(|_: &NamedValues| Ok(NamedValues::new()));

        let err = op.compute(&NamedValues::new(), false, false).unwrap_err();
        assert!(matches!(err, ComputeError::MissingOutputs(_)));
    }

    #[test]
    fn compute_allows_partial_when_requested() {
        let op = Operation::builder("flaky")
            .provides([Provide::value("y"), Provide::value("z")])
            .build(|_: &NamedValues| Ok(values(&[("y", json!(1))])));

        let out = op.compute(&NamedValues::new(), true, false).unwrap();
        assert_eq!(out.get(&Arc::from("y")), Some(&json!(1)));
        assert!(out.get(&Arc::from("z")).is_none());
    }

    #[test]
    fn compute_skips_optional_missing_inputs() {
        let op = Operation::builder("greets")
            .needs([Need::value("name"), Need::optional("title")])
            .provides([Provide::value("greeting")])
            .build(|inputs: &NamedValues| {
                let name = inputs.get("name").and_then(|v| v.as_str()).unwrap_or("");
                Ok(values(&[("greeting", json!(format!("hi {name}")))]))
            });

        let available = values(&[("name", json!("ada"))]);
        let out = op.compute(&available, false, false).unwrap();
        assert_eq!(out.get(&Arc::from("greeting")), Some(&json!("hi ada")));
    }

    #[test]
    fn render_lists_needs_and_provides() {
        let op = Operation::builder("greet")
            .needs([Need::value("name"), Need::optional("title")])
            .provides([Provide::value("greeting")])
            .build(|_: &NamedValues| Ok(NamedValues::new()));

        assert_eq!(op.render(), "greet(name, optional(title)) -> (greeting)");
    }

    #[test]
    fn aliased_provide_duplicates_value_under_both_names() {
        let op = Operation::builder("dup")
            .provides([Provide::aliased("y", "y_alias")])
            .build(|_: &NamedValues| Ok(values(&[("y", json!(7))])));

        let out = op.compute(&NamedValues::new(), false, false).unwrap();
        assert_eq!(out.get(&Arc::from("y")), Some(&json!(7)));
        assert_eq!(out.get(&Arc::from("y_alias")), Some(&json!(7)));
    }

    #[test]
    fn compute_only_records_offending_inputs_when_debug_is_set() {
        let op = Operation::builder("raises")
            .needs([Need::value("x")])
            .provides([Provide::value("y")])
            .build(|_: &NamedValues| Err("boom".into()));
        let available = values(&[("x", json!(1))]);

        let quiet = op.compute(&available, false, false).unwrap_err();
        match quiet {
            ComputeError::UserFn(e) => assert!(e.offending_inputs.is_empty()),
            other => panic!("expected UserFn, got {other:?}"),
        }

        let verbose = op.compute(&available, false, true).unwrap_err();
        match verbose {
            ComputeError::UserFn(e) => assert_eq!(e.offending_inputs, vec![Arc::<str>::from("x")]),
            other => panic!("expected UserFn, got {other:?}"),
        }
    }
}
