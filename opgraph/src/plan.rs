// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The compiled, pruned execution plan a `Pipeline` runs against a `Solution`.

use std::fmt;
use std::sync::Arc;

use crate::network::Network;
use crate::operation::Operation;
use crate::predicate::Predicate;

/// One scheduled action in a plan's layered execution order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// Run this operation.
    Compute(Arc<str>),
    /// Drop this value from the running solution: every operation that needed it has already
    /// run, and the config asked for eviction.
    Evict(Arc<str>),
}

/// A note the planner leaves behind explaining a pruning decision, surfaced through
/// `Plan::comments` for diagnostics (`opgraph` never logs these itself; callers choose whether
/// to show them).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlanComment {
    /// An operation was dropped because the predicate rejected it.
    FilteredByPredicate { operation: Arc<str> },
    /// An operation was dropped because one of its required needs could never be satisfied.
    UnsatisfiedNeed {
        operation: Arc<str>,
        missing_need: Arc<str>,
    },
    /// A data node was dropped because no kept operation still needs it and it was not asked for.
    UnusedData { name: Arc<str> },
    /// An operation survived the earlier passes but was not reachable backward from the asked
    /// outputs, so it was dropped as unnecessary for this particular compile.
    NotNeededForOutputs { operation: Arc<str> },
    /// An asked output became unreachable during a reschedule recompile (its producer already ran
    /// and failed to deliver it). Only ever produced by `planner::compile_lenient`; a plain
    /// `compile` call fails with `UnsolvableGraphError` instead.
    UnreachableAfterReschedule { name: Arc<str> },
}

impl fmt::Display for PlanComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanComment::FilteredByPredicate { operation } => {
                write!(f, "operation `{operation}` filtered out by predicate")
            }
            PlanComment::UnsatisfiedNeed {
                operation,
                missing_need,
            } => write!(
                f,
                "operation `{operation}` pruned: needs `{missing_need}`, which is unsatisfiable"
            ),
            PlanComment::UnusedData { name } => {
                write!(f, "data `{name}` pruned: not needed by any kept operation and not asked for")
            }
            PlanComment::NotNeededForOutputs { operation } => write!(
                f,
                "operation `{operation}` pruned: not on any path to the requested outputs"
            ),
            PlanComment::UnreachableAfterReschedule { name } => write!(
                f,
                "output `{name}` is no longer reachable after a reschedule recompile"
            ),
        }
    }
}

/// The identity of a compiled plan within a plan cache: two compiles of the same network with
/// the same inputs, outputs, and predicate produce interchangeable plans.
#[derive(Clone)]
pub struct PlanKey {
    pub(crate) network_id: usize,
    pub(crate) inputs: Vec<Arc<str>>,
    pub(crate) outputs: Vec<Arc<str>>,
    pub(crate) predicate_id: Option<usize>,
}

impl PlanKey {
    pub fn new(
        network: &Network,
        mut inputs: Vec<Arc<str>>,
        mut outputs: Vec<Arc<str>>,
        predicate: Option<&Predicate>,
    ) -> Self {
        inputs.sort();
        inputs.dedup();
        outputs.sort();
        outputs.dedup();
        Self {
            network_id: network as *const Network as usize,
            inputs,
            outputs,
            predicate_id: predicate.map(|p| p.identity()),
        }
    }
}

impl PartialEq for PlanKey {
    fn eq(&self, other: &Self) -> bool {
        self.network_id == other.network_id
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.predicate_id == other.predicate_id
    }
}

impl Eq for PlanKey {}

impl std::hash::Hash for PlanKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.network_id.hash(state);
        self.inputs.hash(state);
        self.outputs.hash(state);
        self.predicate_id.hash(state);
    }
}

/// A pruned, scheduled execution plan.
pub struct Plan {
    pub(crate) key: PlanKey,
    /// Operations kept after pruning, in scheduled (not necessarily composition) order.
    pub(crate) kept_operations: Vec<Arc<Operation>>,
    /// Scheduled steps grouped into layers; within a layer, steps have no ordering dependency on
    /// each other and may run concurrently under `Config::parallel_tasks`.
    pub(crate) layers: Vec<Vec<Step>>,
    /// The outputs this plan was compiled to deliver.
    pub(crate) asked_outs: Vec<Arc<str>>,
    /// Names the caller is expected to supply; used to validate `Solution` inputs before running.
    pub(crate) known_inputs: Vec<Arc<str>>,
    pub(crate) comments: Vec<PlanComment>,
}

impl Plan {
    pub fn key(&self) -> &PlanKey {
        &self.key
    }

    pub fn kept_operations(&self) -> &[Arc<Operation>] {
        &self.kept_operations
    }

    pub fn layers(&self) -> &[Vec<Step>] {
        &self.layers
    }

    pub fn asked_outs(&self) -> &[Arc<str>] {
        &self.asked_outs
    }

    pub fn known_inputs(&self) -> &[Arc<str>] {
        &self.known_inputs
    }

    pub fn comments(&self) -> &[PlanComment] {
        &self.comments
    }

    /// All `Compute` steps across every layer, in scheduled order. Most callers iterate this
    /// rather than `layers()` directly unless they care about parallelism grouping.
    pub fn compute_order(&self) -> impl Iterator<Item = &Arc<str>> {
        self.layers.iter().flatten().filter_map(|step| match step {
            Step::Compute(name) => Some(name),
            Step::Evict(_) => None,
        })
    }

    pub fn operation(&self, name: &str) -> Option<&Arc<Operation>> {
        self.kept_operations.iter().find(|op| op.name().as_ref() == name)
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field(
                "kept_operations",
                &self
                    .kept_operations
                    .iter()
                    .map(|op| op.name().as_ref())
                    .collect::<Vec<_>>(),
            )
            .field("layers", &self.layers)
            .field("asked_outs", &self.asked_outs)
            .field("comments", &self.comments.iter().map(|c| c.to_string()).collect::<Vec<_>>())
            .finish()
    }
}

/// A `render()`-style rendering of a plan for diagnostics: one line per layer, in the same spirit
/// as `ModifiedName::render` but for a whole compiled plan.
pub fn render_plan(plan: &Plan) -> String {
    let mut out = String::new();
    for (i, layer) in plan.layers.iter().enumerate() {
        out.push_str(&format!("layer {i}: "));
        let rendered: Vec<String> = layer
            .iter()
            .map(|step| match step {
                Step::Compute(name) => format!("compute({name})"),
                Step::Evict(name) => format!("evict({name})"),
            })
            .collect();
        out.push_str(&rendered.join(", "));
        out.push('\n');
    }
    out
}
