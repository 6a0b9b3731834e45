// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Compiles a `Network` plus a request shape (known inputs, asked outputs, predicate) into a
//! pruned, scheduled `Plan`.
//!
//! The pruning passes run in a fixed order, each one only ever narrowing what the next pass
//! considers:
//!
//! 1. predicate filter: drop operations the caller's predicate rejects outright.
//! 2. unsatisfied-needs fixpoint: repeatedly drop operations with a required need that nothing
//!    remaining (known input or surviving operation) can supply, until a pass removes nothing.
//! 3. unwanted-outputs backward reachability: walk back from the asked outputs through
//!    surviving operations' needs, dropping anything not on a path to an output.
//! 4. unreachable-data cleanup: note data nodes nothing downstream still needs, so the scheduler
//!    knows it is free to evict them early.

use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use indexmap::IndexMap;
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::config::Config;
use crate::error::{CyclicDependencyError, UnsolvableGraphError};
use crate::network::Network;
use crate::operation::Operation;
use crate::plan::{Plan, PlanComment, PlanKey, Step};
use crate::predicate::Predicate;

/// Compiles `network` into a `Plan` for the given request shape. See the module docs for the
/// pruning pass order.
pub fn compile(
    network: &Network,
    known_inputs: &[Arc<str>],
    asked_outs: &[Arc<str>],
    predicate: Option<&Predicate>,
    config: &Config,
) -> Result<Plan, crate::error::CompileError> {
    compile_internal(network, known_inputs, asked_outs, predicate, config, false)
}

/// As `compile`, but an asked output that has become unreachable is dropped silently (noted as a
/// `PlanComment::UnreachableAfterReschedule`) instead of failing with `UnsolvableGraphError`.
///
/// Used only by the executor's reschedule path (`executor::settle`): once a rescheduled
/// operation has already run and come up short, the data it failed to deliver is gone for this
/// execution, and any asked output that depended on it should simply end up missing from the
/// `Solution` rather than aborting a run that has otherwise mostly succeeded.
pub(crate) fn compile_lenient(
    network: &Network,
    known_inputs: &[Arc<str>],
    asked_outs: &[Arc<str>],
    predicate: Option<&Predicate>,
    config: &Config,
) -> Plan {
    compile_internal(network, known_inputs, asked_outs, predicate, config, true)
        .expect("lenient compile tolerates unreachable asked outputs instead of failing")
}

fn compile_internal(
    network: &Network,
    known_inputs: &[Arc<str>],
    asked_outs: &[Arc<str>],
    predicate: Option<&Predicate>,
    config: &Config,
    lenient: bool,
) -> Result<Plan, crate::error::CompileError> {
    let known: FnvHashSet<Arc<str>> = known_inputs.iter().cloned().collect();
    let mut comments = Vec::new();

    // Pass 1: predicate filter.
    let mut kept: IndexMap<Arc<str>, Arc<Operation>> = IndexMap::new();
    for op in network.iter() {
        if predicate.map(|p| p.allows(op)).unwrap_or(true) {
            kept.insert(op.name().clone(), op.clone());
        } else {
            comments.push(PlanComment::FilteredByPredicate {
                operation: op.name().clone(),
            });
        }
    }

    // Pass 2: unsatisfied-needs fixpoint.
    loop {
        let provided: FnvHashSet<Arc<str>> = kept
            .values()
            .flat_map(|op| op.provided_names().cloned())
            .collect();

        let mut to_remove: Vec<(Arc<str>, Arc<str>)> = Vec::new();
        for (name, op) in kept.iter() {
            for need in op.required_need_names() {
                if !known.contains(need) && !provided.contains(need) {
                    to_remove.push((name.clone(), need.clone()));
                    break;
                }
            }
        }
        if to_remove.is_empty() {
            break;
        }
        for (name, missing_need) in to_remove {
            kept.shift_remove(&name);
            comments.push(PlanComment::UnsatisfiedNeed {
                operation: name,
                missing_need,
            });
        }
    }

    if config.skip_evictions {
        log::trace!("skip_evictions set: planner pruning ran with eviction diagnostics disabled");
    }

    // Pass 3: unwanted-outputs backward reachability. An empty `asked_outs` means "run everything
    // that survived so far" rather than "nothing is wanted".
    let needed_ops: FnvHashSet<Arc<str>> = if asked_outs.is_empty() {
        kept.keys().cloned().collect()
    } else {
        let mut needed_ops = FnvHashSet::default();
        let mut seen_data: FnvHashSet<Arc<str>> = asked_outs.iter().cloned().collect();
        let mut frontier: Vec<Arc<str>> = asked_outs.to_vec();

        while let Some(data) = frontier.pop() {
            if known.contains(&data) {
                continue;
            }
            for (name, op) in kept.iter() {
                if needed_ops.contains(name) {
                    continue;
                }
                if op.provided_names().any(|n| n == &data) {
                    needed_ops.insert(name.clone());
                    for need in op.required_need_names() {
                        if seen_data.insert(need.clone()) {
                            frontier.push(need.clone());
                        }
                    }
                }
            }
        }

        for out in asked_outs {
            if known.contains(out) {
                continue;
            }
            let producible = kept.values().any(|op| op.provided_names().any(|n| n == out));
            if !producible {
                let removed_chain: Vec<Arc<str>> = if config.debug {
                    network
                        .iter()
                        .filter(|op| {
                            op.provided_names().any(|n| n == out) && !kept.contains_key(op.name())
                        })
                        .map(|op| op.name().clone())
                        .collect()
                } else {
                    Vec::new()
                };
                if lenient {
                    comments.push(PlanComment::UnreachableAfterReschedule { name: out.clone() });
                    continue;
                }
                return Err(crate::error::CompileError::Unsolvable(UnsolvableGraphError {
                    missing_output: out.clone(),
                    removed_chain,
                }));
            }
        }

        needed_ops
    };

    let dropped_unreachable: Vec<Arc<str>> = kept
        .keys()
        .filter(|name| !needed_ops.contains(*name))
        .cloned()
        .collect();
    for name in &dropped_unreachable {
        kept.shift_remove(name);
        comments.push(PlanComment::NotNeededForOutputs {
            operation: name.clone(),
        });
    }

    // Pass 4: unreachable-data cleanup (diagnostic only; informs eviction, does not drop ops).
    let still_needed: FnvHashSet<Arc<str>> = kept
        .values()
        .flat_map(|op| op.required_need_names().cloned())
        .chain(asked_outs.iter().cloned())
        .collect();
    for op in kept.values() {
        for name in op.provided_names() {
            if !still_needed.contains(name) && !asked_outs.contains(name) {
                comments.push(PlanComment::UnusedData { name: name.clone() });
            }
        }
    }

    // Build the operation dependency graph: an edge op_b -> op_a means op_a needs something op_b
    // provides, i.e. op_b must run first.
    let mut graph: DiGraph<Arc<str>, ()> = DiGraph::new();
    let mut node_of: FnvHashMap<Arc<str>, NodeIndex> = FnvHashMap::default();
    for name in kept.keys() {
        node_of.insert(name.clone(), graph.add_node(name.clone()));
    }

    let mut producer_of: FnvHashMap<Arc<str>, Arc<str>> = FnvHashMap::default();
    for op in kept.values() {
        for name in op.provided_names() {
            producer_of.insert(name.clone(), op.name().clone());
        }
    }

    // Ordering edges come from every non-optional need, not just the ones pruning cares about:
    // sideffect and implicit needs never gate whether an operation survives pruning, but they
    // still have to order this operation after whatever produces them.
    for op in kept.values() {
        let a = node_of[op.name()];
        for need in op.blocking_need_names() {
            if let Some(producer) = producer_of.get(need) {
                if producer != op.name() {
                    graph.add_edge(node_of[producer], a, ());
                }
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        let offending = cycle.node_id();
        let sccs = kosaraju_scc(&graph);
        let cycle_names = sccs
            .into_iter()
            .find(|scc| scc.contains(&offending) && scc.len() > 1)
            .map(|scc| scc.into_iter().map(|idx| graph[idx].clone()).collect())
            .unwrap_or_else(|| vec![graph[offending].clone()]);
        return Err(crate::error::CompileError::Cyclic(CyclicDependencyError {
            cycle: cycle_names,
        }));
    }

    // Kahn's algorithm with composition-order tie-break among ready nodes, producing a
    // deterministic sequential order.
    let composition_index = |name: &Arc<str>| network.composition_index(name).unwrap_or(usize::MAX);

    let mut in_degree: FnvHashMap<NodeIndex, usize> = FnvHashMap::default();
    for idx in graph.node_indices() {
        in_degree.insert(idx, graph.edges_directed(idx, petgraph::Incoming).count());
    }

    let mut ready: Vec<NodeIndex> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(idx, _)| *idx)
        .collect();
    ready.sort_by_key(|idx| composition_index(&graph[*idx]));

    let mut sequential_order: Vec<Arc<str>> = Vec::with_capacity(kept.len());
    let mut layer_of: FnvHashMap<Arc<str>, usize> = FnvHashMap::default();

    while !ready.is_empty() {
        ready.sort_by_key(|idx| composition_index(&graph[*idx]));
        let idx = ready.remove(0);
        let name = graph[idx].clone();

        let layer = graph
            .edges_directed(idx, petgraph::Incoming)
            .map(|edge| layer_of.get(&graph[edge.source()]).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        layer_of.insert(name.clone(), layer);
        sequential_order.push(name);

        for edge in graph.edges_directed(idx, petgraph::Outgoing).collect::<Vec<_>>() {
            let target = edge.target();
            let deg = in_degree.get_mut(&target).expect("node registered above");
            *deg -= 1;
            if *deg == 0 {
                ready.push(target);
            }
        }
    }

    let layer_count = layer_of.values().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut layers: Vec<Vec<Step>> = vec![Vec::new(); layer_count];
    for name in &sequential_order {
        layers[layer_of[name]].push(Step::Compute(name.clone()));
    }
    for layer in &mut layers {
        layer.sort_by_key(|step| match step {
            Step::Compute(name) => sequential_order.iter().position(|n| n == name).unwrap(),
            Step::Evict(_) => usize::MAX,
        });
    }

    if !config.skip_evictions && config.evict {
        insert_evictions(&mut layers, &kept, asked_outs, &known);
    }

    let kept_operations: Vec<Arc<Operation>> = sequential_order
        .iter()
        .map(|name| kept[name].clone())
        .collect();

    if !comments.is_empty() {
        log::debug!(
            "compiled plan keeps {} of {} operations; {} dropped: {}",
            kept_operations.len(),
            network.iter().count(),
            comments.len(),
            comments.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("; ")
        );
    }

    let key = PlanKey::new(network, known_inputs.to_vec(), asked_outs.to_vec(), predicate);

    Ok(Plan {
        key,
        kept_operations,
        layers,
        asked_outs: asked_outs.to_vec(),
        known_inputs: known_inputs.to_vec(),
        comments,
    })
}

/// Appends an `Evict` step to the layer where each data value's last consumer finishes running,
/// for every value that is not an asked output and not one of the caller's own known inputs.
fn insert_evictions(
    layers: &mut [Vec<Step>],
    kept: &IndexMap<Arc<str>, Arc<Operation>>,
    asked_outs: &[Arc<str>],
    known: &FnvHashSet<Arc<str>>,
) {
    let layer_of_step: FnvHashMap<Arc<str>, usize> = layers
        .iter()
        .enumerate()
        .flat_map(|(i, layer)| {
            layer.iter().filter_map(move |step| match step {
                Step::Compute(name) => Some((name.clone(), i)),
                Step::Evict(_) => None,
            })
        })
        .collect();

    let mut last_consumer_layer: FnvHashMap<Arc<str>, usize> = FnvHashMap::default();
    for op in kept.values() {
        let Some(&layer) = layer_of_step.get(op.name()) else {
            continue;
        };
        for need in op.required_need_names() {
            last_consumer_layer
                .entry(need.clone())
                .and_modify(|l| *l = (*l).max(layer))
                .or_insert(layer);
        }
    }

    for (name, layer) in last_consumer_layer {
        if asked_outs.contains(&name) || known.contains(&name) {
            continue;
        }
        layers[layer].push(Step::Evict(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::{Need, Provide};
    use crate::operation::NamedValues;

    fn op(name: &str, needs: Vec<Need>, provides: Vec<Provide>) -> Operation {
        Operation::builder(name)
            .needs(needs)
            .provides(provides)
            .build(|_: &NamedValues| Ok(NamedValues::new()))
    }

    #[test]
    fn linear_chain_compiles_in_composition_order() {
        let mut net = Network::new();
        net.compose(op("a", vec![], vec![Provide::value("x")])).unwrap();
        net.compose(op("b", vec![Need::value("x")], vec![Provide::value("y")]))
            .unwrap();
        let plan = compile(&net, &[], &[Arc::from("y")], None, &Config::default()).unwrap();
        let order: Vec<&str> = plan.compute_order().map(|n| n.as_ref()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn prunes_operations_not_on_path_to_outputs() {
        let mut net = Network::new();
        net.compose(op("a", vec![], vec![Provide::value("x")])).unwrap();
        net.compose(op("unrelated", vec![], vec![Provide::value("z")]))
            .unwrap();
        let plan = compile(&net, &[], &[Arc::from("x")], None, &Config::default()).unwrap();
        assert_eq!(plan.kept_operations().len(), 1);
        assert_eq!(plan.kept_operations()[0].name().as_ref(), "a");
    }

    #[test]
    fn unsatisfied_need_prunes_dependent_chain() {
        let mut net = Network::new();
        net.compose(op("needs_missing", vec![Need::value("missing")], vec![Provide::value("x")]))
            .unwrap();
        net.compose(op("downstream", vec![Need::value("x")], vec![Provide::value("y")]))
            .unwrap();
        let err = compile(&net, &[], &[Arc::from("y")], None, &Config::default()).unwrap_err();
        assert!(matches!(err, crate::error::CompileError::Unsolvable(_)));
    }

    #[test]
    fn cyclic_dependency_is_detected() {
        let mut net = Network::new();
        net.compose(op("a", vec![Need::value("y")], vec![Provide::value("x")]))
            .unwrap();
        net.compose(op("b", vec![Need::value("x")], vec![Provide::value("y")]))
            .unwrap();
        let err = compile(&net, &[], &[Arc::from("x")], None, &Config::default()).unwrap_err();
        assert!(matches!(err, crate::error::CompileError::Cyclic(_)));
    }

    #[test]
    fn known_inputs_satisfy_needs_without_a_producer() {
        let mut net = Network::new();
        net.compose(op("b", vec![Need::value("x")], vec![Provide::value("y")]))
            .unwrap();
        let plan = compile(
            &net,
            &[Arc::from("x")],
            &[Arc::from("y")],
            None,
            &Config::default(),
        )
        .unwrap();
        assert_eq!(plan.kept_operations().len(), 1);
    }

    #[test]
    fn predicate_filters_operations_before_pruning() {
        let mut net = Network::new();
        net.compose(op("a", vec![], vec![Provide::value("x")])).unwrap();
        net.compose(op("b", vec![], vec![Provide::value("x")])).unwrap();
        let predicate = Predicate::new(|operation| operation.name().as_ref() != "a");
        let plan = compile(&net, &[], &[Arc::from("x")], Some(&predicate), &Config::default()).unwrap();
        let order: Vec<&str> = plan.compute_order().map(|n| n.as_ref()).collect();
        assert_eq!(order, vec!["b"]);
    }
}
