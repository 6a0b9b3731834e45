// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Runs a compiled `Plan` against a set of input values, producing a `Solution`.
//!
//! Each operation an execution visits moves through a small state machine:
//!
//! `Pending` -> `Running` -> one of `Completed`, `Partial`, `FailedEndured`, `FailedFatal`, or
//! `Canceled`.
//!
//! `Partial` is terminal for the operation itself: a `rescheduled` operation that comes back short
//! of its provides is never re-invoked. Instead, the executor recompiles the plan around the gap
//! (`reschedule`, below); any not-yet-run operation that needed the missing data is pruned from
//! the recompiled plan and moves straight to `Canceled`, while everything unaffected by the gap
//! continues on the new plan. `Canceled` is also reached the ordinary way, without ever running the
//! body at all, when a non-optional need's producer itself failed without being endured.

use std::fmt;
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};

use crate::config::Config;
use crate::error::PipelineExecutionError;
use crate::network::Network;
use crate::operation::{ComputeError, NamedValues, Operation};
use crate::plan::{Plan, Step};
use crate::planner;
use crate::predicate::Predicate;
use crate::solution::{Failure, Solution};
use crate::worker::{BoxedTask, WorkerPool};

/// Where a single operation's visit during an execution currently stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationState {
    Pending,
    Running,
    Completed,
    Partial,
    FailedEndured,
    FailedFatal,
    Canceled,
}

/// Everything `execute` needs in order to recompile the plan mid-run when a rescheduled operation
/// delivers a partial result (§4.5.2). Borrowed rather than owned: it only has to live for the
/// duration of one `execute` call, and both `network` and `predicate` are already held elsewhere
/// (the `Pipeline`'s `Network`, the caller's `Predicate`).
pub struct ReplanContext<'a> {
    pub network: &'a Network,
    /// The request's original known inputs, before anything produced during execution is added.
    pub known_inputs: &'a [Arc<str>],
    pub predicate: Option<&'a Predicate>,
}

/// Runs `plan` to completion against `inputs`, using `pool` to run operation bodies.
///
/// Returns `Ok` whenever every fatal (non-endured) operation completed or was never reached;
/// endured failures and cancellations are recorded on the `Solution` rather than surfaced as an
/// error. Returns `Err` as soon as a non-endured operation fails, carrying the partial `Solution`
/// as it stood at that moment.
pub async fn execute<P: WorkerPool>(
    plan: Arc<Plan>,
    inputs: NamedValues,
    pool: &P,
    config: &Config,
    replan: ReplanContext<'_>,
) -> Result<Arc<Solution>, PipelineExecutionError> {
    let mut plan = plan;
    let mut solution = Solution::new(plan.clone());
    let mut delivered: FnvHashSet<Arc<str>> = FnvHashSet::default();
    // Operations whose body has already run in this execution (to any outcome). Excluded from
    // every reschedule recompile so a partial-output operation is never invoked a second time.
    let mut attempted: FnvHashSet<Arc<str>> = FnvHashSet::default();
    // Bounds reschedule to once per operation per execution (§4.5.2); under this design an
    // operation excluded from every subsequent recompile can in practice only trip this once, but
    // the guard is kept explicit rather than assumed.
    let mut rescheduled_ops: FnvHashSet<Arc<str>> = FnvHashSet::default();

    for (name, value) in inputs {
        delivered.insert(name.clone());
        solution
            .set(name, value)
            .expect("a freshly created solution is never finalized");
    }

    let mut layer_idx = 0;
    while layer_idx < plan.layers().len() {
        let layer = plan.layers()[layer_idx].clone();

        let compute_steps: Vec<Arc<str>> = layer
            .iter()
            .filter_map(|step| match step {
                Step::Compute(name) => Some(name.clone()),
                Step::Evict(_) => None,
            })
            .collect();

        let mut outcomes_by_name: FnvHashMap<Arc<str>, RunOutcome> = FnvHashMap::default();
        if config.parallel_tasks && compute_steps.len() > 1 {
            // Worker-pool mode is engaged for this layer, but only `parallel=true` ops join the
            // concurrent batch (§4.5.3); `parallel=false` ops still belong to this layer, they
            // just run in isolation, one at a time, once the concurrent batch has drained.
            let (parallel_names, serial_names): (Vec<Arc<str>>, Vec<Arc<str>>) = compute_steps
                .iter()
                .cloned()
                .partition(|name| plan.operation(name).map(|op| op.is_parallel()).unwrap_or(false));

            if !parallel_names.is_empty() {
                let outcomes =
                    run_layer_parallel(&plan, &parallel_names, &solution, &delivered, config, pool)
                        .await;
                outcomes_by_name.extend(parallel_names.into_iter().zip(outcomes));
            }
            for name in serial_names {
                let outcome = run_one(&plan, &name, &solution, &delivered, config, pool).await;
                outcomes_by_name.insert(name, outcome);
            }
        } else {
            for name in &compute_steps {
                let outcome = run_one(&plan, name, &solution, &delivered, config, pool).await;
                outcomes_by_name.insert(name.clone(), outcome);
            }
        }
        let outcomes: Vec<RunOutcome> = compute_steps
            .iter()
            .map(|name| {
                outcomes_by_name
                    .remove(name)
                    .expect("every compute step in this layer was run above")
            })
            .collect();

        // Every outcome in this layer is settled before we act on a fatal failure: per §5, running
        // (or already-completed) siblings in the same parallel layer finish and have their
        // results/failures recorded even though the layer as a whole is about to abort.
        let mut needs_replan = false;
        let mut fatal: Option<Box<dyn std::error::Error + Send + Sync>> = None;
        for (name, outcome) in compute_steps.into_iter().zip(outcomes) {
            if matches!(outcome, RunOutcome::Ran(_)) {
                attempted.insert(name.clone());
            }
            match settle(
                &plan,
                &name,
                outcome,
                &mut solution,
                &mut delivered,
                &mut rescheduled_ops,
                config,
            ) {
                Settled::Continue => {}
                Settled::NeedsReplan => needs_replan = true,
                Settled::Fatal(cause) => {
                    if fatal.is_none() {
                        fatal = Some(cause);
                    }
                }
            }
        }

        for step in &layer {
            if let Step::Evict(name) = step {
                let _ = solution.evict(name);
            }
        }

        if let Some(cause) = fatal {
            cancel_pending(&plan, layer_idx + 1, &mut solution);
            solution.finalize();
            return Err(PipelineExecutionError {
                cause,
                solution: Arc::new(solution),
            });
        }

        if needs_replan {
            log::info!("recompiling plan after a partial result; layer {layer_idx} triggered replan");
            let (new_plan, newly_canceled) = reschedule_plan(&plan, &replan, &solution, &attempted, config);
            for name in newly_canceled {
                let _ = solution.mark_canceled(name.clone());
                let _ = solution.record_failure(name, Failure::Canceled);
            }
            plan = new_plan;
            solution.plan = plan.clone();
            layer_idx = 0;
            continue;
        }

        layer_idx += 1;
    }

    solution.finalize();
    Ok(Arc::new(solution))
}

/// Recompiles the plan around a partial result: `known_inputs` grows to include everything
/// currently in the solution (so operations that already delivered their output are satisfied
/// without re-running), and every already-attempted operation is excluded from the recompile
/// (so it is never invoked twice and, if it was the one that came up short, its other consumers
/// become unreachable and fall out of the plan, which is exactly the pruning §4.5.2 asks for).
///
/// Returns the new plan alongside the names of operations that were kept in `old_plan` but did
/// not run and fell out of the new plan (these are the newly canceled ones). The caller applies
/// that to the `Solution` itself, since this function only holds a shared borrow of it.
fn reschedule_plan(
    old_plan: &Plan,
    replan: &ReplanContext<'_>,
    solution: &Solution,
    attempted: &FnvHashSet<Arc<str>>,
    config: &Config,
) -> (Arc<Plan>, Vec<Arc<str>>) {
    let mut new_known: Vec<Arc<str>> = replan.known_inputs.to_vec();
    new_known.extend(solution.iter().map(|(name, _)| name.clone()));

    let attempted_snapshot = attempted.clone();
    let outer_predicate = replan.predicate.cloned();
    let excluding_attempted = Predicate::new(move |op| {
        !attempted_snapshot.contains(op.name())
            && outer_predicate.as_ref().map(|p| p.allows(op)).unwrap_or(true)
    });

    let new_plan = planner::compile_lenient(
        replan.network,
        &new_known,
        old_plan.asked_outs(),
        Some(&excluding_attempted),
        config,
    );

    let new_kept: FnvHashSet<Arc<str>> =
        new_plan.kept_operations().iter().map(|op| op.name().clone()).collect();
    let newly_canceled: Vec<Arc<str>> = old_plan
        .kept_operations()
        .iter()
        .map(|op| op.name())
        .filter(|name| {
            !attempted.contains(*name) && !new_kept.contains(*name) && !solution.canceled().contains(*name)
        })
        .cloned()
        .collect();

    (Arc::new(new_plan), newly_canceled)
}

/// Marks every kept operation from `from_layer` onward that has not already reached a terminal
/// state as `Canceled`, per §5's "fatal failure triggers cancellation of all pending steps".
fn cancel_pending(plan: &Plan, from_layer: usize, solution: &mut Solution) {
    for layer in &plan.layers()[from_layer.min(plan.layers().len())..] {
        for step in layer {
            if let Step::Compute(name) = step {
                if solution.executed().contains(name)
                    || solution.canceled().contains(name)
                    || solution.failures().contains_key(name)
                {
                    continue;
                }
                let _ = solution.mark_canceled(name.clone());
                let _ = solution.record_failure(name.clone(), Failure::Canceled);
            }
        }
    }
}

enum RunOutcome {
    Canceled,
    Ran(Result<NamedValues, ComputeError>),
}

enum Settled {
    Continue,
    NeedsReplan,
    Fatal(Box<dyn std::error::Error + Send + Sync>),
}

async fn run_layer_parallel<P: WorkerPool>(
    plan: &Arc<Plan>,
    names: &[Arc<str>],
    solution: &Solution,
    delivered: &FnvHashSet<Arc<str>>,
    config: &Config,
    pool: &P,
) -> Vec<RunOutcome> {
    let mut futures = Vec::with_capacity(names.len());
    for name in names {
        if is_upstream_blocked(plan, name, delivered) {
            futures.push(None);
            continue;
        }
        crate::test_trace_log!("starting step `{name}`");
        let op = plan.operation(name).expect("scheduled step is a kept operation").clone();
        let available = snapshot(solution);
        let debug = config.debug;
        let task: BoxedTask<Result<NamedValues, ComputeError>> = Box::pin(async move {
            let allow_partial = op.is_rescheduled();
            op.compute(&available, allow_partial, debug)
        });
        futures.push(Some((name.clone(), pool.submit(task))));
    }

    let mut outcomes = Vec::with_capacity(names.len());
    for slot in futures {
        match slot {
            None => outcomes.push(RunOutcome::Canceled),
            Some((name, fut)) => {
                let outcome = RunOutcome::Ran(fut.await);
                crate::test_trace_log!("finished step `{name}`");
                outcomes.push(outcome);
            }
        }
    }
    outcomes
}

async fn run_one<P: WorkerPool>(
    plan: &Arc<Plan>,
    name: &Arc<str>,
    solution: &Solution,
    delivered: &FnvHashSet<Arc<str>>,
    config: &Config,
    pool: &P,
) -> RunOutcome {
    if is_upstream_blocked(plan, name, delivered) {
        return RunOutcome::Canceled;
    }

    crate::test_trace_log!("starting step `{name}`");
    let op = plan.operation(name).expect("scheduled step is a kept operation").clone();
    let available = snapshot(solution);
    let allow_partial = op.is_rescheduled();

    let debug = config.debug;
    let outcome = if config.marshal_tasks {
        let task: BoxedTask<Result<NamedValues, ComputeError>> =
            Box::pin(async move { op.compute(&available, allow_partial, debug) });
        RunOutcome::Ran(pool.submit(task).await)
    } else {
        RunOutcome::Ran(op.compute(&available, allow_partial, debug))
    };
    crate::test_trace_log!("finished step `{name}`");
    outcome
}

fn is_upstream_blocked(plan: &Plan, name: &Arc<str>, delivered: &FnvHashSet<Arc<str>>) -> bool {
    let op = plan.operation(name).expect("scheduled step is a kept operation");
    op.blocking_need_names().any(|need| !delivered.contains(need))
}

fn snapshot(solution: &Solution) -> NamedValues {
    solution.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[allow(clippy::too_many_arguments)]
fn settle(
    plan: &Arc<Plan>,
    name: &Arc<str>,
    outcome: RunOutcome,
    solution: &mut Solution,
    delivered: &mut FnvHashSet<Arc<str>>,
    rescheduled_ops: &mut FnvHashSet<Arc<str>>,
    config: &Config,
) -> Settled {
    let op = plan.operation(name).expect("scheduled step is a kept operation").clone();

    let result = match outcome {
        RunOutcome::Canceled => {
            let _ = solution.mark_canceled(name.clone());
            let _ = solution.record_failure(name.clone(), Failure::Canceled);
            log::debug!("operation `{name}` canceled: an upstream dependency did not deliver");
            return Settled::Continue;
        }
        RunOutcome::Ran(result) => result,
    };

    match result {
        Ok(output) => {
            let missing = op.missing_provides(&output);
            apply(&op, output, solution, delivered);
            if missing.is_empty() {
                let _ = solution.mark_executed(name.clone());
                Settled::Continue
            } else if config.reschedule_enabled && rescheduled_ops.insert(name.clone()) {
                log::info!("operation `{name}` delivered a partial result, missing {missing:?}; scheduling a replan");
                let _ = solution.mark_executed(name.clone());
                let _ = solution.record_failure(name.clone(), Failure::PartialAfterReschedule(name.clone()));
                Settled::NeedsReplan
            } else if config.reschedule_enabled {
                fail(
                    &op,
                    name,
                    solution,
                    config,
                    Box::new(crate::error::PartialOutputFailure {
                        operation: name.clone(),
                        missing,
                    }),
                )
            } else {
                fail(
                    &op,
                    name,
                    solution,
                    config,
                    Box::new(crate::error::MissingOutputsError {
                        operation: name.clone(),
                        missing,
                    }),
                )
            }
        }
        Err(err) => fail(&op, name, solution, config, Box::new(err)),
    }
}

fn apply(op: &Operation, output: NamedValues, solution: &mut Solution, delivered: &mut FnvHashSet<Arc<str>>) {
    for (key, value) in output {
        delivered.insert(key.clone());
        let _ = solution.set(key, value);
    }
    for provide in op.provides() {
        // Sideffect tokens never appear in `output` (they carry no value), but the operation
        // having run to this point still satisfies anything ordered after it on that token.
        if provide.is_sideffect() {
            delivered.insert(provide.base_name().clone());
            continue;
        }
        if let Some(alias) = provide.alias_target() {
            if delivered.contains(provide.base_name()) {
                delivered.insert(alias.clone());
            }
        }
    }
}

fn fail(
    op: &Operation,
    name: &Arc<str>,
    solution: &mut Solution,
    config: &Config,
    cause: Box<dyn std::error::Error + Send + Sync>,
) -> Settled {
    if op.is_endured() || config.endure_operations {
        log::warn!("operation `{name}` failed but is endured, continuing: {cause}");
        let _ = solution.mark_executed(name.clone());
        let _ = solution.record_failure(name.clone(), Failure::Endured(name.clone()));
        Settled::Continue
    } else {
        Settled::Fatal(cause)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationState::Pending => "pending",
            OperationState::Running => "running",
            OperationState::Completed => "completed",
            OperationState::Partial => "partial",
            OperationState::FailedEndured => "failed (endured)",
            OperationState::FailedFatal => "failed (fatal)",
            OperationState::Canceled => "canceled",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::{Need, Provide};
    use crate::network::Network;
    use crate::planner;
    use crate::worker::TokioWorkerPool;
    use serde_json::json;

    fn pool() -> TokioWorkerPool {
        TokioWorkerPool::new(task_executor::Executor::new())
    }

    fn ctx<'a>(network: &'a Network, known_inputs: &'a [Arc<str>]) -> ReplanContext<'a> {
        ReplanContext {
            network,
            known_inputs,
            predicate: None,
        }
    }

    #[tokio::test]
    async fn a_simple_chain_executes_in_order() {
        let mut net = Network::new();
        net.compose(
            Operation::builder("double")
                .needs([Need::value("x")])
                .provides([Provide::value("y")])
                .build(|inputs: &NamedValues| {
                    let x = inputs.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok([(Arc::from("y"), json!(x * 2))].into_iter().collect())
                }),
        )
        .unwrap();

        let known_inputs = vec![Arc::from("x")];
        let plan = Arc::new(
            planner::compile(&net, &known_inputs, &[Arc::from("y")], None, &Config::default())
                .unwrap(),
        );
        let inputs: NamedValues = [(Arc::from("x"), json!(21))].into_iter().collect();
        let solution = execute(plan, inputs, &pool(), &Config::default(), ctx(&net, &known_inputs))
            .await
            .unwrap();
        assert_eq!(solution.get("y"), Some(&json!(42)));
        assert_eq!(solution.executed(), &[Arc::from("double")]);
    }

    #[tokio::test]
    async fn endured_failure_cancels_dependents_without_aborting() {
        let mut net = Network::new();
        net.compose(
            Operation::builder("flaky")
                .provides([Provide::value("a")])
                .endured(true)
                .build(|_: &NamedValues| Err("boom".into())),
        )
        .unwrap();
        net.compose(
            Operation::builder("depends")
                .needs([Need::value("a")])
                .provides([Provide::value("b")])
                .build(|_: &NamedValues| Ok(NamedValues::new())),
        )
        .unwrap();
        net.compose(
            Operation::builder("independent")
                .provides([Provide::value("c")])
                .build(|_: &NamedValues| Ok([(Arc::from("c"), json!(1))].into_iter().collect())),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let plan = Arc::new(
            planner::compile(
                &net,
                &known_inputs,
                &[Arc::from("b"), Arc::from("c")],
                None,
                &Config::default(),
            )
            .unwrap(),
        );
        let solution = execute(
            plan,
            NamedValues::new(),
            &pool(),
            &Config::default(),
            ctx(&net, &known_inputs),
        )
        .await
        .unwrap();

        assert!(solution.failures().contains_key(&Arc::from("flaky")));
        assert!(solution.canceled().contains(&Arc::from("depends")));
        assert_eq!(solution.get("c"), Some(&json!(1)));
        // an endured failure still ran to a terminal (non-canceled) state, so it counts
        // as executed alongside the independent op that actually succeeded.
        assert!(solution.executed().contains(&Arc::from("flaky")));
        assert!(solution.executed().contains(&Arc::from("independent")));
        assert!(!solution.executed().contains(&Arc::from("depends")));
    }

    #[tokio::test]
    async fn non_endured_failure_aborts_with_partial_solution() {
        let mut net = Network::new();
        net.compose(
            Operation::builder("fatal")
                .provides([Provide::value("a")])
                .build(|_: &NamedValues| Err("boom".into())),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let plan = Arc::new(
            planner::compile(&net, &known_inputs, &[Arc::from("a")], None, &Config::default())
                .unwrap(),
        );
        let err = execute(
            plan,
            NamedValues::new(),
            &pool(),
            &Config::default(),
            ctx(&net, &known_inputs),
        )
        .await
        .unwrap_err();
        assert!(err.solution.executed().is_empty());
    }

    #[tokio::test]
    async fn non_endured_failure_cancels_downstream_ops_in_later_layers() {
        let mut net = Network::new();
        net.compose(
            Operation::builder("fatal")
                .provides([Provide::value("a")])
                .build(|_: &NamedValues| Err("boom".into())),
        )
        .unwrap();
        net.compose(
            Operation::builder("downstream")
                .needs([Need::value("a")])
                .provides([Provide::value("b")])
                .build(|_: &NamedValues| Ok(NamedValues::new())),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let plan = Arc::new(
            planner::compile(&net, &known_inputs, &[Arc::from("b")], None, &Config::default())
                .unwrap(),
        );
        let err = execute(
            plan,
            NamedValues::new(),
            &pool(),
            &Config::default(),
            ctx(&net, &known_inputs),
        )
        .await
        .unwrap_err();

        assert!(err.solution.executed().is_empty());
        assert!(err.solution.canceled().contains(&Arc::from("downstream")));
    }

    #[tokio::test]
    async fn rescheduled_operation_prunes_consumers_of_the_missing_output() {
        let mut net = Network::new();
        net.compose(
            Operation::builder("sometimes_partial")
                .provides([Provide::value("a"), Provide::value("b")])
                .rescheduled(true)
                .build(move |_: &NamedValues| Ok([(Arc::from("a"), json!(1))].into_iter().collect())),
        )
        .unwrap();
        net.compose(
            Operation::builder("consumes_a")
                .needs([Need::value("a")])
                .provides([Provide::value("a_out")])
                .build(|inputs: &NamedValues| {
                    Ok([(Arc::from("a_out"), inputs.get("a").cloned().unwrap())].into_iter().collect())
                }),
        )
        .unwrap();
        net.compose(
            Operation::builder("consumes_b")
                .needs([Need::value("b")])
                .provides([Provide::value("b_out")])
                .build(|inputs: &NamedValues| {
                    Ok([(Arc::from("b_out"), inputs.get("b").cloned().unwrap())].into_iter().collect())
                }),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let plan = Arc::new(
            planner::compile(
                &net,
                &known_inputs,
                &[Arc::from("a_out"), Arc::from("b_out")],
                None,
                &Config::default(),
            )
            .unwrap(),
        );
        let solution = execute(
            plan,
            NamedValues::new(),
            &pool(),
            &Config::default(),
            ctx(&net, &known_inputs),
        )
        .await
        .unwrap();

        assert_eq!(solution.get("a_out"), Some(&json!(1)));
        assert!(solution.get("b_out").is_none());
        assert!(solution.canceled().contains(&Arc::from("consumes_b")));
        assert!(solution.executed().contains(&Arc::from("sometimes_partial")));
        assert!(solution.executed().contains(&Arc::from("consumes_a")));
    }

    #[tokio::test]
    async fn rescheduled_operation_without_affected_consumers_succeeds_quietly() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_body = calls.clone();

        let mut net = Network::new();
        net.compose(
            Operation::builder("sometimes_partial")
                .provides([Provide::value("a"), Provide::value("b")])
                .rescheduled(true)
                .build(move |_: &NamedValues| {
                    calls_for_body.fetch_add(1, Ordering::SeqCst);
                    Ok([(Arc::from("a"), json!(1))].into_iter().collect())
                }),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let plan = Arc::new(
            planner::compile(
                &net,
                &known_inputs,
                &[Arc::from("a"), Arc::from("b")],
                None,
                &Config::default(),
            )
            .unwrap(),
        );
        let solution = execute(
            plan,
            NamedValues::new(),
            &pool(),
            &Config::default(),
            ctx(&net, &known_inputs),
        )
        .await
        .unwrap();

        // The body only ever runs once: a rescheduled operation is never retried, only the plan
        // around it is recompiled.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(solution.get("a"), Some(&json!(1)));
        assert!(solution.get("b").is_none());
    }

    #[tokio::test]
    async fn sideffect_need_orders_after_its_producer_and_still_runs() {
        let mut net = Network::new();
        net.compose(
            Operation::builder("acquire_lock")
                .provides([Provide::sideffect("lock"), Provide::value("a")])
                .build(|_: &NamedValues| Ok([(Arc::from("a"), json!(1))].into_iter().collect())),
        )
        .unwrap();
        net.compose(
            Operation::builder("guarded")
                .needs([Need::value("a"), Need::sideffect("lock")])
                .provides([Provide::value("out")])
                .build(|inputs: &NamedValues| {
                    Ok([(Arc::from("out"), inputs.get("a").cloned().unwrap())].into_iter().collect())
                }),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let plan = Arc::new(
            planner::compile(&net, &known_inputs, &[Arc::from("out")], None, &Config::default())
                .unwrap(),
        );
        let solution = execute(
            plan,
            NamedValues::new(),
            &pool(),
            &Config::default(),
            ctx(&net, &known_inputs),
        )
        .await
        .unwrap();

        assert_eq!(solution.get("out"), Some(&json!(1)));
        assert!(solution.executed().contains(&Arc::from("guarded")));
        assert!(!solution.canceled().contains(&Arc::from("guarded")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_false_operations_run_serially_after_the_parallel_batch_drains() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::time::Duration;

        let concurrent = Arc::new(AtomicUsize::new(0));
        let saw_overlap = Arc::new(AtomicBool::new(false));
        let par_a_done = Arc::new(AtomicBool::new(false));
        let par_b_done = Arc::new(AtomicBool::new(false));
        let serial_overlapped_parallel = Arc::new(AtomicBool::new(false));

        let mut net = Network::new();
        for (name, out, done_flag) in [
            ("par_a", "out_a", par_a_done.clone()),
            ("par_b", "out_b", par_b_done.clone()),
        ] {
            let concurrent = concurrent.clone();
            let saw_overlap = saw_overlap.clone();
            net.compose(
                Operation::builder(name)
                    .provides([Provide::value(out)])
                    .parallel(true)
                    .build(move |_: &NamedValues| {
                        if concurrent.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                            saw_overlap.store(true, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(30));
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        done_flag.store(true, Ordering::SeqCst);
                        Ok(NamedValues::new())
                    }),
            )
            .unwrap();
        }
        let serial_overlapped_for_body = serial_overlapped_parallel.clone();
        let par_a_done_for_body = par_a_done.clone();
        let par_b_done_for_body = par_b_done.clone();
        net.compose(
            Operation::builder("serial_one")
                .provides([Provide::value("out_serial")])
                .parallel(false)
                .build(move |_: &NamedValues| {
                    if !par_a_done_for_body.load(Ordering::SeqCst)
                        || !par_b_done_for_body.load(Ordering::SeqCst)
                    {
                        serial_overlapped_for_body.store(true, Ordering::SeqCst);
                    }
                    Ok(NamedValues::new())
                }),
        )
        .unwrap();

        let known_inputs: Vec<Arc<str>> = vec![];
        let outputs = [Arc::from("out_a"), Arc::from("out_b"), Arc::from("out_serial")];
        let config = Config { parallel_tasks: true, ..Config::default() };
        let plan =
            Arc::new(planner::compile(&net, &known_inputs, &outputs, None, &config).unwrap());
        let solution = execute(plan, NamedValues::new(), &pool(), &config, ctx(&net, &known_inputs))
            .await
            .unwrap();

        assert_eq!(solution.executed().len(), 3);
        assert!(saw_overlap.load(Ordering::SeqCst), "parallel=true ops should run concurrently");
        assert!(
            !serial_overlapped_parallel.load(Ordering::SeqCst),
            "parallel=false op must not start until the parallel batch has drained"
        );
    }
}
