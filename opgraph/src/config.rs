// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Runtime configuration, with a scoped override stack for tests and nested calls.
//!
//! Most callers just build a `Config` once and pass it to a `Pipeline`. Tests that need to
//! flip one knob for the duration of a single call (e.g. disabling eviction to inspect
//! intermediate values) use `ConfigScope` instead of threading a whole new `Config` through.

use std::cell::RefCell;

/// Knobs that affect planning and execution but never the shape of a `Solution`'s successful
/// values: callers can freely change these between runs of the same plan.
#[derive(Clone, Debug)]
pub struct Config {
    /// Evict data values from the running solution as soon as their last dependent operation has
    /// consumed them, to bound peak memory on long chains.
    pub evict: bool,
    /// Run independent operations within a scheduling layer concurrently via the worker pool.
    pub parallel_tasks: bool,
    /// Hand bodies to the worker pool even when running sequentially, instead of calling them
    /// inline. Mostly useful for bodies that assume they're off the calling thread.
    pub marshal_tasks: bool,
    /// Disable eviction-step insertion at plan time, even when `evict` is set. Only meant for
    /// diagnosing the planner itself; leave this `false` in production.
    pub skip_evictions: bool,
    /// Allow `rescheduled` operations to recompile and retry once after delivering a partial
    /// result. When `false`, any partial result is treated as `MissingOutputsError`.
    pub reschedule_enabled: bool,
    /// Treat every operation as `endured` regardless of its own flag: a fatal failure cancels
    /// only its dependents instead of aborting the whole execution. Useful for best-effort runs.
    pub endure_operations: bool,
    /// Enriches error `Display` output with extra diagnostic context (the offending call
    /// inputs on a `UserFnError`, the pruned-operation chain on an `UnsolvableGraphError`)
    /// without changing control flow: planning and execution proceed identically either way.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            evict: true,
            parallel_tasks: false,
            marshal_tasks: false,
            skip_evictions: false,
            reschedule_enabled: true,
            endure_operations: false,
            debug: false,
        }
    }
}

thread_local! {
    static OVERRIDE_STACK: RefCell<Vec<Config>> = const { RefCell::new(Vec::new()) };
}

/// Pushes a temporary `Config` override onto this thread's stack; pops it back off on drop.
///
/// `Config` lookups consult the top of the stack first, falling back to whatever `Config` the
/// caller explicitly passed in. This lets test helpers or nested pipeline calls override one
/// setting without rebuilding and re-threading a whole `Config`.
pub struct ConfigScope {
    _private: (),
}

impl ConfigScope {
    pub fn push(config: Config) -> Self {
        OVERRIDE_STACK.with(|stack| stack.borrow_mut().push(config));
        ConfigScope { _private: () }
    }

    /// The innermost active override on this thread, if any.
    pub fn current() -> Option<Config> {
        OVERRIDE_STACK.with(|stack| stack.borrow().last().cloned())
    }
}

impl Drop for ConfigScope {
    fn drop(&mut self) {
        OVERRIDE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Resolves the effective `Config` for a call: the innermost `ConfigScope` override if one is
/// active on this thread, otherwise `base`.
pub fn effective(base: &Config) -> Config {
    ConfigScope::current().unwrap_or_else(|| base.clone())
}
