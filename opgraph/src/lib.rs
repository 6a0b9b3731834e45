// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]

//! Compose named, side-effect-free operations into a network, compile a pruned execution plan
//! for a given request shape, and run it into a `Solution`.
//!
//! A typical caller builds a `Network` once at startup (`Network::compose` each `Operation`),
//! wraps it in a `Pipeline`, and calls `Pipeline::run` per request with the inputs it has on hand
//! and the outputs it wants. The pipeline compiles (or reuses a cached compile of) a `Plan`
//! pruned down to exactly what's reachable between those inputs and outputs, then executes it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use opgraph::name::{Need, Provide};
//! use opgraph::operation::{NamedValues, Operation};
//! use opgraph::network::Network;
//! use opgraph::{Config, Pipeline};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut network = Network::new();
//! network.compose(
//!     Operation::builder("double")
//!         .needs([Need::value("x")])
//!         .provides([Provide::value("y")])
//!         .build(|inputs: &NamedValues| {
//!             let x = inputs.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
//!             Ok([(Arc::from("y"), serde_json::json!(x * 2))].into_iter().collect())
//!         }),
//! )?;
//!
//! let pipeline = Pipeline::new(network, Config::default());
//! let inputs: NamedValues = [(Arc::from("x"), serde_json::json!(21))].into_iter().collect();
//! let solution = pipeline.run(inputs, &[Arc::from("y")]).await?;
//! assert_eq!(solution.get("y"), Some(&serde_json::json!(42)));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod name;
pub mod network;
pub mod operation;
pub mod plan;
pub mod planner;
pub mod predicate;
pub mod solution;
pub mod worker;

use std::sync::Arc;

pub use config::{Config, ConfigScope};
pub use error::{CompileError, PipelineExecutionError};
pub use name::{ModifiedName, Need, Provide};
pub use network::{Composition, Network};
pub use operation::{NamedValues, Operation, OperationBody};
pub use plan::{Plan, PlanComment, Step};
pub use predicate::Predicate;
pub use solution::Solution;
pub use worker::{TokioWorkerPool, WorkerPool};

use cache::PlanCache;

/// Ties a `Network` to a plan cache and a default `Config`, and runs requests against it.
///
/// Cheap to clone: the network and cache are held behind `Arc`, so cloning a `Pipeline` shares
/// both with the original.
#[derive(Clone)]
pub struct Pipeline {
    network: Arc<Network>,
    cache: Arc<PlanCache>,
    pool: Arc<TokioWorkerPool>,
    config: Config,
}

impl Pipeline {
    /// Builds a `Pipeline` bound to the calling thread's tokio runtime. Must be called from
    /// within a runtime (inside `#[tokio::main]`/`#[tokio::test]`, or after entering one with
    /// `Runtime::enter`), the same requirement `task_executor::Executor::new()` has.
    pub fn new(network: Network, config: Config) -> Self {
        Self::with_cache_capacity(network, config, cache::DEFAULT_CAPACITY)
    }

    pub fn with_cache_capacity(network: Network, config: Config, cache_capacity: usize) -> Self {
        Self {
            network: Arc::new(network),
            cache: Arc::new(PlanCache::new(cache_capacity)),
            pool: Arc::new(TokioWorkerPool::new(task_executor::Executor::new())),
            config,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compiles (or reuses a cached compile of) a plan that can produce `outputs` from `inputs`,
    /// without running it. Useful for validating a request shape ahead of time, or for
    /// introspecting `Plan::comments()`.
    pub fn compile(
        &self,
        known_inputs: &[Arc<str>],
        outputs: &[Arc<str>],
        predicate: Option<&Predicate>,
    ) -> Result<Arc<Plan>, CompileError> {
        let effective_config = config::effective(&self.config);
        self.cache.get_or_compile(
            &self.network,
            known_inputs,
            outputs,
            predicate,
            &effective_config,
        )
    }

    /// Compiles and runs a request in one call, against the plain tokio worker pool.
    pub async fn run(
        &self,
        inputs: NamedValues,
        outputs: &[Arc<str>],
    ) -> Result<Arc<Solution>, RunError> {
        self.run_with_predicate(inputs, outputs, None).await
    }

    /// As `run`, but additionally filters the network through `predicate` before compiling.
    pub async fn run_with_predicate(
        &self,
        inputs: NamedValues,
        outputs: &[Arc<str>],
        predicate: Option<&Predicate>,
    ) -> Result<Arc<Solution>, RunError> {
        let known_inputs: Vec<Arc<str>> = inputs.keys().cloned().collect();
        let plan = self
            .compile(&known_inputs, outputs, predicate)
            .map_err(RunError::Compile)?;

        let effective_config = config::effective(&self.config);
        let replan = executor::ReplanContext {
            network: &self.network,
            known_inputs: &known_inputs,
            predicate,
        };
        executor::execute(plan, inputs, self.pool.as_ref(), &effective_config, replan)
            .await
            .map_err(RunError::Execution)
    }
}

/// Logs at trace level, but only in `cfg(test)`: per-step start/finish narration is useful while
/// developing against this crate but has no place in a release build's trace output.
#[macro_export]
macro_rules! test_trace_log {
    ($($arg:tt)+) => {
      #[cfg(test)]
      {
        log::trace!($($arg)+)
      }
    };
}

/// Everything that can go wrong running a `Pipeline` end to end.
#[derive(Debug)]
pub enum RunError {
    Compile(CompileError),
    Execution(PipelineExecutionError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Compile(e) => e.fmt(f),
            RunError::Execution(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Compile(e) => Some(e),
            RunError::Execution(e) => Some(e),
        }
    }
}
