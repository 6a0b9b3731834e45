// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! An LRU cache of compiled plans, keyed by network identity plus request shape.
//!
//! Compiling a plan walks the whole operation graph; most pipelines run the same handful of
//! input/output/predicate combinations over and over; caching the result avoids recompiling on
//! every call. The cache is coarse-locked: compiling a fresh plan happens under the same mutex
//! that protects the cache, so two concurrent misses for the same key do only one compile between
//! them at the cost of serializing unrelated misses too. That tradeoff is the right one at this
//! crate's expected plan-cache sizes; see `DESIGN.md`.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::CompileError;
use crate::network::Network;
use crate::plan::{Plan, PlanKey};
use crate::predicate::Predicate;

/// Default capacity when a caller doesn't specify one; generous enough for most pipelines to
/// never evict a plan they'll ask for again.
pub const DEFAULT_CAPACITY: usize = 128;

/// A plan cache bound to one `Network`. Hold one per long-lived pipeline; compiling against a
/// different `Network` should use a different cache since `PlanKey`'s identity is network-scoped.
pub struct PlanCache {
    inner: Mutex<LruCache<CacheKey, Arc<Plan>>>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey(PlanKey);

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to at least 1"),
            )),
        }
    }

    /// Returns a cached plan for this request shape, compiling and inserting one if absent.
    pub fn get_or_compile(
        &self,
        network: &Network,
        known_inputs: &[Arc<str>],
        asked_outs: &[Arc<str>],
        predicate: Option<&Predicate>,
        config: &Config,
    ) -> Result<Arc<Plan>, CompileError> {
        let key = CacheKey(PlanKey::new(
            network,
            known_inputs.to_vec(),
            asked_outs.to_vec(),
            predicate,
        ));

        let mut guard = self.inner.lock();
        if let Some(plan) = guard.get(&key) {
            return Ok(plan.clone());
        }

        // Compile while still holding the lock: a second concurrent miss for the same key blocks
        // here rather than racing a duplicate compile, at the cost of blocking unrelated misses.
        let plan = Arc::new(crate::planner::compile(
            network,
            known_inputs,
            asked_outs,
            predicate,
            config,
        )?);
        guard.put(key, plan.clone());
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Provide;
    use crate::operation::{NamedValues, Operation};

    fn network() -> Network {
        let mut net = Network::new();
        net.compose(
            Operation::builder("a")
                .provides([Provide::value("x")])
                .build(|_: &NamedValues| Ok(NamedValues::new())),
        )
        .unwrap();
        net
    }

    #[test]
    fn repeated_requests_hit_the_cache() {
        let net = network();
        let cache = PlanCache::new(4);
        let config = Config::default();
        let outs = vec![Arc::from("x")];

        let first = cache.get_or_compile(&net, &[], &outs, None, &config).unwrap();
        let second = cache.get_or_compile(&net, &[], &outs, None, &config).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_output_sets_produce_distinct_entries() {
        let net = network();
        let cache = PlanCache::new(4);
        let config = Config::default();

        cache
            .get_or_compile(&net, &[], &[Arc::from("x")], None, &config)
            .unwrap();
        cache.get_or_compile(&net, &[], &[], None, &config).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
