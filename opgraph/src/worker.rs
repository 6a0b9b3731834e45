// Copyright 2026 The opgraph Authors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The worker pool abstraction the executor submits operation bodies to.
//!
//! The executor itself never spawns a thread or a tokio task directly: it only ever calls
//! `WorkerPool::submit`. That keeps the executor runtime-agnostic and lets an embedding
//! application supply its own pool (a rayon pool, an actor mailbox, whatever it already runs)
//! by implementing this trait, the same way `task_executor::Executor` is the one place in this
//! workspace that owns a `tokio::Runtime`.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

/// A unit of work submitted to a `WorkerPool`: runs to completion and returns its result.
pub type BoxedTask<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Runs operation bodies, potentially off the calling task.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Runs `task` to completion, however this pool schedules work, and returns its result.
    async fn submit<T: Send + 'static>(&self, task: BoxedTask<T>) -> T;
}

/// A `WorkerPool` backed by a `task_executor::Executor`, so callers get tokio's multi-threaded
/// scheduler without the executor module depending on tokio directly.
pub struct TokioWorkerPool {
    executor: task_executor::Executor,
}

impl TokioWorkerPool {
    pub fn new(executor: task_executor::Executor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl WorkerPool for TokioWorkerPool {
    async fn submit<T: Send + 'static>(&self, task: BoxedTask<T>) -> T {
        self.executor
            .spawn(task, |join_error| {
                panic!("operation body task panicked: {join_error}")
            })
            .await
    }
}
