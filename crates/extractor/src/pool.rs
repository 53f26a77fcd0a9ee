//! Bounded pool for per-entry work inside one extraction.
//!
//! Submission waits for a free slot, so at most `limit` units run at once and
//! later entries queue in submission order. Completion order is unconstrained.
//! The pool lives for one `extract` call: [`WorkerPool::join`] returns once
//! every submitted unit has finished.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::{AcquireError, Semaphore};
use tokio::task::{JoinError, JoinSet};

/// Bounded set of concurrently running tasks producing `T`.
pub struct WorkerPool<T> {
    slots: Arc<Semaphore>,
    tasks: JoinSet<T>,
    limit: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Pool allowing `limit` units in flight (at least one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
            limit,
        }
    }

    /// Maximum number of units in flight.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Wait for a free slot, then start `unit` on the runtime.
    pub async fn submit<F>(&mut self, unit: F) -> Result<(), AcquireError>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let slot = self.slots.clone().acquire_owned().await?;
        self.tasks.spawn(async move {
            let output = unit.await;
            drop(slot);
            output
        });
        Ok(())
    }

    /// Wait for every submitted unit. Panicked units come back as `Err`.
    pub async fn join(mut self) -> Vec<Result<T, JoinError>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(result) = self.tasks.join_next().await {
            results.push(result);
        }
        results
    }
}
