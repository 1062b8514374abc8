//! Shared live-state adapters: task store, FIFO queue, run tracker.
//!
//! All in-flight scheduling state lives behind these traits so that multiple
//! scheduler instances observe a single consistent view. The production
//! implementations in [`redis`] sit on a shared Redis instance; the
//! implementations in [`memory`] keep the same semantics in-process for tests
//! and single-instance deployments.
//!
//! Membership decisions (queue pops, run-counter increments, stopping-set
//! checks) must be atomic at the storage layer; none of these traits may be
//! implemented with client-side read-modify-write races.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Task;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Authoritative in-flight task table, keyed by task id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace the record.
    async fn set(&self, task: &Task) -> StoreResult<()>;

    async fn get(&self, task_id: &str) -> StoreResult<Option<Task>>;

    /// Write the record only if the key still exists; returns whether the
    /// write happened. A task that was concurrently finalized and deleted must
    /// never be resurrected by a stale writer, so this is not an upsert.
    async fn update(&self, task: &Task) -> StoreResult<bool>;

    async fn delete(&self, task_id: &str) -> StoreResult<()>;

    async fn has(&self, task_id: &str) -> StoreResult<bool>;

    async fn keys(&self) -> StoreResult<Vec<String>>;

    async fn values(&self) -> StoreResult<Vec<Task>>;

    async fn entries(&self) -> StoreResult<Vec<(String, Task)>>;

    async fn len(&self) -> StoreResult<usize>;

    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn clear(&self) -> StoreResult<()>;
}

/// FIFO queue of task ids sequencing scheduling attempts.
#[async_trait]
pub trait TaskIdQueue: Send + Sync {
    /// Push to the tail.
    async fn enqueue(&self, task_id: &str) -> StoreResult<()>;

    /// Atomically pop from the head.
    async fn dequeue(&self) -> StoreResult<Option<String>>;

    async fn peek(&self) -> StoreResult<Option<String>>;

    async fn len(&self) -> StoreResult<usize>;

    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn values(&self) -> StoreResult<Vec<String>>;

    async fn clear(&self) -> StoreResult<()>;
}

/// Per-task run bookkeeping shared between scheduler instances.
///
/// Tracks which runs are currently executing, how many runs have ever been
/// started (monotonic, independent of success), and which tasks are marked
/// for cooperative stopping.
#[async_trait]
pub trait RunTracker: Send + Sync {
    /// Atomically record `run_id` as in-flight and increment the task's
    /// total-started counter. `run` is the counter value observed at dispatch,
    /// kept for diagnostics.
    async fn add(&self, task_id: &str, run_id: &str, run: u32) -> StoreResult<()>;

    /// Drop the run from the in-flight set after its action resolves.
    async fn remove_run(&self, task_id: &str, run_id: &str) -> StoreResult<()>;

    async fn has_processing_runs(&self, task_id: &str) -> StoreResult<bool>;

    async fn processing_run_count(&self, task_id: &str) -> StoreResult<usize>;

    async fn processing_runs(&self, task_id: &str) -> StoreResult<Vec<String>>;

    /// Total runs ever started for the task; never decreases.
    async fn total_run_count(&self, task_id: &str) -> StoreResult<u32>;

    async fn mark_stopping(&self, task_id: &str) -> StoreResult<()>;

    async fn mark_all_stopping(&self, task_ids: &[String]) -> StoreResult<()>;

    async fn unmark_stopping(&self, task_id: &str) -> StoreResult<()>;

    async fn is_stopping(&self, task_id: &str) -> StoreResult<bool>;

    async fn stopping_tasks(&self) -> StoreResult<Vec<String>>;

    /// Remove every trace of the task: in-flight set, total counter, and
    /// stopping-set membership, in one atomic step.
    async fn delete(&self, task_id: &str) -> StoreResult<()>;

    async fn clear(&self) -> StoreResult<()>;
}
