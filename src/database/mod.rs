//! Durable task database contract.
//!
//! The scheduling core only depends on this trait; persistence failures
//! propagate as [`TaskManagerError::Database`] from the orchestration method
//! that triggered the write. [`postgres::PgTaskDatabase`] is the production
//! adapter; [`memory::MemoryTaskDatabase`] backs tests and ad-hoc use.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::{Task, TaskStatus, TaskUpdate};

/// A task as retained durably after (or during) its live lifetime.
///
/// Unlike the live [`Task`], the durable record has no `next_run_time` (that
/// is scheduling state, not history) and keeps a finalization timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub user_id: String,
    pub total_runs: u32,
    pub interval_ms: u64,
    pub action: String,
    pub params: Value,
    pub status: TaskStatus,
    pub completed_runs: u32,
    pub failed_runs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            user_id: task.user_id.clone(),
            total_runs: task.total_runs,
            interval_ms: task.interval_ms,
            action: task.action.clone(),
            params: task.params.clone(),
            status: task.status,
            completed_runs: task.completed_runs,
            failed_runs: task.failed_runs,
            created_at: task.created_at,
            updated_at: task.updated_at,
            finalized_at: None,
        }
    }
}

/// One recorded run outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub task_id: String,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}

/// External collaborator interface for durable task storage.
#[async_trait]
pub trait TaskDatabase: Send + Sync {
    /// Persist a freshly added task.
    async fn create_task(&self, task: &Task) -> Result<()>;

    /// Apply a partial update to an existing record.
    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<()>;

    async fn delete_task(&self, task_id: &str) -> Result<()>;

    /// Record the outcome of one run.
    async fn save_run(&self, task_id: &str, run_id: &str, success: bool) -> Result<()>;

    /// Write the final record at terminal transition; the task carries its
    /// terminal status and final counters.
    async fn complete_task(&self, task: &Task) -> Result<()>;
}
