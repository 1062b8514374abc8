//! Error types for the scheduling core.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum TaskManagerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(String),

    /// The task record vanished from the live store while one of its runs was
    /// mid-flight. Happens when a task is finalized concurrently; the run's
    /// outcome is dropped.
    #[error("task {task_id} no longer exists (run {run_id})")]
    TaskNotFoundDuringRun { task_id: String, run_id: String },

    #[error("action '{action}' is not registered (task {task_id})")]
    ActionNotFound { task_id: String, action: String },

    /// The started-run counter reached the quota before this dispatch won the
    /// race. Never expected under correct operation.
    #[error("task {task_id} already started {started} of {total_runs} runs")]
    TooManyRuns {
        task_id: String,
        started: u32,
        total_runs: u32,
    },
}

pub type Result<T> = std::result::Result<T, TaskManagerError>;
