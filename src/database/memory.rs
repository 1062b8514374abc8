//! In-memory durable database for tests and ad-hoc runs.
//!
//! Records every write so tests can assert on the final task record and the
//! per-run outcomes.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{RunRecord, TaskDatabase, TaskRecord};
use crate::error::{Result, TaskManagerError};
use crate::models::{Task, TaskStatus, TaskUpdate};

#[derive(Debug, Default)]
struct DatabaseState {
    tasks: HashMap<String, TaskRecord>,
    runs: Vec<RunRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryTaskDatabase {
    state: Mutex<DatabaseState>,
}

impl MemoryTaskDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, task_id: &str) -> Option<TaskRecord> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    /// Terminal status written by `complete_task`, if the task was finalized.
    pub fn finalized_status(&self, task_id: &str) -> Option<TaskStatus> {
        let state = self.state.lock();
        let record = state.tasks.get(task_id)?;
        record.finalized_at.map(|_| record.status)
    }

    pub fn runs_for(&self, task_id: &str) -> Vec<RunRecord> {
        self.state
            .lock()
            .runs
            .iter()
            .filter(|run| run.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.state.lock().tasks.len()
    }
}

#[async_trait]
impl TaskDatabase for MemoryTaskDatabase {
    async fn create_task(&self, task: &Task) -> Result<()> {
        self.state
            .lock()
            .tasks
            .insert(task.id.clone(), TaskRecord::from_task(task));
        Ok(())
    }

    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskManagerError::Database(format!("no task record {task_id}")))?;
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(completed) = update.completed_runs {
            record.completed_runs = completed;
        }
        if let Some(failed) = update.failed_runs {
            record.failed_runs = failed;
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.state.lock().tasks.remove(task_id);
        Ok(())
    }

    async fn save_run(&self, task_id: &str, run_id: &str, success: bool) -> Result<()> {
        self.state.lock().runs.push(RunRecord {
            id: run_id.to_string(),
            task_id: task_id.to_string(),
            success,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn complete_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.lock();
        let record = state
            .tasks
            .entry(task.id.clone())
            .or_insert_with(|| TaskRecord::from_task(task));
        record.status = task.status;
        record.completed_runs = task.completed_runs;
        record.failed_runs = task.failed_runs;
        let now = Utc::now();
        record.updated_at = now;
        record.finalized_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use serde_json::json;

    fn sample_task() -> Task {
        Task::new(
            crate::ulid::generate(),
            NewTask {
                user_id: "user-1".into(),
                total_runs: 2,
                interval_ms: 50,
                action: "noop".into(),
                params: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn tracks_task_lifecycle_writes() {
        let db = MemoryTaskDatabase::new();
        let mut task = sample_task();

        db.create_task(&task).await.unwrap();
        assert_eq!(db.record(&task.id).unwrap().status, TaskStatus::Pending);
        assert_eq!(db.finalized_status(&task.id), None);

        db.update_task(&task.id, TaskUpdate::status(TaskStatus::Processing))
            .await
            .unwrap();
        db.save_run(&task.id, "run-1", true).await.unwrap();
        db.save_run(&task.id, "run-2", false).await.unwrap();

        task.status = TaskStatus::Completed;
        task.completed_runs = 1;
        task.failed_runs = 1;
        db.complete_task(&task).await.unwrap();

        assert_eq!(db.finalized_status(&task.id), Some(TaskStatus::Completed));
        let runs = db.runs_for(&task.id);
        assert_eq!(runs.len(), 2);
        assert!(runs[0].success);
        assert!(!runs[1].success);
    }

    #[tokio::test]
    async fn update_of_missing_task_errors() {
        let db = MemoryTaskDatabase::new();
        let err = db
            .update_task("missing", TaskUpdate::status(TaskStatus::Stopped))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskManagerError::Database(_)));
    }
}
