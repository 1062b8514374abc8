//! Postgres adapter for the durable task database.
//!
//! Runtime-bound SQLx queries over two tables (see `migrations/`):
//! `tasks` holds one row per task with its final status and run counters;
//! `task_runs` holds one row per recorded run outcome. Read-side queries used
//! by the excluded HTTP layer (active tasks, paged history, per-user summary)
//! live here as well; the scheduling core itself only calls the
//! [`TaskDatabase`] methods.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder, Row};
use std::str::FromStr;
use tracing::debug;

use super::{TaskDatabase, TaskRecord};
use crate::error::{Result, TaskManagerError};
use crate::models::{Task, TaskStatus, TaskSummary, TaskUpdate};

fn db_err(e: sqlx::Error) -> TaskManagerError {
    TaskManagerError::Database(e.to_string())
}

/// Convert between the database's signed integers and the model's unsigned
/// ones, refusing values that do not fit rather than wrapping.
fn cast<T, U>(value: T, field: &str) -> Result<U>
where
    T: Copy + std::fmt::Display,
    U: TryFrom<T>,
{
    U::try_from(value)
        .map_err(|_| TaskManagerError::Database(format!("{field} out of range: {value}")))
}

#[derive(Debug, Clone)]
pub struct PgTaskDatabase {
    pool: PgPool,
}

impl PgTaskDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        debug!(max_connections, "connected to task database");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<TaskRecord> {
        let status_raw: String = row.try_get("status").map_err(db_err)?;
        let status = TaskStatus::from_str(&status_raw).map_err(TaskManagerError::Database)?;
        Ok(TaskRecord {
            id: row.try_get("id").map_err(db_err)?,
            user_id: row.try_get("user_id").map_err(db_err)?,
            total_runs: cast(row.try_get::<i32, _>("total_runs").map_err(db_err)?, "total_runs")?,
            interval_ms: cast(
                row.try_get::<i64, _>("interval_ms").map_err(db_err)?,
                "interval_ms",
            )?,
            action: row.try_get("action").map_err(db_err)?,
            params: row.try_get("params").map_err(db_err)?,
            status,
            completed_runs: cast(
                row.try_get::<i32, _>("completed_runs").map_err(db_err)?,
                "completed_runs",
            )?,
            failed_runs: cast(
                row.try_get::<i32, _>("failed_runs").map_err(db_err)?,
                "failed_runs",
            )?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
            finalized_at: row.try_get("finalized_at").map_err(db_err)?,
        })
    }

    const RECORD_COLUMNS: &'static str = "id, user_id, total_runs, interval_ms, action, params, \
         status, completed_runs, failed_runs, created_at, updated_at, finalized_at";

    /// Tasks of a user that are still pending or processing.
    pub async fn active_tasks(&self, user_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks \
             WHERE user_id = $1 AND status IN ('PENDING', 'PROCESSING') \
             ORDER BY created_at",
            Self::RECORD_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::record_from_row).collect()
    }

    /// Finished tasks of a user, newest first, with the total count for
    /// pagination.
    pub async fn task_history(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<TaskRecord>, u64)> {
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks \
             WHERE user_id = $1 AND status NOT IN ('PENDING', 'PROCESSING') \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            Self::RECORD_COLUMNS
        ))
        .bind(user_id)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks \
             WHERE user_id = $1 AND status NOT IN ('PENDING', 'PROCESSING')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((records, cast(total, "history count")?))
    }

    /// Per-user rollup across all durable records.
    pub async fn user_task_summary(&self, user_id: &str) -> Result<TaskSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE status = 'COMPLETED') AS completed, \
                    COUNT(*) FILTER (WHERE status = 'FAILED') AS failed \
             FROM tasks WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(TaskSummary {
            total_tasks: cast(row.try_get::<i64, _>("total").map_err(db_err)?, "total")?,
            completed_tasks: cast(row.try_get::<i64, _>("completed").map_err(db_err)?, "completed")?,
            failed_tasks: cast(row.try_get::<i64, _>("failed").map_err(db_err)?, "failed")?,
        })
    }
}

#[async_trait]
impl TaskDatabase for PgTaskDatabase {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let total_runs: i32 = cast(task.total_runs, "total_runs")?;
        let interval_ms: i64 = cast(task.interval_ms, "interval_ms")?;
        sqlx::query(
            "INSERT INTO tasks \
             (id, user_id, total_runs, interval_ms, action, params, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)",
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(total_runs)
        .bind(interval_ms)
        .bind(&task.action)
        .bind(&task.params)
        .bind(task.status.to_string())
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::new("UPDATE tasks SET updated_at = now()");
        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status.to_string());
        }
        if let Some(completed) = update.completed_runs {
            let completed: i32 = cast(completed, "completed_runs")?;
            query.push(", completed_runs = ").push_bind(completed);
        }
        if let Some(failed) = update.failed_runs {
            let failed: i32 = cast(failed, "failed_runs")?;
            query.push(", failed_runs = ").push_bind(failed);
        }
        query.push(" WHERE id = ").push_bind(task_id);

        query.build().execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn save_run(&self, task_id: &str, run_id: &str, success: bool) -> Result<()> {
        sqlx::query("INSERT INTO task_runs (id, task_id, success) VALUES ($1, $2, $3)")
            .bind(run_id)
            .bind(task_id)
            .bind(success)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn complete_task(&self, task: &Task) -> Result<()> {
        let completed_runs: i32 = cast(task.completed_runs, "completed_runs")?;
        let failed_runs: i32 = cast(task.failed_runs, "failed_runs")?;
        sqlx::query(
            "UPDATE tasks SET status = $2, completed_runs = $3, failed_runs = $4, \
             finalized_at = now(), updated_at = now() WHERE id = $1",
        )
        .bind(&task.id)
        .bind(task.status.to_string())
        .bind(completed_runs)
        .bind(failed_runs)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_refuses_values_that_do_not_fit() {
        assert!(cast::<u32, i32>(u32::MAX, "total_runs").is_err());
        assert!(cast::<u64, i64>(u64::MAX, "interval_ms").is_err());
        assert!(cast::<i32, u32>(-1, "completed_runs").is_err());
        assert!(cast::<i64, u64>(-5, "total").is_err());
    }

    #[test]
    fn cast_preserves_in_range_values() {
        assert_eq!(cast::<u32, i32>(42, "total_runs").unwrap(), 42);
        assert_eq!(cast::<i32, u32>(7, "completed_runs").unwrap(), 7);
        assert_eq!(cast::<i64, u64>(0, "total").unwrap(), 0);
    }

    #[test]
    fn cast_error_names_the_field() {
        let err = cast::<i64, u64>(-1, "history count").unwrap_err();
        assert!(err.to_string().contains("history count"));
    }
}
