//! Task record and status state machine.
//!
//! A task describes a fixed quota of repeated executions ("runs") of a named
//! action. The live record is held in the shared task store while the task is
//! in flight; the durable database keeps the record after finalization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Status of a task in the scheduling lifecycle.
///
/// Transitions: `Pending -> Processing -> {Completing -> Completed | Failed}`,
/// and from any non-terminal state `-> Stopping -> Stopped`. A task never
/// reverts from `Processing` to `Pending` between runs. Terminal statuses
/// exist in the live store only transiently during finalization; the durable
/// database retains them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to begin processing
    Pending,
    /// Currently processing one or more runs
    Processing,
    /// Run quota reached; waiting for in-flight runs before `Completed`
    Completing,
    /// All runs done (terminal)
    Completed,
    /// Stop accepted; waiting for in-flight runs before `Stopped`
    Stopping,
    /// Stopped by request (terminal)
    Stopped,
    /// Failing; waiting for in-flight runs before `Failed`
    Failing,
    /// Finalized abnormally (terminal)
    Failed,
}

impl TaskStatus {
    /// Whether this status permits dispatching further runs.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Stopped | TaskStatus::Failed
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completing => "COMPLETING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Stopping => "STOPPING",
            TaskStatus::Stopped => "STOPPED",
            TaskStatus::Failing => "FAILING",
            TaskStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "PROCESSING" => Ok(TaskStatus::Processing),
            "COMPLETING" => Ok(TaskStatus::Completing),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "STOPPING" => Ok(TaskStatus::Stopping),
            "STOPPED" => Ok(TaskStatus::Stopped),
            "FAILING" => Ok(TaskStatus::Failing),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Input for registering a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: String,
    /// Upper bound on executions; must be at least 1
    pub total_runs: u32,
    /// Minimum spacing between successive runs, in milliseconds
    pub interval_ms: u64,
    /// Key into the action registry, resolved lazily at run time
    pub action: String,
    /// Opaque parameters passed verbatim to the action
    pub params: Value,
}

/// A live task record.
///
/// `id`, `user_id`, `total_runs`, `interval_ms`, `action` and `params` are
/// immutable after creation. `status` is mutated only by the task manager;
/// `next_run_time` advances each time a run is dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub total_runs: u32,
    pub interval_ms: u64,
    pub action: String,
    pub params: Value,
    pub status: TaskStatus,
    /// Epoch milliseconds; earliest time the next run may start
    pub next_run_time: i64,
    /// Runs that resolved successfully
    #[serde(default)]
    pub completed_runs: u32,
    /// Runs that resolved unsuccessfully or threw
    #[serde(default)]
    pub failed_runs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a `Pending` task scheduled to run immediately.
    pub fn new(id: String, info: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: info.user_id,
            total_runs: info.total_runs,
            interval_ms: info.interval_ms,
            action: info.action,
            params: info.params,
            status: TaskStatus::Pending,
            next_run_time: now.timestamp_millis(),
            completed_runs: 0,
            failed_runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the status permits dispatching further runs.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether `next_run_time` has been reached.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_run_time <= now_ms
    }
}

/// Partial update for the durable database; unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub completed_runs: Option<u32>,
    pub failed_runs: Option<u32>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Status plus both run counters, as written after every run result.
    pub fn run_progress(task: &Task) -> Self {
        Self {
            status: Some(task.status),
            completed_runs: Some(task.completed_runs),
            failed_runs: Some(task.failed_runs),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.completed_runs.is_none() && self.failed_runs.is_none()
    }
}

/// Per-user rollup of durable task records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info() -> NewTask {
        NewTask {
            user_id: "user-1".into(),
            total_runs: 3,
            interval_ms: 1000,
            action: "noop".into(),
            params: json!({"mint": "abc"}),
        }
    }

    #[test]
    fn new_task_is_pending_and_due() {
        let task = Task::new("01ARZ3NDEKTSV4RRFFQ69G5FAV".into(), info());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.is_active());
        assert!(task.is_due(Utc::now().timestamp_millis()));
        assert_eq!(task.completed_runs, 0);
        assert_eq!(task.failed_runs, 0);
    }

    #[test]
    fn status_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Completing).unwrap(),
            "\"COMPLETING\""
        );
        let status: TaskStatus = serde_json::from_str("\"STOPPED\"").unwrap();
        assert_eq!(status, TaskStatus::Stopped);
    }

    #[test]
    fn task_round_trips_through_json() {
        let task = Task::new("01ARZ3NDEKTSV4RRFFQ69G5FAV".into(), info());
        let encoded = serde_json::to_string(&task).unwrap();
        let decoded: Task = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, task.id);
        assert_eq!(decoded.status, TaskStatus::Pending);
        assert_eq!(decoded.params, task.params);
    }

    #[test]
    fn terminal_statuses_are_not_active() {
        for status in [
            TaskStatus::Completed,
            TaskStatus::Stopped,
            TaskStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
        assert!(!TaskStatus::Stopping.is_terminal());
        assert!(!TaskStatus::Stopping.is_active());
    }
}
