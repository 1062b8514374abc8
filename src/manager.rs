//! Task manager: the scheduling loop and task lifecycle engine.
//!
//! One manager instance runs a cooperative polling loop that dequeues task
//! ids from the shared FIFO queue, checks eligibility and timing, and
//! dispatches runs as fire-and-forget units bounded by `max_active_tasks`.
//! Multiple manager processes may run against the same shared store, queue
//! and tracker; every membership decision goes through an atomic operation
//! of the storage layer.
//!
//! Runs of the same task are not mutually exclusive: when the loop cadence is
//! faster than a run's real latency and the task's interval has elapsed, a
//! second run can be dispatched while the first is still executing. The run
//! tracker gates *completion* (never finalize while runs are in flight), not
//! execution.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::database::TaskDatabase;
use crate::error::{Result, TaskManagerError};
use crate::events::{EventPublisher, TaskEvent};
use crate::models::{NewTask, Task, TaskStatus, TaskUpdate};
use crate::registry::ActionRegistry;
use crate::store::{RunTracker, TaskIdQueue, TaskStore};
use crate::{config, ulid};

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The stop was accepted, in-flight runs drained, task finalized
    Stopped,
    NotFound,
    /// The task exists but is not pending or processing
    NotRunning,
}

/// Tunables for a manager instance.
#[derive(Debug, Clone)]
pub struct TaskManagerOptions {
    /// Delay between scheduling-loop iterations, milliseconds; clamped to
    /// `[config::INTERVAL_MIN_MS, config::INTERVAL_MAX_MS]`
    pub interval_ms: u64,
    /// Bound on concurrently dispatched scheduling attempts
    pub max_active_tasks: usize,
    pub event_capacity: usize,
}

impl Default for TaskManagerOptions {
    fn default() -> Self {
        Self {
            interval_ms: config::INTERVAL_DEFAULT_MS,
            max_active_tasks: config::MAX_ACTIVE_TASKS_DEFAULT,
            event_capacity: 1024,
        }
    }
}

/// Collaborators handed to [`TaskManager::new`].
pub struct TaskManagerConfig {
    pub tasks: Arc<dyn TaskStore>,
    pub queue: Arc<dyn TaskIdQueue>,
    pub runs: Arc<dyn RunTracker>,
    pub db: Arc<dyn TaskDatabase>,
    pub actions: ActionRegistry,
    pub options: TaskManagerOptions,
}

/// The orchestrator. Cheap to clone; clones share all state, so the loop and
/// its spawned units observe one set of counters.
#[derive(Clone)]
pub struct TaskManager {
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskIdQueue>,
    runs: Arc<dyn RunTracker>,
    db: Arc<dyn TaskDatabase>,
    actions: Arc<ActionRegistry>,
    events: EventPublisher,
    interval_ms: u64,
    max_active_tasks: usize,
    active_tasks: Arc<AtomicUsize>,
    is_processing: Arc<AtomicBool>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("interval_ms", &self.interval_ms)
            .field("max_active_tasks", &self.max_active_tasks)
            .field("active_tasks", &self.active_tasks)
            .field("is_processing", &self.is_processing)
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Build a manager. Fails fast when the action registry is empty: a
    /// scheduler that can never execute anything is a configuration error.
    pub fn new(config: TaskManagerConfig) -> Result<Self> {
        if config.actions.is_empty() {
            return Err(TaskManagerError::Configuration(
                "action registry is empty".to_string(),
            ));
        }
        if config.options.max_active_tasks == 0 {
            return Err(TaskManagerError::Configuration(
                "max_active_tasks must be at least 1".to_string(),
            ));
        }

        let interval_ms = config
            .options
            .interval_ms
            .clamp(config::INTERVAL_MIN_MS, config::INTERVAL_MAX_MS);

        Ok(Self {
            tasks: config.tasks,
            queue: config.queue,
            runs: config.runs,
            db: config.db,
            actions: Arc::new(config.actions),
            events: EventPublisher::new(config.options.event_capacity),
            interval_ms,
            max_active_tasks: config.options.max_active_tasks,
            active_tasks: Arc::new(AtomicUsize::new(0)),
            is_processing: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn max_active_tasks(&self) -> usize {
        self.max_active_tasks
    }

    /// Scheduling attempts currently dispatched by this process.
    pub fn active_task_count(&self) -> usize {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    // ---- read-only queries against the live store ----

    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.get(task_id).await?)
    }

    pub async fn has_task(&self, task_id: &str) -> Result<bool> {
        Ok(self.tasks.has(task_id).await?)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.tasks.is_empty().await?)
    }

    pub async fn task_keys(&self) -> Result<Vec<String>> {
        Ok(self.tasks.keys().await?)
    }

    pub async fn task_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        Ok(self.tasks.get(task_id).await?.map(|task| task.status))
    }

    /// True iff the task exists with status Pending or Processing.
    pub async fn is_task_active(&self, task_id: &str) -> Result<bool> {
        Ok(self
            .tasks
            .get(task_id)
            .await?
            .is_some_and(|task| task.is_active()))
    }

    // ---- lifecycle operations ----

    /// Register a new task and start the scheduling loop if it is idle.
    pub async fn add_task(&self, info: NewTask) -> Result<Task> {
        if info.total_runs < 1 {
            return Err(TaskManagerError::Validation(
                "total_runs must be at least 1".to_string(),
            ));
        }

        let task = Task::new(ulid::generate(), info);
        self.tasks.set(&task).await?;
        self.db.create_task(&task).await?;
        self.queue.enqueue(&task.id).await?;
        debug!(
            task_id = %task.id,
            action = %task.action,
            total_runs = task.total_runs,
            interval_ms = task.interval_ms,
            "task added"
        );
        self.events.publish(TaskEvent::TaskAdded { task: task.clone() });

        if !self.is_processing() {
            self.start_processing();
        }
        Ok(task)
    }

    /// Request a cooperative stop. On acceptance this marks the task Stopping,
    /// prevents further dispatches, then blocks until every in-flight run has
    /// drained before finalizing as Stopped. There is no drain timeout: a
    /// stuck action stalls the stop indefinitely.
    pub async fn stop_task(&self, task_id: &str) -> Result<StopOutcome> {
        let Some(mut task) = self.tasks.get(task_id).await? else {
            return Ok(StopOutcome::NotFound);
        };
        if !task.is_active() {
            return Ok(StopOutcome::NotRunning);
        }

        task.status = TaskStatus::Stopping;
        task.updated_at = Utc::now();
        if !self.tasks.update(&task).await? {
            // Finalized concurrently between fetch and write
            return Ok(StopOutcome::NotFound);
        }
        self.db
            .update_task(task_id, TaskUpdate::status(TaskStatus::Stopping))
            .await?;
        self.runs.mark_stopping(task_id).await?;
        info!(task_id, "task stopping, draining in-flight runs");
        self.events.publish(TaskEvent::TaskStopping { task: task.clone() });

        let drain = Duration::from_millis(self.interval_ms);
        while self.runs.has_processing_runs(task_id).await? {
            tokio::time::sleep(drain).await;
        }

        // Refetch: drained runs may have bumped the counters. A missing
        // record means a concurrent attempt finalized the task during the
        // drain; finalizing again here would clobber its durable record and
        // emit a second completion.
        let Some(task) = self.tasks.get(task_id).await? else {
            debug!(task_id, "task finalized concurrently during stop drain");
            return Ok(StopOutcome::Stopped);
        };
        self.complete_task(task, Some(TaskStatus::Stopped)).await?;
        Ok(StopOutcome::Stopped)
    }

    /// Stop every current task: batch-mark the stopping set so no further
    /// runs are dispatched, then drain all stops concurrently. Individual
    /// failures are counted and logged without aborting the batch.
    pub async fn stop_all_tasks(&self) -> Result<()> {
        let task_ids = self.tasks.keys().await?;
        self.runs.mark_all_stopping(&task_ids).await?;

        let results = join_all(task_ids.iter().map(|id| self.stop_task(id))).await;
        let failed = task_ids
            .iter()
            .zip(&results)
            .filter(|(id, result)| {
                if let Err(e) = result {
                    error!(task_id = %id, error = %e, "failed to stop task");
                    true
                } else {
                    false
                }
            })
            .count();
        if failed > 0 {
            warn!(failed, "failed to stop {failed} tasks");
        }

        self.stop_processing();
        Ok(())
    }

    // ---- scheduling loop ----

    pub fn start_processing(&self) {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!(
                interval_ms = self.interval_ms,
                max_active_tasks = self.max_active_tasks,
                "scheduling loop started"
            );
            self.events.publish(TaskEvent::ProcessingStarted);
            let manager = self.clone();
            tokio::spawn(manager.run_loop());
        }
    }

    pub fn stop_processing(&self) {
        if self.is_processing.swap(false, Ordering::SeqCst) {
            info!("scheduling loop stopped");
            self.events.publish(TaskEvent::ProcessingStopped);
        }
    }

    async fn run_loop(self) {
        let pace = Duration::from_millis(self.interval_ms);
        while self.is_processing() {
            if let Err(e) = self.process().await {
                // Errors inside a single task's attempt are isolated in their
                // spawned unit; reaching here means the loop itself failed.
                error!(error = %e, "scheduling loop error, stopping cleanly");
                self.stop_processing();
                break;
            }
            tokio::time::sleep(pace).await;
        }
    }

    /// One loop iteration: dequeue at most one task id and dispatch an
    /// asynchronous scheduling attempt for it.
    async fn process(&self) -> Result<()> {
        if self.active_tasks.load(Ordering::SeqCst) >= self.max_active_tasks {
            return Ok(());
        }

        let Some(task_id) = self.queue.dequeue().await? else {
            if self.tasks.is_empty().await? {
                info!("no tasks to process, stopping");
                self.stop_processing();
            }
            return Ok(());
        };

        if self.runs.is_stopping(&task_id).await? {
            // Being drained by a stop request; drop this attempt entirely
            debug!(task_id = %task_id, "dropping scheduling attempt for stopping task");
            return Ok(());
        }

        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.process_task(&task_id).await {
                warn!(task_id = %task_id, error = %e, "scheduling attempt failed");
            }
            manager.active_tasks.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(())
    }

    /// One scheduling attempt for a task id.
    async fn process_task(&self, task_id: &str) -> Result<()> {
        let Some(task) = self.tasks.get(task_id).await? else {
            // Already finalized and deleted; not an error, just stale queue state
            self.tasks.delete(task_id).await?;
            debug!(task_id, "dropped stale id for finalized task");
            return Ok(());
        };

        let now = Utc::now().timestamp_millis();
        if !self.runs.is_stopping(task_id).await?
            && self.is_task_eligible(&task).await?
            && task.is_due(now)
        {
            // Re-enqueue before surfacing any dispatch error so the task is
            // never lost from the rotation
            let dispatched = self.process_run(task).await;
            self.queue.enqueue(task_id).await?;
            dispatched
        } else if self.is_task_completable(&task).await? {
            self.complete_task(task, None).await
        } else {
            self.queue.enqueue(task_id).await?;
            Ok(())
        }
    }

    /// Eligibility: status permits another run and the run quota is not
    /// exhausted.
    async fn is_task_eligible(&self, task: &Task) -> Result<bool> {
        Ok(task.is_active() && self.runs.total_run_count(&task.id).await? < task.total_runs)
    }

    /// Completable only from Completing, once no runs remain in flight.
    /// Completing is set exclusively inside run-result handling when the
    /// started-run count reaches the quota.
    async fn is_task_completable(&self, task: &Task) -> Result<bool> {
        Ok(task.status == TaskStatus::Completing
            && !self.runs.has_processing_runs(&task.id).await?)
    }

    /// Dispatch one run: record it as in-flight, advance `next_run_time`,
    /// persist, and hand the action invocation off to its own unit. The
    /// dispatch returns without waiting for the action, so the active-task
    /// bound covers dispatch work, not action latency.
    async fn process_run(&self, mut task: Task) -> Result<()> {
        // Race guard: the task may have been stopped or exhausted between the
        // attempt's check and now
        if self.runs.is_stopping(&task.id).await? || !self.is_task_eligible(&task).await? {
            return Ok(());
        }

        let run_id = ulid::generate();
        let run = self.runs.total_run_count(&task.id).await?;

        if task.status == TaskStatus::Pending {
            // First dispatch: the durable record leaves Pending immediately,
            // not batched with the run outcome
            task.status = TaskStatus::Processing;
            self.db
                .update_task(&task.id, TaskUpdate::status(TaskStatus::Processing))
                .await?;
        }

        if run >= task.total_runs {
            // Scheduling race symptom; skip the run rather than overshoot
            return Err(TaskManagerError::TooManyRuns {
                task_id: task.id.clone(),
                started: run,
                total_runs: task.total_runs,
            });
        }

        self.runs.add(&task.id, &run_id, run).await?;
        task.next_run_time = Utc::now().timestamp_millis() + task.interval_ms as i64;
        task.updated_at = Utc::now();
        self.tasks.update(&task).await?;
        debug!(task_id = %task.id, run_id = %run_id, run, "run dispatched");
        self.events.publish(TaskEvent::RunStarted {
            task: task.clone(),
            run_id: run_id.clone(),
            run,
        });

        let manager = self.clone();
        tokio::spawn(async move {
            manager.execute_run(task, run_id, run).await;
        });
        Ok(())
    }

    /// Invoke the action and record the outcome. Action lookup happens here,
    /// lazily: an unregistered action is a failed run, not an add-time error.
    async fn execute_run(&self, task: Task, run_id: String, run: u32) {
        let result = match self.actions.get(&task.action) {
            Some(action) => action.execute(&task.params).await,
            None => {
                let err = TaskManagerError::ActionNotFound {
                    task_id: task.id.clone(),
                    action: task.action.clone(),
                };
                error!(task_id = %task.id, action = %task.action, "action not registered");
                Err(anyhow::Error::new(err))
            }
        };

        // Ok(false) is an expected failure; Err is a thrown one, logged
        // distinctly but recorded the same way
        let (success, thrown) = match result {
            Ok(success) => (success, None),
            Err(e) => {
                warn!(task_id = %task.id, run_id = %run_id, run, error = %e, "run threw an error");
                (false, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .handle_run_result(&task.id, &run_id, run, success, thrown)
            .await
        {
            error!(task_id = %task.id, run_id = %run_id, error = %e, "failed to record run result");
        }
    }

    /// Executed after the action resolves or throws: update counters, decide
    /// whether the task is done dispatching, drop the in-flight entry, and
    /// persist the outcome.
    async fn handle_run_result(
        &self,
        task_id: &str,
        run_id: &str,
        run: u32,
        success: bool,
        thrown: Option<String>,
    ) -> Result<()> {
        // Refetch: the task may have been mutated concurrently, e.g. marked
        // Stopping while this run executed
        let Some(mut task) = self.tasks.get(task_id).await? else {
            self.runs.remove_run(task_id, run_id).await?;
            return Err(TaskManagerError::TaskNotFoundDuringRun {
                task_id: task_id.to_string(),
                run_id: run_id.to_string(),
            });
        };

        if success {
            task.completed_runs += 1;
        } else {
            task.failed_runs += 1;
        }

        let started = self.runs.total_run_count(task_id).await?;
        if task.status == TaskStatus::Processing && started >= task.total_runs {
            task.status = TaskStatus::Completing;
        }

        self.runs.remove_run(task_id, run_id).await?;
        task.updated_at = Utc::now();
        self.tasks.update(&task).await?;
        self.db.save_run(task_id, run_id, success).await?;
        self.db
            .update_task(task_id, TaskUpdate::run_progress(&task))
            .await?;

        match thrown {
            Some(error) => self.events.publish(TaskEvent::RunFailed {
                task,
                run_id: run_id.to_string(),
                run,
                error,
            }),
            None => self.events.publish(TaskEvent::RunCompleted {
                task,
                run_id: run_id.to_string(),
                run,
                success,
            }),
        }
        Ok(())
    }

    /// Finalize: assign the terminal status, persist the final record, and
    /// remove the task from live scheduling state.
    async fn complete_task(&self, mut task: Task, forced: Option<TaskStatus>) -> Result<()> {
        let final_status = forced.unwrap_or_else(|| Self::finalized_status(task.status));
        task.status = final_status;
        task.updated_at = Utc::now();

        self.db.complete_task(&task).await?;
        self.tasks.delete(&task.id).await?;
        self.runs.delete(&task.id).await?;
        info!(task_id = %task.id, status = %final_status, "task finalized");

        match final_status {
            TaskStatus::Stopped => self
                .events
                .publish(TaskEvent::TaskStopped { task: task.clone() }),
            TaskStatus::Failed => self
                .events
                .publish(TaskEvent::TaskFailed { task: task.clone() }),
            _ => {}
        }
        self.events.publish(TaskEvent::TaskCompleted { task });
        Ok(())
    }

    /// Terminal status for a finalizing task. Anything other than Stopping or
    /// Completing reaching finalization is abnormal and lands on Failed.
    fn finalized_status(status: TaskStatus) -> TaskStatus {
        match status {
            TaskStatus::Stopping => TaskStatus::Stopped,
            TaskStatus::Completing => TaskStatus::Completed,
            _ => TaskStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryTaskDatabase;
    use crate::store::memory::{MemoryRunTracker, MemoryTaskQueue, MemoryTaskStore};

    fn base_config(actions: ActionRegistry) -> TaskManagerConfig {
        TaskManagerConfig {
            tasks: Arc::new(MemoryTaskStore::new()),
            queue: Arc::new(MemoryTaskQueue::new()),
            runs: Arc::new(MemoryRunTracker::new()),
            db: Arc::new(MemoryTaskDatabase::new()),
            actions,
            options: TaskManagerOptions::default(),
        }
    }

    #[test]
    fn empty_action_registry_is_a_configuration_error() {
        let err = TaskManager::new(base_config(ActionRegistry::default())).unwrap_err();
        assert!(matches!(err, TaskManagerError::Configuration(_)));
    }

    #[test]
    fn interval_is_clamped_to_safe_bounds() {
        let actions = ActionRegistry::builder()
            .register_fn("noop", |_| async { Ok(true) })
            .build();
        let mut config = base_config(actions);
        config.options.interval_ms = 1;
        let manager = TaskManager::new(config).unwrap();
        assert_eq!(manager.interval_ms(), crate::config::INTERVAL_MIN_MS);
    }

    #[test]
    fn finalized_status_mapping() {
        assert_eq!(
            TaskManager::finalized_status(TaskStatus::Stopping),
            TaskStatus::Stopped
        );
        assert_eq!(
            TaskManager::finalized_status(TaskStatus::Completing),
            TaskStatus::Completed
        );
        // Anything else reaching finalization is abnormal
        assert_eq!(
            TaskManager::finalized_status(TaskStatus::Processing),
            TaskStatus::Failed
        );
        assert_eq!(
            TaskManager::finalized_status(TaskStatus::Pending),
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn add_task_rejects_zero_total_runs() {
        let actions = ActionRegistry::builder()
            .register_fn("noop", |_| async { Ok(true) })
            .build();
        let manager = TaskManager::new(base_config(actions)).unwrap();
        let err = manager
            .add_task(NewTask {
                user_id: "u".into(),
                total_runs: 0,
                interval_ms: 10,
                action: "noop".into(),
                params: serde_json::json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskManagerError::Validation(_)));
    }
}
