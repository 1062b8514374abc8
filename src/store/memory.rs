//! In-process live-state adapters.
//!
//! Same semantics as the Redis adapters, held behind process-local locks.
//! Not distributed: every scheduler instance sees only its own state, so
//! these are for tests and single-instance deployments only.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::{RunTracker, StoreResult, TaskIdQueue, TaskStore};
use crate::models::Task;

/// Task table held in a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn set(&self, task: &Task) -> StoreResult<()> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, task_id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|entry| entry.clone()))
    }

    async fn update(&self, task: &Task) -> StoreResult<bool> {
        // Entry-level lock makes the exists-then-write atomic
        match self.tasks.get_mut(&task.id) {
            Some(mut entry) => {
                *entry = task.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, task_id: &str) -> StoreResult<()> {
        self.tasks.remove(task_id);
        Ok(())
    }

    async fn has(&self, task_id: &str) -> StoreResult<bool> {
        Ok(self.tasks.contains_key(task_id))
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.tasks.iter().map(|e| e.key().clone()).collect())
    }

    async fn values(&self) -> StoreResult<Vec<Task>> {
        Ok(self.tasks.iter().map(|e| e.value().clone()).collect())
    }

    async fn entries(&self) -> StoreResult<Vec<(String, Task)>> {
        Ok(self
            .tasks
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.tasks.len())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.tasks.clear();
        Ok(())
    }
}

/// FIFO queue over a locked deque.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    items: Mutex<VecDeque<String>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskIdQueue for MemoryTaskQueue {
    async fn enqueue(&self, task_id: &str) -> StoreResult<()> {
        self.items.lock().push_back(task_id.to_string());
        Ok(())
    }

    async fn dequeue(&self) -> StoreResult<Option<String>> {
        Ok(self.items.lock().pop_front())
    }

    async fn peek(&self) -> StoreResult<Option<String>> {
        Ok(self.items.lock().front().cloned())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.items.lock().len())
    }

    async fn values(&self) -> StoreResult<Vec<String>> {
        Ok(self.items.lock().iter().cloned().collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.items.lock().clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    /// task_id -> in-flight run ids
    processing: HashMap<String, HashSet<String>>,
    /// task_id -> runs ever started
    totals: HashMap<String, u32>,
    stopping: HashSet<String>,
}

/// Run bookkeeping under a single lock so `add` and `delete` stay atomic,
/// matching the Redis pipelines.
#[derive(Debug, Default)]
pub struct MemoryRunTracker {
    state: Mutex<TrackerState>,
}

impl MemoryRunTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunTracker for MemoryRunTracker {
    async fn add(&self, task_id: &str, run_id: &str, _run: u32) -> StoreResult<()> {
        let mut state = self.state.lock();
        state
            .processing
            .entry(task_id.to_string())
            .or_default()
            .insert(run_id.to_string());
        *state.totals.entry(task_id.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn remove_run(&self, task_id: &str, run_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        let drained = match state.processing.get_mut(task_id) {
            Some(runs) => {
                runs.remove(run_id);
                runs.is_empty()
            }
            None => false,
        };
        if drained {
            state.processing.remove(task_id);
        }
        Ok(())
    }

    async fn has_processing_runs(&self, task_id: &str) -> StoreResult<bool> {
        Ok(self.processing_run_count(task_id).await? > 0)
    }

    async fn processing_run_count(&self, task_id: &str) -> StoreResult<usize> {
        Ok(self
            .state
            .lock()
            .processing
            .get(task_id)
            .map_or(0, HashSet::len))
    }

    async fn processing_runs(&self, task_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .processing
            .get(task_id)
            .map(|runs| runs.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn total_run_count(&self, task_id: &str) -> StoreResult<u32> {
        Ok(self.state.lock().totals.get(task_id).copied().unwrap_or(0))
    }

    async fn mark_stopping(&self, task_id: &str) -> StoreResult<()> {
        self.state.lock().stopping.insert(task_id.to_string());
        Ok(())
    }

    async fn mark_all_stopping(&self, task_ids: &[String]) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.stopping.extend(task_ids.iter().cloned());
        Ok(())
    }

    async fn unmark_stopping(&self, task_id: &str) -> StoreResult<()> {
        self.state.lock().stopping.remove(task_id);
        Ok(())
    }

    async fn is_stopping(&self, task_id: &str) -> StoreResult<bool> {
        Ok(self.state.lock().stopping.contains(task_id))
    }

    async fn stopping_tasks(&self) -> StoreResult<Vec<String>> {
        Ok(self.state.lock().stopping.iter().cloned().collect())
    }

    async fn delete(&self, task_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.processing.remove(task_id);
        state.totals.remove(task_id);
        state.stopping.remove(task_id);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.processing.clear();
        state.totals.clear();
        state.stopping.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskStatus};
    use serde_json::json;

    fn sample_task() -> Task {
        Task::new(
            crate::ulid::generate(),
            NewTask {
                user_id: "user-1".into(),
                total_runs: 2,
                interval_ms: 100,
                action: "noop".into(),
                params: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn update_is_not_an_upsert() {
        let store = MemoryTaskStore::new();
        let mut task = sample_task();

        store.set(&task).await.unwrap();
        task.status = TaskStatus::Processing;
        assert!(store.update(&task).await.unwrap());

        store.delete(&task.id).await.unwrap();
        assert!(!store.update(&task).await.unwrap());
        assert!(!store.has(&task.id).await.unwrap());
        assert!(store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn queue_preserves_fifo_order() {
        let queue = MemoryTaskQueue::new();
        queue.enqueue("a").await.unwrap();
        queue.enqueue("b").await.unwrap();
        queue.enqueue("c").await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 3);
        assert_eq!(queue.peek().await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("b"));
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("c"));
        assert_eq!(queue.dequeue().await.unwrap(), None);
    }

    #[tokio::test]
    async fn tracker_total_count_is_monotonic() {
        let tracker = MemoryRunTracker::new();
        tracker.add("t1", "r1", 0).await.unwrap();
        tracker.add("t1", "r2", 1).await.unwrap();
        assert_eq!(tracker.total_run_count("t1").await.unwrap(), 2);

        tracker.remove_run("t1", "r1").await.unwrap();
        tracker.remove_run("t1", "r2").await.unwrap();
        assert!(!tracker.has_processing_runs("t1").await.unwrap());
        assert_eq!(tracker.total_run_count("t1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn tracker_delete_clears_stopping_membership() {
        let tracker = MemoryRunTracker::new();
        tracker.mark_stopping("t1").await.unwrap();
        tracker
            .mark_all_stopping(&["t2".to_string(), "t3".to_string()])
            .await
            .unwrap();
        assert!(tracker.is_stopping("t1").await.unwrap());
        assert!(tracker.is_stopping("t3").await.unwrap());

        tracker.delete("t1").await.unwrap();
        assert!(!tracker.is_stopping("t1").await.unwrap());
        assert_eq!(tracker.stopping_tasks().await.unwrap().len(), 2);
    }
}
