//! Lifecycle event notifications.
//!
//! The manager publishes fire-and-forget events over a broadcast channel;
//! external collaborators (HTTP layer, logging) subscribe and react. Event
//! names on the wire are fixed: `taskAdded`, `taskStopping`, `taskStopped`,
//! `taskCompleted`, `taskFailed`, `runStarted`, `runCompleted`, `runFailed`,
//! plus `processingStarted`/`processingStopped` for the loop itself.

use tokio::sync::broadcast;

use crate::models::Task;

/// A lifecycle event emitted by the task manager.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    ProcessingStarted,
    ProcessingStopped,
    TaskAdded {
        task: Task,
    },
    TaskStopping {
        task: Task,
    },
    TaskStopped {
        task: Task,
    },
    TaskCompleted {
        task: Task,
    },
    TaskFailed {
        task: Task,
    },
    RunStarted {
        task: Task,
        run_id: String,
        run: u32,
    },
    RunCompleted {
        task: Task,
        run_id: String,
        run: u32,
        success: bool,
    },
    RunFailed {
        task: Task,
        run_id: String,
        run: u32,
        error: String,
    },
}

impl TaskEvent {
    /// Wire name of the event, as consumed by external collaborators.
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::ProcessingStarted => "processingStarted",
            TaskEvent::ProcessingStopped => "processingStopped",
            TaskEvent::TaskAdded { .. } => "taskAdded",
            TaskEvent::TaskStopping { .. } => "taskStopping",
            TaskEvent::TaskStopped { .. } => "taskStopped",
            TaskEvent::TaskCompleted { .. } => "taskCompleted",
            TaskEvent::TaskFailed { .. } => "taskFailed",
            TaskEvent::RunStarted { .. } => "runStarted",
            TaskEvent::RunCompleted { .. } => "runCompleted",
            TaskEvent::RunFailed { .. } => "runFailed",
        }
    }

    /// Task id the event refers to, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskEvent::ProcessingStarted | TaskEvent::ProcessingStopped => None,
            TaskEvent::TaskAdded { task }
            | TaskEvent::TaskStopping { task }
            | TaskEvent::TaskStopped { task }
            | TaskEvent::TaskCompleted { task }
            | TaskEvent::TaskFailed { task }
            | TaskEvent::RunStarted { task, .. }
            | TaskEvent::RunCompleted { task, .. }
            | TaskEvent::RunFailed { task, .. } => Some(&task.id),
        }
    }
}

/// Broadcast publisher for [`TaskEvent`]s.
///
/// Publishing never fails: with zero subscribers the event is simply dropped,
/// which is the expected mode when no observer layer is attached.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventPublisher {
    /// Create a publisher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: TaskEvent) {
        tracing::debug!(event = event.name(), task_id = event.task_id(), "event");
        // send() errors only when there are no subscribers; acceptable here
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;
    use serde_json::json;

    fn task() -> Task {
        Task::new(
            crate::ulid::generate(),
            NewTask {
                user_id: "u".into(),
                total_runs: 1,
                interval_ms: 10,
                action: "noop".into(),
                params: json!({}),
            },
        )
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let publisher = EventPublisher::default();
        let mut rx = publisher.subscribe();

        publisher.publish(TaskEvent::TaskAdded { task: task() });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "taskAdded");
        assert!(event.task_id().is_some());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::new(4);
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(TaskEvent::ProcessingStarted);
    }
}
