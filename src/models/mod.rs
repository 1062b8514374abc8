//! Data model for tasks and their durable records.

pub mod task;

pub use task::{NewTask, Task, TaskStatus, TaskSummary, TaskUpdate};
