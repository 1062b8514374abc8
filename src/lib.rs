#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Taskcycle Core
//!
//! Recurring-action task scheduling core with bounded concurrency and shared,
//! networked state.
//!
//! ## Overview
//!
//! A caller registers a task describing a total number of repeated executions
//! ("runs"), an interval between runs, and a named action with opaque
//! parameters. The scheduler drives each eligible task forward until it
//! completes, is explicitly stopped, or fails, while bounding how many tasks
//! run concurrently. All live task state lives in shared stores (Redis), so
//! multiple scheduler processes cooperate on one task table and the system
//! tolerates restarts; the durable database retains the final record of every
//! task.
//!
//! This crate is the scheduling core only. The HTTP surface that creates and
//! stops tasks, authentication, and the actions themselves (for example
//! blockchain transaction submission) are external collaborators attached via
//! the [`registry::ActionRegistry`] and the [`events`] channel.
//!
//! ## Module Organization
//!
//! - [`models`] - task record and status state machine
//! - [`manager`] - the scheduling loop and lifecycle engine
//! - [`store`] - shared live-state adapters (task table, queue, run tracker)
//! - [`database`] - durable task database contract and adapters
//! - [`registry`] - named asynchronous actions
//! - [`events`] - lifecycle event notifications
//! - [`ulid`] - time-ordered identifier generation
//! - [`config`] - environment-driven configuration
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskcycle_core::database::memory::MemoryTaskDatabase;
//! use taskcycle_core::manager::{TaskManager, TaskManagerConfig, TaskManagerOptions};
//! use taskcycle_core::models::NewTask;
//! use taskcycle_core::registry::ActionRegistry;
//! use taskcycle_core::store::memory::{MemoryRunTracker, MemoryTaskQueue, MemoryTaskStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let actions = ActionRegistry::builder()
//!     .register_fn("noop-success", |_params| async { Ok(true) })
//!     .build();
//!
//! let manager = TaskManager::new(TaskManagerConfig {
//!     tasks: Arc::new(MemoryTaskStore::new()),
//!     queue: Arc::new(MemoryTaskQueue::new()),
//!     runs: Arc::new(MemoryRunTracker::new()),
//!     db: Arc::new(MemoryTaskDatabase::new()),
//!     actions,
//!     options: TaskManagerOptions::default(),
//! })?;
//!
//! let task = manager
//!     .add_task(NewTask {
//!         user_id: "user-1".into(),
//!         total_runs: 3,
//!         interval_ms: 1000,
//!         action: "noop-success".into(),
//!         params: serde_json::json!({}),
//!     })
//!     .await?;
//! println!("scheduled task {}", task.id);
//! # Ok(())
//! # }
//! ```
//!
//! For multi-instance deployments swap the memory adapters for the Redis ones
//! in [`store::redis`] and the durable database for
//! [`database::postgres::PgTaskDatabase`].

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod manager;
pub mod models;
pub mod registry;
pub mod store;
pub mod ulid;

pub use config::SchedulerConfig;
pub use database::{TaskDatabase, TaskRecord};
pub use error::{Result, TaskManagerError};
pub use events::{EventPublisher, TaskEvent};
pub use manager::{StopOutcome, TaskManager, TaskManagerConfig, TaskManagerOptions};
pub use models::{NewTask, Task, TaskStatus, TaskSummary, TaskUpdate};
pub use registry::{ActionRegistry, TaskAction};
