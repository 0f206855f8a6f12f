//! # Task Queue Engine
//!
//! Runs submitted tasks on a fixed pool of worker threads and answers status
//! queries by reconciling the in-memory registry of running tasks with the
//! durable task store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskQueue                             │
//! │  submit: store.create -> pool.dispatch                       │
//! │  query:  registry.lookup -> store.get                        │
//! └─────────────────────────────────────────────────────────────┘
//!            │                     ▲
//!            ▼                     │ WorkerEvent
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  N threads, FIFO dispatch, one task per thread at a time     │
//! └─────────────────────────────────────────────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ActiveTaskRegistry                         │
//! │  N slots + settling entries, one mutex                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskq_core::{MockTask, Task, TaskStatus};
//! use taskq_queue::prelude::*;
//!
//! let store = Arc::new(SqliteTaskStore::connect("sqlite::memory:").await?);
//! let queue = TaskQueue::new(store, QueueConfig::new(4))?;
//!
//! let id = queue.submit(Task::new(MockTask::new(Some(2)))).await?;
//! assert_eq!(queue.query(id).await?.status, TaskStatus::InQueue);
//! ```

pub mod persistence;
pub mod queue;
pub mod registry;
pub mod reliability;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::persistence::{InMemoryTaskStore, SqliteTaskStore, StoreError, TaskStore};
    pub use crate::queue::{BackgroundFailure, QueueConfig, QueueError, TaskQueue};
    pub use crate::registry::{ActiveTaskRegistry, RegistryError, SlotHandle};
    pub use crate::reliability::RetryPolicy;
    pub use crate::worker::{WorkerEvent, WorkerPool, WorkerPoolConfig, WorkerPoolError};
}

// Re-export key types at crate root
pub use persistence::{InMemoryTaskStore, SqliteTaskStore, StoreError, TaskStore};
pub use queue::{BackgroundFailure, QueueConfig, QueueError, TaskQueue};
pub use registry::{ActiveTaskRegistry, RegistryError, SlotHandle};
pub use reliability::RetryPolicy;
pub use worker::{WorkerEvent, WorkerPool, WorkerPoolConfig, WorkerPoolError};
