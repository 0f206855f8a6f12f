//! Worker pool for task execution
//!
//! # Architecture
//!
//! ```text
//!   TaskQueue::submit
//!          │ dispatch (FIFO)
//!          ▼
//! ┌──────────────────────────────────────────────┐
//! │                 WorkerPool                    │
//! │  [worker-0]  [worker-1]  ...  [worker-N-1]    │
//! │      │ acquire slot / execute / settle slot   │
//! │      ▼                                        │
//! │  ActiveTaskRegistry (N slots + settling)      │
//! └──────────────────────────────────────────────┘
//!          │ WorkerEvent (single channel)
//!          ▼
//!   completion loop -> TaskStore::update
//! ```

mod pool;

pub use pool::{WorkerEvent, WorkerPool, WorkerPoolConfig, WorkerPoolError};
