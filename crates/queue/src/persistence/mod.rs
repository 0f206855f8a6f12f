//! Persistence layer for task records
//!
//! This module provides:
//! - [`TaskStore`] trait, the only way the queue reaches durable state
//! - [`InMemoryTaskStore`] for tests and database-less runs
//! - [`SqliteTaskStore`] for production

mod memory;
mod sqlite;
mod store;

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;
pub use store::{StoreError, TaskStore};
