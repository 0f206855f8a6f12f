//! TaskStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskq_core::{TaskCompletion, TaskId, TaskRecord};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the id
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The completion update was already applied
    #[error("task {0} is already finalized")]
    AlreadyFinalized(TaskId),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Only backend failures are worth retrying; the rest are final answers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Durable store for task records.
///
/// Implementations must:
/// - issue unique, monotonically increasing ids from `create`
/// - apply `update` at most once per id, atomically
/// - never expose a partially applied update through `get`
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    // =========================================================================
    // Task records
    // =========================================================================

    /// Persist a fresh record and return the id issued for it.
    async fn create(&self, create_time: DateTime<Utc>) -> Result<TaskId, StoreError>;

    /// Write the final timing (and error, if any) for a finished task.
    ///
    /// Fails with [`StoreError::AlreadyFinalized`] on a second write and with
    /// [`StoreError::NotFound`] when the id was never issued.
    async fn update(&self, completion: &TaskCompletion) -> Result<(), StoreError>;

    /// Load a record by id.
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
