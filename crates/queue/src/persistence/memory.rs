//! In-memory implementation of TaskStore

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use taskq_core::{TaskCompletion, TaskId, TaskRecord};

use super::store::*;

/// In-memory implementation of TaskStore
///
/// Used for tests and for running without a database. Provides the same
/// semantics as the SQLite implementation; records are lost on restart.
///
/// # Example
///
/// ```
/// use taskq_queue::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// assert_eq!(store.len(), 0);
/// ```
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
    last_id: AtomicI64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            last_id: AtomicI64::new(0),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, create_time: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let id = TaskId::new(self.last_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.records
            .write()
            .insert(id, TaskRecord::new(id, create_time));
        Ok(id)
    }

    async fn update(&self, completion: &TaskCompletion) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&completion.id)
            .ok_or(StoreError::NotFound(completion.id))?;

        if record.is_finalized() {
            return Err(StoreError::AlreadyFinalized(completion.id));
        }

        record.finalize(completion);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
