//! Queue behaviour when the task store misbehaves.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use taskq_core::{MockTask, Task, TaskCompletion, TaskId, TaskRecord, TaskStatus};
use taskq_queue::prelude::*;
use tokio::sync::Notify;

/// In-memory store that fails on demand.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryTaskStore,
    fail_create: AtomicBool,
    update_failures: AtomicU32,
    update_calls: AtomicU32,
    /// When set, `create` parks after inserting until `release_create`.
    hold_create: AtomicBool,
    create_entered: Notify,
    release_create: Notify,
}

impl FlakyStore {
    fn failing_updates(count: u32) -> Self {
        let store = Self::default();
        store.update_failures.store(count, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create(&self, create_time: DateTime<Utc>) -> Result<TaskId, StoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StoreError::Database("connection refused".to_string()));
        }
        let id = self.inner.create(create_time).await?;
        if self.hold_create.load(Ordering::SeqCst) {
            self.create_entered.notify_one();
            self.release_create.notified().await;
        }
        Ok(id)
    }

    async fn update(&self, completion: &TaskCompletion) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.update_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.update_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Database("database is locked".to_string()));
        }
        self.inner.update(completion).await
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get(id).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::fixed(Duration::from_millis(5), max_attempts)
}

#[tokio::test]
async fn failed_initial_write_is_not_dispatched() {
    let store = Arc::new(FlakyStore::default());
    store.fail_create.store(true, Ordering::SeqCst);
    let queue = TaskQueue::new(store.clone(), QueueConfig::new(1)).unwrap();

    let err = queue
        .submit(Task::new(MockTask::with_delay(Duration::ZERO)))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::Database(_))));

    queue.shutdown().await.unwrap();
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 0);
    assert!(store.inner.is_empty());
}

#[test_log::test(tokio::test)]
async fn transient_update_failures_are_retried() {
    let store = Arc::new(FlakyStore::failing_updates(2));
    let queue = TaskQueue::new(
        store.clone(),
        QueueConfig::new(1).with_completion_retry(fast_retry(5)),
    )
    .unwrap();

    let id = queue
        .submit(Task::new(MockTask::with_delay(Duration::ZERO)))
        .await
        .unwrap();
    queue.shutdown().await.unwrap();

    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
    let record = store.get(id).await.unwrap().unwrap();
    assert!(record.is_finalized());
    assert_eq!(queue.query(id).await.unwrap().status, TaskStatus::Completed);
}

#[test_log::test(tokio::test)]
async fn exhausted_retries_publish_background_failure() {
    let store = Arc::new(FlakyStore::failing_updates(u32::MAX));
    let queue = TaskQueue::new(
        store.clone(),
        QueueConfig::new(1).with_completion_retry(fast_retry(3)),
    )
    .unwrap();
    let mut failures = queue.subscribe_failures();

    let id = queue
        .submit(Task::new(MockTask::with_delay(Duration::ZERO)))
        .await
        .unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.task_id(), id);
    assert!(matches!(
        failure,
        BackgroundFailure::CompletionNotPersisted { attempts: 3, .. }
    ));

    // The store never learned the outcome, but the queue still reports it.
    assert!(!store.get(id).await.unwrap().unwrap().is_finalized());
    assert_eq!(queue.query(id).await.unwrap().status, TaskStatus::Completed);

    queue.shutdown().await.unwrap();
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
}

/// Submit one task whose `create` only returns after the queue has shut
/// down, so the persisted record can no longer be dispatched.
async fn submit_across_shutdown(queue: &Arc<TaskQueue>, store: &FlakyStore) -> QueueError {
    store.hold_create.store(true, Ordering::SeqCst);

    let submitting = tokio::spawn({
        let queue = Arc::clone(queue);
        async move {
            queue
                .submit(Task::new(MockTask::with_delay(Duration::ZERO)))
                .await
        }
    });

    store.create_entered.notified().await;
    queue.shutdown().await.unwrap();
    store.release_create.notify_one();

    submitting.await.unwrap().unwrap_err()
}

fn shared_queue(store: &Arc<FlakyStore>, retry: RetryPolicy) -> Arc<TaskQueue> {
    Arc::new(
        TaskQueue::new(
            store.clone(),
            QueueConfig::new(1).with_completion_retry(retry),
        )
        .unwrap(),
    )
}

#[test_log::test(tokio::test)]
async fn undispatched_task_is_finalized_with_retries() {
    let store = Arc::new(FlakyStore::failing_updates(2));
    let queue = shared_queue(&store, fast_retry(5));

    let err = submit_across_shutdown(&queue, &store).await;
    assert!(matches!(err, QueueError::ShuttingDown));

    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
    let id = TaskId::new(1);
    let record = store.get(id).await.unwrap().unwrap();
    assert!(record.is_finalized());
    assert!(record.error.unwrap().contains("shut down"));
    assert_eq!(queue.query(id).await.unwrap().status, TaskStatus::Failed);
}

#[test_log::test(tokio::test)]
async fn undispatched_task_publishes_failure_when_write_never_lands() {
    let store = Arc::new(FlakyStore::failing_updates(u32::MAX));
    let queue = shared_queue(&store, fast_retry(3));
    let mut failures = queue.subscribe_failures();

    let err = submit_across_shutdown(&queue, &store).await;
    assert!(matches!(err, QueueError::ShuttingDown));

    let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        failure,
        BackgroundFailure::CompletionNotPersisted {
            id: TaskId::new(1),
            attempts: 3,
            error: "database error: database is locked".to_string(),
        }
    );
    assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
    assert!(!store.get(TaskId::new(1)).await.unwrap().unwrap().is_finalized());
}
