//! Task queue orchestrator
//!
//! `TaskQueue` is the only component that talks to the store. It:
//! - persists the initial record and dispatches on `submit`
//! - derives status from the registry first, then the store, on `query`
//! - drains worker completions in one loop and writes each exactly once
//!
//! Every finalizing write, whether from a worker or from a task that could
//! not be dispatched, goes through `CompletionWriter`: retried with the
//! configured policy, then published as a `BackgroundFailure` if it never lands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskq_core::{ActiveTask, Task, TaskCompletion, TaskError, TaskId, TaskOutcome, TaskView};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::persistence::{StoreError, TaskStore};
use crate::registry::ActiveTaskRegistry;
use crate::reliability::RetryPolicy;
use crate::worker::{WorkerEvent, WorkerPool, WorkerPoolConfig, WorkerPoolError};

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// Configuration for the task queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of workers; also the registry capacity
    pub pool_size: usize,

    /// Retry policy for completion updates
    pub completion_retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            completion_retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    /// Set the completion retry policy
    pub fn with_completion_retry(mut self, policy: RetryPolicy) -> Self {
        self.completion_retry = policy;
        self
    }
}

/// Errors from queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No record and not running
    #[error("There is no task with such id - {0}")]
    NotFound(TaskId),

    /// Persistence failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Worker pool error
    #[error("worker pool error: {0}")]
    Pool(#[from] WorkerPoolError),

    /// Task contract violation
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Submission after shutdown started
    #[error("task queue is shutting down")]
    ShuttingDown,
}

/// A failure that happened off the request path.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundFailure {
    /// A completion could not be persisted after every retry
    CompletionNotPersisted {
        id: TaskId,
        attempts: u32,
        error: String,
    },

    /// A worker found no free registry slot
    CapacityViolation { id: TaskId, error: String },
}

impl BackgroundFailure {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::CompletionNotPersisted { id, .. } | Self::CapacityViolation { id, .. } => *id,
        }
    }
}

/// Bounded-concurrency task queue.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use taskq_core::{MockTask, Task};
/// use taskq_queue::prelude::*;
///
/// let queue = TaskQueue::new(Arc::new(InMemoryTaskStore::new()), QueueConfig::new(2))?;
///
/// let id = queue.submit(Task::new(MockTask::new(Some(1)))).await?;
/// let view = queue.query(id).await?;
///
/// queue.shutdown().await?;
/// ```
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    registry: Arc<ActiveTaskRegistry>,
    pool: WorkerPool,
    writer: CompletionWriter,
    completion_loop: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl TaskQueue {
    /// Start the worker pool and the completion loop.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(store, config), fields(pool_size = config.pool_size, store = store.backend()))]
    pub fn new(store: Arc<dyn TaskStore>, config: QueueConfig) -> Result<Self, QueueError> {
        let registry = Arc::new(ActiveTaskRegistry::new(config.pool_size));
        Self::with_registry(store, config, registry)
    }

    /// Start a queue over an existing registry, whose capacity need not
    /// match the pool size.
    pub(crate) fn with_registry(
        store: Arc<dyn TaskStore>,
        config: QueueConfig,
        registry: Arc<ActiveTaskRegistry>,
    ) -> Result<Self, QueueError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pool = WorkerPool::start(
            WorkerPoolConfig::new(config.pool_size),
            Arc::clone(&registry),
            events_tx,
        )?;
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        let writer = CompletionWriter {
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            failures,
            retry: config.completion_retry,
        };
        let completion_loop = tokio::spawn(writer.clone().run(events_rx));

        info!(pool_size = config.pool_size, "Task queue started");

        Ok(Self {
            store,
            registry,
            pool,
            writer,
            completion_loop: Mutex::new(Some(completion_loop)),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Persist the task's initial record, then hand it to the worker pool.
    ///
    /// If the initial write fails the task is not dispatched.
    #[instrument(skip(self, task), fields(kind = task.kind()))]
    pub async fn submit(&self, mut task: Task) -> Result<TaskId, QueueError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let id = self.store.create(task.create_time()).await.map_err(|e| {
            error!("Failed to persist task: {}", e);
            e
        })?;
        task.assign_id(id)?;

        if let Err(e) = self.pool.dispatch(task) {
            warn!(task_id = %id, error = %e, "Dispatch failed after task was persisted");
            self.abandon(id, &e).await;
            return Err(match e {
                WorkerPoolError::Closed => QueueError::ShuttingDown,
                other => other.into(),
            });
        }

        debug!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Finalize a persisted task that will never run, so it does not stay
    /// queued forever.
    async fn abandon(&self, id: TaskId, reason: &WorkerPoolError) {
        let completion = TaskCompletion {
            id,
            start_time: Utc::now(),
            time_to_execute: Duration::ZERO,
            outcome: TaskOutcome::Failed {
                error: reason.to_string(),
            },
        };
        self.writer.finalize(completion).await;
    }

    /// Current status of a task.
    ///
    /// Running and just-finished tasks are answered by the registry; every
    /// other task by its persisted record.
    pub async fn query(&self, id: TaskId) -> Result<TaskView, QueueError> {
        if let Some(view) = self.registry.lookup(id) {
            return Ok(view);
        }

        let record = self
            .store
            .get(id)
            .await
            .map_err(|e| {
                error!(task_id = %id, "Failed to load task: {}", e);
                e
            })?
            .ok_or(QueueError::NotFound(id))?;

        Ok(TaskView::from_record(&record))
    }

    /// Snapshot of tasks currently occupying a slot.
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.registry.active_tasks()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.size()
    }

    /// Name of the configured store backend
    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Receive failures that happen after `submit` has returned.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<BackgroundFailure> {
        self.writer.failures.subscribe()
    }

    /// Stop accepting tasks, run everything already queued, and wait until
    /// every completion has been persisted.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already requested");
        }

        info!("Shutting down task queue");
        self.pool.shutdown().await?;

        let handle = self.completion_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Completion loop terminated abnormally: {}", e);
            }
        }

        info!("Task queue stopped");
        Ok(())
    }
}

#[derive(Clone)]
struct CompletionWriter {
    store: Arc<dyn TaskStore>,
    registry: Arc<ActiveTaskRegistry>,
    failures: broadcast::Sender<BackgroundFailure>,
    retry: RetryPolicy,
}

impl CompletionWriter {
    async fn run(self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("Completion channel closed");
    }

    async fn handle(&self, event: WorkerEvent) {
        let completion = match event {
            WorkerEvent::Finished(completion) => completion,
            WorkerEvent::SlotUnavailable { completion, error } => {
                self.publish(BackgroundFailure::CapacityViolation {
                    id: completion.id,
                    error: error.to_string(),
                });
                completion
            }
        };

        self.finalize(completion).await;
    }

    async fn finalize(&self, completion: TaskCompletion) {
        match self.persist(&completion).await {
            Ok(()) => self.registry.clear_settled(completion.id),
            Err((attempts, e)) => {
                // The settling entry stays, so queries keep answering from
                // memory until restart. Such entries are never reclaimed; there
                // is exactly one per CompletionNotPersisted published below.
                error!(
                    task_id = %completion.id,
                    attempts,
                    error = %e,
                    "Failed to persist task completion"
                );
                self.publish(BackgroundFailure::CompletionNotPersisted {
                    id: completion.id,
                    attempts,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn persist(&self, completion: &TaskCompletion) -> Result<(), (u32, StoreError)> {
        let mut attempt = 1;
        loop {
            match self.store.update(completion).await {
                Ok(()) => {
                    debug!(task_id = %completion.id, attempt, "Persisted task completion");
                    return Ok(());
                }
                Err(StoreError::AlreadyFinalized(id)) => {
                    warn!(task_id = %id, "Completion already persisted");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && self.retry.has_attempts_remaining(attempt) => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        task_id = %completion.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying completion update"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    fn publish(&self, failure: BackgroundFailure) {
        // No subscribers is fine; the failure is already logged.
        let _ = self.failures.send(failure);
    }
}

#[cfg(test)]
mod tests {
    use taskq_core::{MockTask, TaskStatus};

    use super::*;
    use crate::persistence::{InMemoryTaskStore, TaskStore};

    fn queue(pool_size: usize) -> TaskQueue {
        TaskQueue::new(Arc::new(InMemoryTaskStore::new()), QueueConfig::new(pool_size)).unwrap()
    }

    async fn wait_for(queue: &TaskQueue, id: TaskId, status: TaskStatus) -> TaskView {
        for _ in 0..500 {
            let view = queue.query(id).await.unwrap();
            if view.status == status {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {id} never reached {status}");
    }

    #[tokio::test]
    async fn test_zero_pool_size_is_rejected() {
        let result = TaskQueue::new(Arc::new(InMemoryTaskStore::new()), QueueConfig::new(0));
        assert!(matches!(
            result,
            Err(QueueError::Pool(WorkerPoolError::InvalidSize))
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let queue = queue(1);
        let err = queue.query(TaskId::new(12345)).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(id) if id == TaskId::new(12345)));
        assert_eq!(err.to_string(), "There is no task with such id - 12345");
    }

    #[tokio::test]
    async fn test_submit_runs_to_completion() {
        let queue = queue(1);
        let id = queue
            .submit(Task::new(MockTask::with_delay(Duration::from_millis(30))))
            .await
            .unwrap();

        let view = wait_for(&queue, id, TaskStatus::Completed).await;
        assert!(view.start_time.is_some());
        assert!(view.time_to_execute.unwrap() >= Duration::from_millis(30));

        queue.shutdown().await.unwrap();
        assert_eq!(queue.registry.settling_len(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let queue = queue(1);
        queue.shutdown().await.unwrap();

        let err = queue
            .submit(Task::new(MockTask::with_delay(Duration::ZERO)))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_capacity_violation_is_published_and_finalized() {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = TaskQueue::with_registry(
            store.clone(),
            QueueConfig::new(2),
            Arc::new(ActiveTaskRegistry::new(1)),
        )
        .unwrap();
        let mut failures = queue.subscribe_failures();

        let first = queue
            .submit(Task::new(MockTask::with_delay(Duration::from_millis(300))))
            .await
            .unwrap();
        let second = queue
            .submit(Task::new(MockTask::with_delay(Duration::from_millis(300))))
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(5), failures.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(failure, BackgroundFailure::CapacityViolation { .. }));
        let violated = failure.task_id();
        let ran = if violated == first { second } else { first };
        assert!(violated == first || violated == second);

        let view = wait_for(&queue, violated, TaskStatus::Failed).await;
        assert!(view.error.unwrap().contains("no free slot"));
        wait_for(&queue, ran, TaskStatus::Completed).await;

        queue.shutdown().await.unwrap();
        let record = store.get(violated).await.unwrap().unwrap();
        assert!(record.is_finalized());
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_undispatchable_task_is_finalized_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = TaskQueue::new(store.clone(), QueueConfig::new(1)).unwrap();

        // Close the pool without raising the queue's own shutdown flag, the
        // state a submit sees when it loses the race with `shutdown`.
        queue.pool.shutdown().await.unwrap();

        let err = queue
            .submit(Task::new(MockTask::with_delay(Duration::ZERO)))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::ShuttingDown));

        assert_eq!(store.len(), 1);
        let view = queue.query(TaskId::new(1)).await.unwrap();
        assert_eq!(view.status, TaskStatus::Failed);
        assert!(view.error.unwrap().contains("shut down"));
        assert_eq!(view.time_to_execute, Some(Duration::ZERO));

        queue.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_task_is_reported_as_failed() {
        let queue = queue(1);
        let id = queue
            .submit(Task::from_fn("broken", || Err(TaskError::failed("nope"))))
            .await
            .unwrap();

        let view = wait_for(&queue, id, TaskStatus::Failed).await;
        assert!(view.error.unwrap().contains("nope"));
        assert!(queue.active_tasks().is_empty());
        queue.shutdown().await.unwrap();
    }
}
