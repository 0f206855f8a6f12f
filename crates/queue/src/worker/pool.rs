//! Worker pool for task execution
//!
//! N dedicated OS threads share one FIFO dispatch queue. Each worker runs one
//! task at a time: claim a registry slot, execute, settle the slot, report.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use taskq_core::{Task, TaskCompletion, TaskError, TaskId, TaskOutcome};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::registry::{ActiveTaskRegistry, RegistryError};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker threads, fixed for the pool's lifetime
    pub size: usize,

    /// Prefix for worker thread names (`{prefix}-{index}`)
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            size: 2,
            thread_name_prefix: "taskq-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    /// Pool size must be positive
    #[error("worker pool size must be at least 1")]
    InvalidSize,

    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    /// The task is not fit for dispatch
    #[error("task rejected: {0}")]
    Rejected(#[from] TaskError),

    /// The pool no longer accepts tasks
    #[error("worker pool is shut down")]
    Closed,

    /// Some worker threads panicked outside task execution
    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}

/// Report sent by a worker when it is done with a task.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The task ran; its slot is released and the outcome is settling.
    Finished(TaskCompletion),

    /// No slot could be claimed, so the task never ran.
    SlotUnavailable {
        completion: TaskCompletion,
        error: RegistryError,
    },
}

impl WorkerEvent {
    pub fn completion(&self) -> &TaskCompletion {
        match self {
            Self::Finished(completion) => completion,
            Self::SlotUnavailable { completion, .. } => completion,
        }
    }
}

type DispatchQueue = Arc<Mutex<mpsc::UnboundedReceiver<Task>>>;

/// Fixed-size pool of worker threads.
///
/// # Example
///
/// ```ignore
/// let registry = Arc::new(ActiveTaskRegistry::new(2));
/// let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
/// let pool = WorkerPool::start(WorkerPoolConfig::new(2), registry, events_tx)?;
///
/// pool.dispatch(task)?;
/// let event = events_rx.recv().await;
///
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    config: WorkerPoolConfig,
    dispatch_tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `config.size` worker threads.
    #[instrument(skip(registry, events), fields(size = config.size))]
    pub fn start(
        config: WorkerPoolConfig,
        registry: Arc<ActiveTaskRegistry>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self, WorkerPoolError> {
        if config.size == 0 {
            return Err(WorkerPoolError::InvalidSize);
        }
        if registry.capacity() < config.size {
            warn!(
                size = config.size,
                capacity = registry.capacity(),
                "Registry has fewer slots than workers; excess tasks will fail"
            );
        }

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let queue: DispatchQueue = Arc::new(Mutex::new(dispatch_rx));

        let mut workers = Vec::with_capacity(config.size);
        for index in 0..config.size {
            let worker = Worker {
                index,
                queue: Arc::clone(&queue),
                registry: Arc::clone(&registry),
                events: events.clone(),
            };

            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, index))
                .spawn(move || worker.run())
                .map_err(|e| {
                    error!("Failed to spawn worker thread: {}", e);
                    WorkerPoolError::Spawn(e.to_string())
                })?;
            workers.push(handle);
        }

        info!(size = config.size, "Worker pool started");

        Ok(Self {
            config,
            dispatch_tx: Mutex::new(Some(dispatch_tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn size(&self) -> usize {
        self.config.size
    }

    /// Check if the pool still takes dispatches
    pub fn is_accepting(&self) -> bool {
        self.dispatch_tx.lock().is_some()
    }

    /// Queue a task for the next free worker.
    ///
    /// The task must carry an id and must not have been started.
    pub fn dispatch(&self, task: Task) -> Result<(), WorkerPoolError> {
        let id = task.id().ok_or(TaskError::Unassigned)?;
        if task.start_time().is_some() {
            return Err(TaskError::AlreadyStarted(id).into());
        }

        let guard = self.dispatch_tx.lock();
        let sender = guard.as_ref().ok_or(WorkerPoolError::Closed)?;
        sender.send(task).map_err(|_| WorkerPoolError::Closed)?;

        debug!(task_id = %id, "dispatched task");
        Ok(())
    }

    /// Stop accepting tasks, let workers drain the queue, then join them.
    #[instrument(skip(self), fields(size = self.config.size))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        let sender = self.dispatch_tx.lock().take();
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);

        info!("Draining worker pool");

        let workers = std::mem::take(&mut *self.workers.lock());
        let panicked = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count()
        })
        .await
        .map_err(|e| WorkerPoolError::Spawn(e.to_string()))?;

        if panicked > 0 {
            warn!(panicked, "Worker threads panicked");
            return Err(WorkerPoolError::WorkerPanicked(panicked));
        }

        info!("Worker pool stopped");
        Ok(())
    }
}

struct Worker {
    index: usize,
    queue: DispatchQueue,
    registry: Arc<ActiveTaskRegistry>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Worker {
    fn run(self) {
        debug!(worker = self.index, "Worker started");

        loop {
            // Held only by idle workers, so the next task goes to whichever
            // idle worker got here first.
            let next = self.queue.lock().blocking_recv();
            let Some(task) = next else { break };
            self.execute(task);
        }

        debug!(worker = self.index, "Worker stopped");
    }

    fn execute(&self, mut task: Task) {
        let Some(id) = task.id() else {
            error!(worker = self.index, "Received task without id");
            return;
        };

        let start_time = match task.start() {
            Ok(start_time) => start_time,
            Err(e) => {
                error!(task_id = %id, error = %e, "Failed to start task");
                let start_time = task.start_time().unwrap_or_else(Utc::now);
                self.report(WorkerEvent::Finished(failed(id, start_time, &e)));
                return;
            }
        };

        let slot = match self
            .registry
            .acquire_slot(id, task.create_time(), start_time)
        {
            Ok(slot) => slot,
            Err(e) => {
                error!(task_id = %id, error = %e, "Registry capacity invariant violated");
                self.report(WorkerEvent::SlotUnavailable {
                    completion: failed(id, start_time, &e),
                    error: e,
                });
                return;
            }
        };

        debug!(worker = self.index, task_id = %id, kind = task.kind(), "Executing task");

        let result = task.execute();
        let time_to_execute = task.time_to_execute().unwrap_or_default();

        let outcome = match result {
            Ok(_) => {
                info!(task_id = %id, elapsed_secs = time_to_execute.as_secs_f64(), "Task completed");
                TaskOutcome::Succeeded
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "Task failed");
                TaskOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        let completion = TaskCompletion {
            id,
            start_time,
            time_to_execute,
            outcome,
        };

        slot.settle(completion.clone());
        self.report(WorkerEvent::Finished(completion));
    }

    fn report(&self, event: WorkerEvent) {
        let id = event.completion().id;
        if self.events.send(event).is_err() {
            warn!(task_id = %id, "Completion receiver is gone, dropping result");
        }
    }
}

fn failed(id: TaskId, start_time: DateTime<Utc>, error: &impl std::fmt::Display) -> TaskCompletion {
    TaskCompletion {
        id,
        start_time,
        time_to_execute: Duration::ZERO,
        outcome: TaskOutcome::Failed {
            error: error.to_string(),
        },
    }
}
