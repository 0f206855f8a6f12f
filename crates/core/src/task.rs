// Task domain type
//
// A Task is identity + timing metadata around a `Work` body.
// Field invariants (enforced here, not by callers):
// - `id` is assigned once, by the queue, after the store issued it
// - `start_time` is set once and only when `id` is set
// - `time_to_execute` is set once and only when `start_time` is set

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::TaskId;

/// Result produced by a task body.
pub type WorkResult = Result<serde_json::Value, TaskError>;

/// Errors raised while preparing or running a task.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The task was executed before the store assigned it an id.
    #[error("task id is not set; the task must be stored before execution")]
    Unassigned,

    /// An id was assigned twice.
    #[error("task already has id {0}")]
    AlreadyAssigned(TaskId),

    /// `start` was called twice.
    #[error("task {0} was already started")]
    AlreadyStarted(TaskId),

    /// `execute` was called on a task that already ran.
    #[error("task {0} already finished")]
    AlreadyFinished(TaskId),

    /// The work body returned an error.
    #[error("task execution failed: {0}")]
    Failed(String),

    /// The work body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Create an execution failure from any message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Contract violations are programming errors, not work failures.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::Unassigned
                | Self::AlreadyAssigned(_)
                | Self::AlreadyStarted(_)
                | Self::AlreadyFinished(_)
        )
    }
}

/// The single capability a task kind provides: run the work.
///
/// Implementations run synchronously on a dedicated worker thread and may
/// block for as long as the work takes.
///
/// # Example
///
/// ```
/// use taskq_core::{Task, Work, WorkResult};
///
/// struct Add(i64, i64);
///
/// impl Work for Add {
///     fn kind(&self) -> &'static str {
///         "add"
///     }
///
///     fn run(&mut self) -> WorkResult {
///         Ok(serde_json::json!(self.0 + self.1))
///     }
/// }
///
/// let task = Task::new(Add(2, 3));
/// assert!(task.id().is_none());
/// ```
pub trait Work: Send + 'static {
    /// Short name of the task kind, used in logs.
    fn kind(&self) -> &'static str;

    /// Execute the work and produce a result.
    fn run(&mut self) -> WorkResult;
}

/// Work backed by a closure.
pub struct FnTask<F> {
    kind: &'static str,
    func: F,
}

impl<F> FnTask<F>
where
    F: FnMut() -> WorkResult + Send + 'static,
{
    pub fn new(kind: &'static str, func: F) -> Self {
        Self { kind, func }
    }
}

impl<F> Work for FnTask<F>
where
    F: FnMut() -> WorkResult + Send + 'static,
{
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn run(&mut self) -> WorkResult {
        (self.func)()
    }
}

/// A unit of submitted work with identity and timing metadata.
pub struct Task {
    id: Option<TaskId>,
    create_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    started_at: Option<Instant>,
    time_to_execute: Option<Duration>,
    work: Box<dyn Work>,
}

impl Task {
    /// Create a task; `create_time` is set to now, everything else is unset.
    pub fn new(work: impl Work) -> Self {
        Self {
            id: None,
            create_time: Utc::now(),
            start_time: None,
            started_at: None,
            time_to_execute: None,
            work: Box::new(work),
        }
    }

    /// Create a task from a closure.
    pub fn from_fn<F>(kind: &'static str, func: F) -> Self
    where
        F: FnMut() -> WorkResult + Send + 'static,
    {
        Self::new(FnTask::new(kind, func))
    }

    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn time_to_execute(&self) -> Option<Duration> {
        self.time_to_execute
    }

    pub fn kind(&self) -> &'static str {
        self.work.kind()
    }

    /// Attach the id issued by the store.
    pub fn assign_id(&mut self, id: TaskId) -> Result<(), TaskError> {
        if let Some(existing) = self.id {
            return Err(TaskError::AlreadyAssigned(existing));
        }
        self.id = Some(id);
        Ok(())
    }

    /// Mark the task as dispatched into execution and return its start time.
    pub fn start(&mut self) -> Result<DateTime<Utc>, TaskError> {
        let id = self.id.ok_or(TaskError::Unassigned)?;
        if self.start_time.is_some() {
            return Err(TaskError::AlreadyStarted(id));
        }

        let now = Utc::now();
        self.start_time = Some(now);
        self.started_at = Some(Instant::now());
        Ok(now)
    }

    /// Run the work body to completion and record `time_to_execute`.
    ///
    /// Starts the task first if the caller has not. A panic inside the body
    /// is caught and reported as [`TaskError::Panicked`]; the elapsed time is
    /// recorded on every path.
    pub fn execute(&mut self) -> WorkResult {
        let id = self.id.ok_or(TaskError::Unassigned)?;
        if self.time_to_execute.is_some() {
            return Err(TaskError::AlreadyFinished(id));
        }
        if self.start_time.is_none() {
            self.start()?;
        }

        let work = &mut self.work;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.run()));

        let elapsed = self
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.time_to_execute = Some(elapsed);

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.work.kind())
            .field("id", &self.id)
            .field("create_time", &self.create_time)
            .field("start_time", &self.start_time)
            .field("time_to_execute", &self.time_to_execute)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
