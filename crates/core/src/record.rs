// Task records and status views
//
// `TaskRecord` is the persisted shape, `ActiveTask` the registry snapshot,
// `TaskCompletion` what a worker reports, and `TaskView` what a status
// query answers. Only `TaskView` carries a status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TaskId, TaskStatus};

/// Persisted task record.
///
/// Created with every nullable field unset; finalized exactly once when
/// execution completes. A record never stores "running".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub time_to_execute: Option<Duration>,
    /// Set when the work failed; absent for successful completions.
    pub error: Option<String>,
}

impl TaskRecord {
    /// A freshly created record.
    pub fn new(id: TaskId, create_time: DateTime<Utc>) -> Self {
        Self {
            id,
            create_time,
            start_time: None,
            time_to_execute: None,
            error: None,
        }
    }

    /// True once the completion update has been written.
    pub fn is_finalized(&self) -> bool {
        self.time_to_execute.is_some()
    }

    /// Apply a worker completion to this record.
    pub fn finalize(&mut self, completion: &TaskCompletion) {
        self.start_time = Some(completion.start_time);
        self.time_to_execute = Some(completion.time_to_execute);
        self.error = completion.outcome.error().map(str::to_string);
    }
}

/// How a task's execution ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded,
    Failed { error: String },
}

impl TaskOutcome {
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed { error } => Some(error),
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Succeeded => TaskStatus::Completed,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}

/// Completion result emitted by a worker for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub id: TaskId,
    pub start_time: DateTime<Utc>,
    pub time_to_execute: Duration,
    pub outcome: TaskOutcome,
}

/// Snapshot of a task occupying a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub id: TaskId,
    pub create_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub time_to_execute: Option<Duration>,
    pub error: Option<String>,
}

impl TaskView {
    /// View of a task currently occupying a slot.
    pub fn running(active: &ActiveTask) -> Self {
        Self {
            task_id: active.id,
            status: TaskStatus::Running,
            create_time: active.create_time,
            start_time: Some(active.start_time),
            time_to_execute: None,
            error: None,
        }
    }

    /// View of a task whose completion is known but may not be persisted yet.
    pub fn finished(create_time: DateTime<Utc>, completion: &TaskCompletion) -> Self {
        Self {
            task_id: completion.id,
            status: completion.outcome.status(),
            create_time,
            start_time: Some(completion.start_time),
            time_to_execute: Some(completion.time_to_execute),
            error: completion.outcome.error().map(str::to_string),
        }
    }

    /// View derived from a persisted record.
    ///
    /// An unfinalized record is still queued: its start time is not reported
    /// even if one were present.
    pub fn from_record(record: &TaskRecord) -> Self {
        match record.time_to_execute {
            None => Self {
                task_id: record.id,
                status: TaskStatus::InQueue,
                create_time: record.create_time,
                start_time: None,
                time_to_execute: None,
                error: None,
            },
            Some(elapsed) => Self {
                task_id: record.id,
                status: if record.error.is_some() {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Completed
                },
                create_time: record.create_time,
                start_time: record.start_time,
                time_to_execute: Some(elapsed),
                error: record.error.clone(),
            },
        }
    }
}
