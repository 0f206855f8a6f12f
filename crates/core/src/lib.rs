// Task Abstractions
//
// This crate provides the storage-agnostic building blocks of taskq:
// a task is identity + timing metadata wrapped around a single capability,
// "execute the work and produce a result".
//
// Key design decisions:
// - `Work` is the capability trait; new task kinds implement it, no hierarchy
// - `Task` owns the metadata and enforces the set-once field invariants
// - Ids are assigned by the persistence layer, never generated here
// - Status/record types are shared by the queue engine and the HTTP surface

pub mod ids;
pub mod mock;
pub mod record;
pub mod status;
pub mod task;

// Telemetry (tracing subscriber setup for binaries)
pub mod telemetry;

pub use ids::TaskId;
pub use mock::MockTask;
pub use record::{ActiveTask, TaskCompletion, TaskOutcome, TaskRecord, TaskView};
pub use status::TaskStatus;
pub use task::{FnTask, Task, TaskError, Work, WorkResult};
