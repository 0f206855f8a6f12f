// Active task registry
//
// Fixed-capacity slot table shared by every worker and the orchestrator.
// One mutex guards both the slots and the settling entries, so a slot release
// and the settling insert it implies are observed together.
//
// Lifecycle of one execution:
//   acquire_slot -> [slot occupied, query says Run]
//   SlotHandle::settle -> [slot free, settling entry holds the outcome]
//   clear_settled -> [entry gone, store holds the outcome]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use taskq_core::{ActiveTask, TaskCompletion, TaskId, TaskView};
use tracing::{debug, warn};

/// Registry errors. Both are invariant violations: the pool never runs more
/// tasks than there are slots, and a task runs at most once.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no free slot among {capacity} for task {id}")]
    CapacityExhausted { id: TaskId, capacity: usize },

    #[error("task {0} already occupies a slot")]
    AlreadyActive(TaskId),
}

struct Settling {
    create_time: DateTime<Utc>,
    completion: TaskCompletion,
}

struct RegistryState {
    slots: Vec<Option<ActiveTask>>,
    settling: HashMap<TaskId, Settling>,
}

impl RegistryState {
    fn release(&mut self, index: usize, id: TaskId) -> Option<ActiveTask> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.map(|active| active.id) == Some(id) => slot.take(),
            _ => None,
        }
    }
}

/// Shared table of currently executing tasks.
pub struct ActiveTaskRegistry {
    state: Mutex<RegistryState>,
}

impl ActiveTaskRegistry {
    /// Create a registry with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                slots: vec![None; capacity],
                settling: HashMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Claim the first free slot for `id`.
    pub fn acquire_slot(
        self: &Arc<Self>,
        id: TaskId,
        create_time: DateTime<Utc>,
        start_time: DateTime<Utc>,
    ) -> Result<SlotHandle, RegistryError> {
        let mut state = self.state.lock();

        if state.slots.iter().flatten().any(|active| active.id == id) {
            return Err(RegistryError::AlreadyActive(id));
        }

        let capacity = state.slots.len();
        let index = state
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::CapacityExhausted { id, capacity })?;

        state.slots[index] = Some(ActiveTask {
            id,
            create_time,
            start_time,
        });
        drop(state);

        debug!(task_id = %id, slot = index, "acquired registry slot");
        Ok(SlotHandle {
            registry: Arc::clone(self),
            index,
            id,
            released: false,
        })
    }

    /// Free the slot held by `handle`.
    pub fn release_slot(&self, mut handle: SlotHandle) {
        self.release(handle.index, handle.id, None);
        handle.released = true;
    }

    fn release(&self, index: usize, id: TaskId, completion: Option<TaskCompletion>) {
        let mut state = self.state.lock();
        let Some(active) = state.release(index, id) else {
            warn!(task_id = %id, slot = index, "slot was not held by this task");
            return;
        };

        if let Some(completion) = completion {
            state.settling.insert(
                id,
                Settling {
                    create_time: active.create_time,
                    completion,
                },
            );
        }
        drop(state);

        debug!(task_id = %id, slot = index, "released registry slot");
    }

    /// Ids of tasks currently occupying a slot.
    pub fn active_ids(&self) -> HashSet<TaskId> {
        self.state
            .lock()
            .slots
            .iter()
            .flatten()
            .map(|active| active.id)
            .collect()
    }

    /// Snapshots of occupied slots, in slot order.
    pub fn active_tasks(&self) -> Vec<ActiveTask> {
        self.state.lock().slots.iter().flatten().copied().collect()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.state.lock().slots.iter().flatten().count()
    }

    /// Status known to the registry: running, or finished but not yet
    /// persisted. `None` means the store is authoritative.
    pub fn lookup(&self, id: TaskId) -> Option<TaskView> {
        let state = self.state.lock();

        if let Some(active) = state.slots.iter().flatten().find(|active| active.id == id) {
            return Some(TaskView::running(active));
        }

        state
            .settling
            .get(&id)
            .map(|entry| TaskView::finished(entry.create_time, &entry.completion))
    }

    /// Drop the settling entry once the completion is durable.
    ///
    /// Entries whose completion never became durable are not cleared; each
    /// one corresponds to a published `CompletionNotPersisted` failure.
    pub fn clear_settled(&self, id: TaskId) {
        self.state.lock().settling.remove(&id);
    }

    /// Number of finished tasks whose completion is not yet persisted.
    pub fn settling_len(&self) -> usize {
        self.state.lock().settling.len()
    }
}

/// Proof of slot ownership. Releases the slot when dropped.
pub struct SlotHandle {
    registry: Arc<ActiveTaskRegistry>,
    index: usize,
    id: TaskId,
    released: bool,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Release the slot and record `completion` as the task's settling outcome
    /// in the same critical section.
    pub fn settle(mut self, completion: TaskCompletion) {
        self.registry.release(self.index, self.id, Some(completion));
        self.released = true;
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        if !self.released {
            self.registry.release(self.index, self.id, None);
        }
    }
}

impl std::fmt::Debug for SlotHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("index", &self.index)
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use taskq_core::{TaskOutcome, TaskStatus};

    use super::*;

    fn acquire(registry: &Arc<ActiveTaskRegistry>, id: i64) -> Result<SlotHandle, RegistryError> {
        registry.acquire_slot(TaskId::new(id), Utc::now(), Utc::now())
    }

    fn completion(id: i64) -> TaskCompletion {
        TaskCompletion {
            id: TaskId::new(id),
            start_time: Utc::now(),
            time_to_execute: Duration::from_millis(10),
            outcome: TaskOutcome::Succeeded,
        }
    }

    #[test]
    fn test_first_free_slot_is_claimed() {
        let registry = Arc::new(ActiveTaskRegistry::new(3));
        let a = acquire(&registry, 1).unwrap();
        let b = acquire(&registry, 2).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));

        registry.release_slot(a);
        let c = acquire(&registry, 3).unwrap();
        assert_eq!(c.index(), 0);
        assert_eq!(registry.occupied(), 2);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let registry = Arc::new(ActiveTaskRegistry::new(1));
        let _held = acquire(&registry, 1).unwrap();
        assert_eq!(
            acquire(&registry, 2).unwrap_err(),
            RegistryError::CapacityExhausted {
                id: TaskId::new(2),
                capacity: 1
            }
        );
    }

    #[test]
    fn test_same_task_cannot_hold_two_slots() {
        let registry = Arc::new(ActiveTaskRegistry::new(2));
        let _held = acquire(&registry, 7).unwrap();
        assert_eq!(
            acquire(&registry, 7).unwrap_err(),
            RegistryError::AlreadyActive(TaskId::new(7))
        );
    }

    #[test]
    fn test_drop_releases_slot() {
        let registry = Arc::new(ActiveTaskRegistry::new(1));
        {
            let _held = acquire(&registry, 1).unwrap();
            assert!(registry.active_ids().contains(&TaskId::new(1)));
        }
        assert!(registry.active_ids().is_empty());
        assert!(registry.lookup(TaskId::new(1)).is_none());
    }

    #[test]
    fn test_slot_released_when_holder_panics() {
        let registry = Arc::new(ActiveTaskRegistry::new(1));
        let shared = Arc::clone(&registry);
        let result = std::thread::spawn(move || {
            let _held = acquire(&shared, 1).unwrap();
            panic!("worker blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(registry.occupied(), 0);
    }

    #[test]
    fn test_lookup_reports_running_then_settling() {
        let registry = Arc::new(ActiveTaskRegistry::new(1));
        let handle = acquire(&registry, 5).unwrap();
        assert_eq!(
            registry.lookup(TaskId::new(5)).unwrap().status,
            TaskStatus::Running
        );

        handle.settle(completion(5));
        assert_eq!(registry.occupied(), 0);
        let view = registry.lookup(TaskId::new(5)).unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.time_to_execute, Some(Duration::from_millis(10)));

        registry.clear_settled(TaskId::new(5));
        assert!(registry.lookup(TaskId::new(5)).is_none());
        assert_eq!(registry.settling_len(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_capacity() {
        let registry = Arc::new(ActiveTaskRegistry::new(4));
        let threads: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for round in 0..100 {
                        let id = i * 1000 + round;
                        if let Ok(handle) = acquire(&registry, id) {
                            assert!(registry.occupied() <= 4);
                            drop(handle);
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(registry.occupied(), 0);
    }
}
