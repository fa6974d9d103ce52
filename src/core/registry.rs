//! Ownership of submitted tasks from `add` until their body returns.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::task::{TaskEntry, TaskState};
use crate::util::serde::TaskId;

#[derive(Default)]
struct RegistryState {
    pending: VecDeque<Arc<TaskEntry>>,
    executing: HashMap<TaskId, Arc<TaskEntry>>,
}

/// Pending and executing task storage.
///
/// The lock guards membership changes only; task hooks and bodies are always
/// invoked with it released.
#[derive(Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the task's `queue` hook, then store it at the back of the pending set.
    pub(crate) fn add(&self, entry: Arc<TaskEntry>) {
        entry.task.queue();
        debug!(task_id = entry.id, task = entry.task.name(), "Task queued");
        self.state.lock().pending.push_back(entry);
    }

    /// Forget a task, pending or executing.
    ///
    /// A pending task is marked [`TaskState::Discarded`] and will never run.
    /// An executing task keeps running on its worker, which holds its own
    /// reference; the registry just stops tracking it.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            if let Some(pos) = state.pending.iter().position(|e| e.id == id) {
                state.pending.remove(pos)
            } else {
                state.executing.remove(&id)
            }
        };
        match removed {
            Some(entry) => {
                entry.state.transition(TaskState::Queued, TaskState::Discarded);
                debug!(task_id = id, "Task removed from registry");
                true
            }
            None => false,
        }
    }

    /// Move the oldest pending task into the executing set and return it.
    pub(crate) fn claim(&self) -> Option<Arc<TaskEntry>> {
        let mut state = self.state.lock();
        let entry = state.pending.pop_front()?;
        entry.state.set(TaskState::Executing);
        state.executing.insert(entry.id, Arc::clone(&entry));
        Some(entry)
    }

    /// Drop the registry's reference once a worker finished the body.
    pub(crate) fn release(&self, id: TaskId) {
        self.state.lock().executing.remove(&id);
    }

    /// Discard every pending task; executing ones are left alone.
    pub(crate) fn clear_pending(&self) -> usize {
        let drained = std::mem::take(&mut self.state.lock().pending);
        for entry in &drained {
            entry.state.set(TaskState::Discarded);
        }
        drained.len()
    }

    /// Number of tasks waiting for a worker.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of tasks whose body is running.
    pub fn executing_len(&self) -> usize {
        self.state.lock().executing.len()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskRegistry")
            .field("pending", &state.pending.len())
            .field("executing", &state.executing.len())
            .finish()
    }
}
