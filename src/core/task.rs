//! Polymorphic long-lived tasks and the handles used to track them.
//!
//! The registry holds the only strong reference the engine needs to run a
//! task. A [`TaskHandle`] keeps a weak reference plus the shared state cell, so
//! it can observe and cancel a task but never execute it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::core::callback::{Callback, CallbackChannel};
use crate::core::error::ExecutionFailure;
use crate::util::serde::{Priority, TaskId};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the registry for a worker.
    Queued,
    /// A worker is running the body.
    Executing,
    /// The body returned `Ok`.
    Completed,
    /// The body returned `Err` or panicked.
    Failed,
    /// Removed or cancelled before a worker claimed it.
    Discarded,
}

impl TaskState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Executing => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Discarded => 4,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Queued,
            1 => Self::Executing,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Discarded,
        }
    }

    /// Whether the task can no longer run.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Discarded)
    }
}

/// Atomic cell shared between the registry entry and the submitter's handle.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) const fn new(state: TaskState) -> Self {
        Self(AtomicU8::new(state.to_u8()))
    }

    pub(crate) fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: TaskState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// Move from `from` to `to`; returns `false` if the state was something else.
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A unit of work with its own completion handling, e.g. "read a file, then
/// decode it".
///
/// `execute` runs on a worker thread. On success the task is responsible for
/// posting its own completion callback through [`TaskContext::post`]. If the
/// body returns an error or panics, the worker calls [`Task::on_failed`] and
/// delivers the returned callback to the owning thread.
pub trait Task: Send + Sync + 'static {
    /// Pre-flight hook, invoked once when the task is added to the engine.
    fn queue(&self) {}

    /// Task body. Must not touch owning-thread state directly.
    ///
    /// # Errors
    ///
    /// Any error is captured by the worker and routed to [`Task::on_failed`].
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()>;

    /// Build the failure continuation for the owning thread.
    ///
    /// Returning `None` means nobody listens; the worker logs the failure.
    fn on_failed(&self, failure: ExecutionFailure) -> Option<Callback> {
        let _ = failure;
        None
    }

    /// Name used in log events.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Registry-owned record of a submitted task.
pub(crate) struct TaskEntry {
    pub(crate) id: TaskId,
    /// Cancellation generation current when the task was submitted.
    pub(crate) generation: u64,
    pub(crate) state: Arc<StateCell>,
    pub(crate) task: Arc<dyn Task>,
}

impl TaskEntry {
    pub(crate) fn new(id: TaskId, generation: u64, task: Arc<dyn Task>) -> Arc<Self> {
        Arc::new(Self {
            id,
            generation,
            state: Arc::new(StateCell::new(TaskState::Queued)),
            task,
        })
    }

    pub(crate) fn handle(self: &Arc<Self>) -> TaskHandle {
        TaskHandle {
            id: self.id,
            state: Arc::clone(&self.state),
            entry: Arc::downgrade(self),
        }
    }
}

impl std::fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEntry")
            .field("id", &self.id)
            .field("name", &self.task.name())
            .field("state", &self.state.get())
            .finish()
    }
}

/// Submitter-side reference to a task, used for state queries and removal.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    state: Arc<StateCell>,
    entry: Weak<TaskEntry>,
}

impl TaskHandle {
    /// Engine-assigned identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Whether the engine (registry or a worker) still holds the task.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.entry.strong_count() > 0
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskHandle {}

/// Worker-side view handed to [`Task::execute`].
pub struct TaskContext<'a> {
    task_id: TaskId,
    generation: u64,
    channel: &'a CallbackChannel,
}

impl<'a> TaskContext<'a> {
    pub(crate) const fn new(task_id: TaskId, generation: u64, channel: &'a CallbackChannel) -> Self {
        Self {
            task_id,
            generation,
            channel,
        }
    }

    /// Identifier of the running task.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Queue `callback` for the owning thread.
    ///
    /// Returns `false` if the engine was cancelled since this task was
    /// submitted; the callback is then dropped.
    pub fn post<F>(&self, callback: F, priority: Priority) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.channel
            .push_tagged(self.generation, Box::new(callback), priority)
    }

    /// Whether a cancel happened since this task was submitted. Long bodies
    /// may poll this to stop early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.channel.generation() != self.generation
    }
}
