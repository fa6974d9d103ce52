//! Worker pool state shared between the owning thread and worker threads.
//!
//! Function items and tasks are folded into one [`WorkItem`] variant so the
//! worker loop is a single dequeue-then-run step. Function items always win
//! over tasks when both are pending.
//!
//! # Wake protocol
//!
//! Idle workers block on `wake_cv` until the wake epoch moves past the value
//! they read *before* checking the queues. Every submission bumps the epoch
//! after enqueueing, so a submission racing with a worker going idle is never
//! lost.

mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::core::callback::{Callback, CallbackChannel};
use crate::core::error::ExecutionFailure;
use crate::core::registry::TaskRegistry;
use crate::core::task::{TaskContext, TaskEntry, TaskState};
use crate::core::work_queue::WorkQueue;
use crate::util::serde::{Priority, TaskId};

pub(crate) use worker::{run_guarded, spawn_worker};

/// Point-in-time view of engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EngineStats {
    /// Worker threads not yet reaped by `tick`.
    pub live_workers: usize,
    /// Configured upper bound on workers.
    pub max_threads: usize,
    /// Function items waiting for a worker.
    pub queued_functions: usize,
    /// Tasks waiting for a worker.
    pub queued_tasks: usize,
    /// Tasks whose body is running and still held by the registry.
    pub executing_tasks: usize,
    /// Bodies (functions or tasks) currently running on workers.
    pub active_bodies: u64,
    /// Callbacks waiting for the next drain.
    pub buffered_callbacks: usize,
    /// Live timed callbacks.
    pub timers: usize,
    /// Function items accepted since creation.
    pub submitted_functions: u64,
    /// Tasks accepted since creation.
    pub submitted_tasks: u64,
    /// Bodies that returned `Ok`.
    pub completed: u64,
    /// Bodies that returned `Err` or panicked.
    pub failed: u64,
    /// Items dropped by cancel or removal before they ran.
    pub discarded: u64,
}

/// Lifetime counters (lock-free atomics).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active: AtomicU64,
    pub submitted_functions: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub discarded: AtomicU64,
}

impl PoolCounters {
    fn record(&self, succeeded: bool) {
        if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// What a function item's erased body hands back to the worker.
pub(crate) struct Finished {
    pub succeeded: bool,
    pub callback: Option<Callback>,
}

/// Plain deferred work: body, optional continuation, priority.
pub(crate) struct FunctionItem {
    pub body: Box<dyn FnOnce() -> Finished + Send + 'static>,
    pub priority: Priority,
    /// Cancellation generation current when the item was submitted.
    pub generation: u64,
}

/// Unit of work pulled by a worker.
pub(crate) enum WorkItem {
    Function(FunctionItem),
    Task(Arc<TaskEntry>),
}

impl WorkItem {
    /// Run the body on the calling worker and route its continuation.
    ///
    /// Continuations are tagged with the generation the item was submitted
    /// under, not the worker's, so work queued after a cancel keeps its
    /// callbacks even if a worker from before the cancel picks it up.
    fn run(self, shared: &Shared, worker_id: usize) {
        match self {
            Self::Function(item) => {
                let Finished { succeeded, callback } = (item.body)();
                shared.counters.record(succeeded);
                if let Some(callback) = callback {
                    if !shared.callbacks.push_tagged(item.generation, callback, item.priority) {
                        debug!(worker_id = worker_id, "Callback dropped after cancel");
                    }
                }
            }
            Self::Task(entry) => {
                debug!(worker_id = worker_id, task_id = entry.id, task = entry.task.name(), "Worker executing task");
                let ctx = TaskContext::new(entry.id, entry.generation, &shared.callbacks);
                let outcome = run_guarded(|| entry.task.execute(&ctx));
                shared.counters.record(outcome.is_ok());
                match outcome {
                    Ok(()) => entry.state.set(TaskState::Completed),
                    Err(failure) => {
                        entry.state.set(TaskState::Failed);
                        shared.deliver_task_failure(&entry, failure);
                    }
                }
                shared.registry.release(entry.id);
            }
        }
    }
}

/// State reachable from every worker and from the owning thread.
pub(crate) struct Shared {
    pub functions: WorkQueue<FunctionItem>,
    pub registry: TaskRegistry,
    pub callbacks: CallbackChannel,
    pub counters: PoolCounters,
    wake: Mutex<u64>,
    wake_cv: Condvar,
    progress: Mutex<u64>,
    progress_cv: Condvar,
    shutdown: AtomicBool,
    next_task_id: AtomicU64,
}

impl Shared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            functions: WorkQueue::new(),
            registry: TaskRegistry::new(),
            callbacks: CallbackChannel::new(),
            counters: PoolCounters::default(),
            wake: Mutex::new(0),
            wake_cv: Condvar::new(),
            progress: Mutex::new(0),
            progress_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_task_id: AtomicU64::new(1),
        })
    }

    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Returns `true` if this call flipped the flag.
    pub fn mark_shut_down(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }

    /// Queued function items plus queued tasks; running bodies excluded.
    pub fn pending_count(&self) -> usize {
        self.functions.len() + self.registry.pending_len()
    }

    /// Nothing queued, nothing running, nothing buffered.
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
            && self.counters.active.load(Ordering::SeqCst) == 0
            && self.callbacks.is_empty()
    }

    /// Function queue first, then the task registry.
    pub fn next_item(&self) -> Option<WorkItem> {
        if let Some(item) = self.functions.try_dequeue() {
            return Some(WorkItem::Function(item));
        }
        self.registry.claim().map(WorkItem::Task)
    }

    pub fn wake_epoch(&self) -> u64 {
        *self.wake.lock()
    }

    /// Wake one idle worker after new work was queued.
    pub fn notify_work(&self) {
        {
            let mut epoch = self.wake.lock();
            *epoch = epoch.wrapping_add(1);
        }
        self.wake_cv.notify_one();
    }

    /// Wake every idle worker, e.g. on cancel or shutdown.
    pub fn notify_all_workers(&self) {
        {
            let mut epoch = self.wake.lock();
            *epoch = epoch.wrapping_add(1);
        }
        self.wake_cv.notify_all();
    }

    /// Block until the wake epoch differs from `seen`.
    pub fn wait_for_work(&self, seen: u64) {
        let mut epoch = self.wake.lock();
        while *epoch == seen {
            self.wake_cv.wait(&mut epoch);
        }
    }

    pub fn report_progress(&self) {
        {
            let mut progress = self.progress.lock();
            *progress = progress.wrapping_add(1);
        }
        self.progress_cv.notify_all();
    }

    /// Sleep until a worker finishes an item or `timeout` elapses.
    pub fn wait_progress(&self, timeout: Duration) {
        let mut progress = self.progress.lock();
        let seen = *progress;
        let _ = self
            .progress_cv
            .wait_while_for(&mut progress, |p| *p == seen, timeout);
    }

    fn deliver_task_failure(&self, entry: &TaskEntry, failure: ExecutionFailure) {
        let message = failure.to_string();
        debug!(task_id = entry.id, error = %message, "Task body failed");
        match entry.task.on_failed(failure) {
            Some(callback) => {
                if !self.callbacks.push_tagged(entry.generation, callback, Priority::Normal) {
                    debug!(task_id = entry.id, "Failure callback dropped after cancel");
                }
            }
            None => {
                warn!(task_id = entry.id, task = entry.task.name(), error = %message, "Task failed with no failure handler");
            }
        }
    }
}
