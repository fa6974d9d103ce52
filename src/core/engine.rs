//! Owning-thread facade over the worker pool.
//!
//! [`Engine`] is created and ticked by exactly one thread, the owning thread,
//! which is also the only thread that ever runs callbacks. Collaborators that
//! only need to submit work get a cloneable [`Submitter`] instead of the
//! engine itself.
//!
//! ```rust,ignore
//! let mut engine = Engine::new(EngineConfig::new().with_max_threads(4))?;
//! engine.submit_with_callback(
//!     move || decode(&bytes),
//!     move |decoded| match decoded {
//!         Ok(mesh) => upload(mesh),
//!         Err(e) => tracing::warn!(error = %e, "decode failed"),
//!     },
//!     Priority::Normal,
//! )?;
//! loop {
//!     engine.tick();
//!     render();
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::callback::Callback;
use crate::core::error::{EngineError, ExecutionFailure};
use crate::core::task::{Task, TaskEntry, TaskHandle, TaskState};
use crate::core::timer::TimedCallbackScheduler;
use crate::core::worker_pool::{run_guarded, spawn_worker, EngineStats, Finished, FunctionItem, Shared};
use crate::util::clock::{Clock, SystemClock};
use crate::util::serde::{Priority, TimedHandle};

/// Cloneable, thread-safe submission handle.
///
/// Usable from any thread, including from inside work bodies and callbacks.
#[derive(Clone)]
pub struct Submitter {
    shared: Arc<Shared>,
}

impl Submitter {
    /// Queue fire-and-forget work. Failures are logged.
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after the engine was shut down.
    pub fn submit<W>(&self, work: W, priority: Priority) -> Result<(), EngineError>
    where
        W: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.enqueue_function(
            Box::new(move || {
                let outcome = run_guarded(work);
                if let Err(failure) = &outcome {
                    warn!(error = %failure, "Work item failed with no callback");
                }
                Finished {
                    succeeded: outcome.is_ok(),
                    callback: None,
                }
            }),
            priority,
        )
    }

    /// Queue work whose result is handed to `callback` on the owning thread.
    ///
    /// The callback receives `Err` if the body returned an error or panicked.
    /// It is queued with the same priority as the work.
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after the engine was shut down.
    pub fn submit_with_callback<W, R, C>(&self, work: W, callback: C, priority: Priority) -> Result<(), EngineError>
    where
        W: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
        C: FnOnce(Result<R, ExecutionFailure>) + Send + 'static,
    {
        self.enqueue_function(
            Box::new(move || {
                let outcome = run_guarded(work);
                let succeeded = outcome.is_ok();
                let continuation: Callback = Box::new(move || callback(outcome));
                Finished {
                    succeeded,
                    callback: Some(continuation),
                }
            }),
            priority,
        )
    }

    fn enqueue_function(
        &self,
        body: Box<dyn FnOnce() -> Finished + Send + 'static>,
        priority: Priority,
    ) -> Result<(), EngineError> {
        if self.shared.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }
        let generation = self.shared.callbacks.generation();
        self.shared.functions.enqueue(
            FunctionItem {
                body,
                priority,
                generation,
            },
            priority,
        );
        self.shared
            .counters
            .submitted_functions
            .fetch_add(1, Ordering::Relaxed);
        self.shared.notify_work();
        debug!(priority = ?priority, "Work item submitted");
        Ok(())
    }

    /// Hand a task to the engine. Its `queue` hook runs immediately.
    ///
    /// The engine keeps the task alive until its body returns or it is
    /// removed; the returned handle is a weak reference for state queries and
    /// [`Submitter::remove_task`].
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after the engine was shut down.
    pub fn add_task<T: Task>(&self, task: Arc<T>) -> Result<TaskHandle, EngineError> {
        if self.shared.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }
        let entry = TaskEntry::new(
            self.shared.next_task_id(),
            self.shared.callbacks.generation(),
            task,
        );
        let handle = entry.handle();
        self.shared.registry.add(entry);
        self.shared
            .counters
            .submitted_tasks
            .fetch_add(1, Ordering::Relaxed);
        self.shared.notify_work();
        Ok(handle)
    }

    /// Stop tracking a task.
    ///
    /// A task that has not started is discarded without any callback. A
    /// running task finishes its body; the engine just stops holding it.
    /// Returns `false` if the engine no longer holds the task.
    pub fn remove_task(&self, handle: &TaskHandle) -> bool {
        let removed = self.shared.registry.remove(handle.id());
        if removed && handle.state() == TaskState::Discarded {
            self.shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Push a callback straight to the owning thread, bypassing the workers.
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after the engine was shut down.
    pub fn queue_callback<F>(&self, callback: F, priority: Priority) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }
        self.shared.callbacks.push(Box::new(callback), priority);
        Ok(())
    }

    /// Queued function items plus queued tasks. Running bodies are not counted.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Whether the engine refuses new work.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_shut_down()
    }
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("pending", &self.shared.pending_count())
            .field("shut_down", &self.shared.is_shut_down())
            .finish()
    }
}

/// Background work engine driven by the owning thread.
///
/// Worker threads are spawned lazily from [`Engine::tick`], one per tick,
/// while there is pending work and fewer than `max_threads` live workers.
pub struct Engine {
    config: EngineConfig,
    submitter: Submitter,
    clock: Arc<dyn Clock>,
    timers: TimedCallbackScheduler,
    workers: HashMap<usize, JoinHandle<()>>,
    retired_tx: Sender<usize>,
    retired_rx: Receiver<usize>,
    next_worker_id: usize,
}

impl Engine {
    /// Create an engine using the wall clock.
    ///
    /// No threads are started until work is pending and `tick` runs.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if the configuration is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine whose timers read `clock`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConfig`] if the configuration is invalid.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        let (retired_tx, retired_rx) = unbounded();
        info!(
            max_threads = config.max_threads,
            thread_name_prefix = %config.thread_name_prefix,
            "Engine initialized"
        );
        Ok(Self {
            config,
            submitter: Submitter {
                shared: Shared::new(),
            },
            clock,
            timers: TimedCallbackScheduler::new(),
            workers: HashMap::new(),
            retired_tx,
            retired_rx,
            next_worker_id: 0,
        })
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cloneable submission handle for collaborators.
    #[must_use]
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    fn shared(&self) -> &Shared {
        &self.submitter.shared
    }

    /// See [`Submitter::submit`].
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after shutdown.
    pub fn submit<W>(&self, work: W, priority: Priority) -> Result<(), EngineError>
    where
        W: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.submitter.submit(work, priority)
    }

    /// See [`Submitter::submit_with_callback`].
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after shutdown.
    pub fn submit_with_callback<W, R, C>(&self, work: W, callback: C, priority: Priority) -> Result<(), EngineError>
    where
        W: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
        C: FnOnce(Result<R, ExecutionFailure>) + Send + 'static,
    {
        self.submitter.submit_with_callback(work, callback, priority)
    }

    /// See [`Submitter::add_task`].
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after shutdown.
    pub fn add_task<T: Task>(&self, task: Arc<T>) -> Result<TaskHandle, EngineError> {
        self.submitter.add_task(task)
    }

    /// See [`Submitter::remove_task`].
    pub fn remove_task(&self, handle: &TaskHandle) -> bool {
        self.submitter.remove_task(handle)
    }

    /// See [`Submitter::queue_callback`].
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] after shutdown.
    pub fn queue_callback<F>(&self, callback: F, priority: Priority) -> Result<(), EngineError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submitter.queue_callback(callback, priority)
    }

    /// Queued function items plus queued tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.submitter.pending_count()
    }

    /// Run `callback` on the owning thread after `delay`, and every `delay`
    /// after that if `repeat` is set.
    pub fn schedule_timed<F>(&mut self, callback: F, delay: Duration, repeat: bool) -> TimedHandle
    where
        F: FnMut() + Send + 'static,
    {
        let now = self.clock.now();
        self.timers.schedule(callback, delay, repeat, now)
    }

    /// Cancel a timer. No-op returning `false` if it already fired (one-shot)
    /// or was cancelled.
    pub fn cancel_timed(&mut self, handle: TimedHandle) -> bool {
        self.timers.cancel(handle)
    }

    /// Per-iteration bookkeeping for the owning thread.
    ///
    /// Reaps exited workers, moves due timers into the callback buffer, spawns
    /// one worker if work is pending and capacity allows, then drains the
    /// callbacks buffered at this point. Never blocks on workers. Returns the
    /// number of callbacks invoked.
    pub fn tick(&mut self) -> usize {
        self.reap_retired();
        let now = self.clock.now();
        self.timers.fire_due(now, &self.submitter.shared.callbacks);
        self.maybe_spawn_worker();
        self.shared().callbacks.drain_once()
    }

    fn maybe_spawn_worker(&mut self) {
        if self.shared().is_shut_down()
            || self.shared().pending_count() == 0
            || self.workers.len() >= self.config.max_threads
        {
            return;
        }
        let worker_id = self.next_worker_id;
        let generation = self.shared().callbacks.generation();
        match spawn_worker(
            worker_id,
            generation,
            Arc::clone(&self.submitter.shared),
            self.retired_tx.clone(),
            &self.config,
        ) {
            Ok(handle) => {
                self.next_worker_id += 1;
                self.workers.insert(worker_id, handle);
                debug!(worker_id = worker_id, live = self.workers.len(), "Worker spawned");
            }
            Err(e) => error!(error = %e, "Could not spawn worker"),
        }
    }

    fn reap_retired(&mut self) {
        for worker_id in self.retired_rx.try_iter() {
            if let Some(handle) = self.workers.remove(&worker_id) {
                if handle.join().is_err() {
                    warn!(worker_id = worker_id, "Worker panicked");
                }
            }
        }
    }

    /// Drop all queued work and buffered callbacks and retire idle workers.
    ///
    /// Returns as soon as everything is signalled. Bodies already running
    /// finish in the background; their callbacks are discarded. The engine is
    /// immediately usable again. Calling it on an idle engine is a no-op.
    pub fn cancel_all(&mut self) {
        let functions = self.shared().functions.clear();
        let tasks = self.shared().registry.clear_pending();
        let (generation, callbacks) = self.shared().callbacks.reset();
        self.shared().notify_all_workers();

        let discarded = u64::try_from(functions + tasks).unwrap_or(u64::MAX);
        self.shared()
            .counters
            .discarded
            .fetch_add(discarded, Ordering::Relaxed);
        self.reap_retired();

        info!(
            generation = generation,
            functions = functions,
            tasks = tasks,
            callbacks = callbacks,
            "Cancelled all pending work"
        );
    }

    /// Tick until no work is queued or running and no callbacks are buffered,
    /// or until `timeout` elapses. Returns `true` if the engine went idle.
    ///
    /// Timers are not waited for.
    pub fn wait_all(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            if self.shared().is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // bounded so newly pending work still gets a worker spawned
            self.shared()
                .wait_progress((deadline - now).min(Duration::from_millis(5)));
        }
    }

    /// Snapshot of queue depths and counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let shared = self.shared();
        EngineStats {
            live_workers: self.workers.len(),
            max_threads: self.config.max_threads,
            queued_functions: shared.functions.len(),
            queued_tasks: shared.registry.pending_len(),
            executing_tasks: shared.registry.executing_len(),
            active_bodies: shared.counters.active.load(Ordering::SeqCst),
            buffered_callbacks: shared.callbacks.len(),
            timers: self.timers.len(),
            submitted_functions: shared.counters.submitted_functions.load(Ordering::Relaxed),
            submitted_tasks: shared.counters.submitted_tasks.load(Ordering::Relaxed),
            completed: shared.counters.completed.load(Ordering::Relaxed),
            failed: shared.counters.failed.load(Ordering::Relaxed),
            discarded: shared.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Whether the engine refuses new work.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared().is_shut_down()
    }

    /// Tear the engine down.
    ///
    /// Cancels everything, refuses further submissions, and joins each
    /// worker for up to `join_timeout`. Workers still busy after that are
    /// detached.
    pub fn shutdown(&mut self) {
        if !self.shared().mark_shut_down() {
            return;
        }
        info!("Shutting down engine");
        self.cancel_all();
        self.timers.clear();

        let timeout = self.config.join_timeout();
        let worker_count = self.workers.len();
        for (worker_id, worker) in self.workers.drain() {
            // join on a helper thread so a stuck body cannot hang shutdown
            let (tx, rx) = bounded(1);
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(timeout) {
                Ok(true) => debug!(worker_id = worker_id, "Worker joined"),
                Ok(false) => warn!(worker_id = worker_id, "Worker panicked"),
                Err(_) => {
                    warn!(worker_id = worker_id, "Worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = joiner.join();
        }
        info!(worker_count = worker_count, "Engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // signal only; explicit shutdown() is required for joining
        if self.shared().mark_shut_down() {
            self.shared().functions.clear();
            self.shared().registry.clear_pending();
            self.shared().callbacks.reset();
            self.shared().notify_all_workers();
            debug!("Engine dropped without explicit shutdown, workers detached");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("workers", &self.workers.len())
            .field("timers", &self.timers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn engine(threads: usize) -> Engine {
        Engine::new(EngineConfig::new().with_max_threads(threads)).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Engine::new(EngineConfig::new().with_max_threads(0)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_no_worker_without_pending_work() {
        let mut engine = engine(2);
        engine.tick();
        assert_eq!(engine.stats().live_workers, 0);
    }

    #[test]
    fn test_one_worker_spawned_per_tick() {
        let mut engine = engine(4);
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded::<()>();
        for _ in 0..8 {
            let gate = gate_rx.clone();
            engine
                .submit(
                    move || {
                        let _ = gate.recv();
                        Ok(())
                    },
                    Priority::Normal,
                )
                .unwrap();
        }

        engine.tick();
        assert_eq!(engine.stats().live_workers, 1);
        engine.tick();
        assert_eq!(engine.stats().live_workers, 2);

        drop(gate_tx);
        assert!(engine.wait_all(Duration::from_secs(10)));
        engine.shutdown();
    }

    #[test]
    fn test_callback_runs_on_owning_thread() {
        let mut engine = engine(2);
        let owner = thread::current().id();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&seen);

        engine
            .submit_with_callback(
                || Ok(thread::current().id()),
                move |worker| {
                    *sink.lock() = Some((worker.unwrap(), thread::current().id()));
                },
                Priority::Normal,
            )
            .unwrap();

        assert!(engine.wait_all(Duration::from_secs(10)));
        let (worker, callback) = seen.lock().take().unwrap();
        assert_ne!(worker, owner);
        assert_eq!(callback, owner);
        engine.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails_fast() {
        let mut engine = engine(1);
        let submitter = engine.submitter();
        engine.shutdown();

        assert!(matches!(
            engine.submit(|| Ok(()), Priority::Normal),
            Err(EngineError::ShuttingDown)
        ));
        assert!(matches!(
            submitter.queue_callback(|| {}, Priority::Normal),
            Err(EngineError::ShuttingDown)
        ));
    }

    #[test]
    fn test_queue_callback_runs_on_tick() {
        let mut engine = engine(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        engine
            .queue_callback(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                Priority::High,
            )
            .unwrap();

        assert_eq!(engine.tick(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().live_workers, 0);
    }
}
