//! Read a file and decode it on a worker, then notify listeners on the owning
//! thread.
//!
//! This is the shape asset loaders use: the decoder runs off-thread and
//! produces a plain value; the completion handlers receive that value on the
//! owning thread where they may upload it to the renderer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use parking_lot::Mutex;

use crate::core::{Callback, ExecutionFailure, Task, TaskContext};
use crate::util::serde::Priority;

type Decoder<T> = Box<dyn Fn(&[u8]) -> anyhow::Result<T> + Send + Sync + 'static>;
type CompleteHandler<T> = Box<dyn FnOnce(&T) + Send + 'static>;
type FailHandler = Box<dyn FnOnce(&ExecutionFailure) + Send + 'static>;

/// File read + decode task with any number of completion and failure handlers.
pub struct ReadTask<T> {
    path: PathBuf,
    decoder: Decoder<T>,
    priority: Priority,
    on_complete: Mutex<Vec<CompleteHandler<T>>>,
    on_fail: Mutex<Vec<FailHandler>>,
    in_flight: AtomicBool,
}

impl<T: Send + 'static> ReadTask<T> {
    /// Task reading `path` and passing the bytes to `decoder`.
    pub fn new<P, D>(path: P, decoder: D) -> Self
    where
        P: Into<PathBuf>,
        D: Fn(&[u8]) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            decoder: Box::new(decoder),
            priority: Priority::Normal,
            on_complete: Mutex::new(Vec::new()),
            on_fail: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Priority of the completion callback.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a handler that receives the decoded value on the owning thread.
    pub fn on_complete<F>(&self, handler: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.on_complete.lock().push(Box::new(handler));
    }

    /// Add a handler that receives the failure on the owning thread.
    pub fn on_fail<F>(&self, handler: F)
    where
        F: FnOnce(&ExecutionFailure) + Send + 'static,
    {
        self.on_fail.lock().push(Box::new(handler));
    }

    /// File being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` from the moment the engine accepts the task until its body
    /// finishes.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl<T: Send + 'static> Task for ReadTask<T> {
    fn queue(&self) {
        self.in_flight.store(true, Ordering::Release);
    }

    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let value = (self.decoder)(&bytes)
            .with_context(|| format!("decoding {}", self.path.display()))?;
        self.in_flight.store(false, Ordering::Release);

        let handlers = std::mem::take(&mut *self.on_complete.lock());
        ctx.post(
            move || {
                for handler in handlers {
                    handler(&value);
                }
            },
            self.priority,
        );
        Ok(())
    }

    fn on_failed(&self, failure: ExecutionFailure) -> Option<Callback> {
        self.in_flight.store(false, Ordering::Release);
        let handlers = std::mem::take(&mut *self.on_fail.lock());
        if handlers.is_empty() {
            return None;
        }
        Some(Box::new(move || {
            for handler in handlers {
                handler(&failure);
            }
        }))
    }

    fn name(&self) -> &str {
        "read_task"
    }
}

impl<T> std::fmt::Debug for ReadTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTask")
            .field("path", &self.path)
            .field("priority", &self.priority)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
