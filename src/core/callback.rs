//! Buffer of callbacks waiting to run on the owning thread.
//!
//! Workers push, the owning thread drains. Each push is tagged with the
//! cancellation generation it belongs to; `reset` bumps the generation and
//! clears the buffer under the same lock, so a callback produced by work that
//! was in flight during a cancel can never slip in afterwards.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::core::error::ExecutionFailure;
use crate::core::work_queue::push_prioritized;
use crate::util::serde::Priority;

/// A deferred invocation that runs on the owning thread.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

struct ChannelState {
    generation: u64,
    callbacks: VecDeque<Callback>,
}

/// Generation-tagged callback buffer.
pub struct CallbackChannel {
    state: Mutex<ChannelState>,
}

impl CallbackChannel {
    /// Create an empty channel at generation zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState {
                generation: 0,
                callbacks: VecDeque::new(),
            }),
        }
    }

    /// Current cancellation generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Push a callback belonging to the current generation.
    pub fn push(&self, callback: Callback, priority: Priority) {
        let mut state = self.state.lock();
        push_prioritized(&mut state.callbacks, callback, priority);
    }

    /// Push a callback only if `generation` is still current.
    ///
    /// Returns `false` when the callback was dropped because a cancel happened
    /// after the producing work was claimed.
    pub fn push_tagged(&self, generation: u64, callback: Callback, priority: Priority) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        push_prioritized(&mut state.callbacks, callback, priority);
        true
    }

    /// Start a new generation and drop every buffered callback.
    ///
    /// Returns the new generation and the number of discarded callbacks.
    pub fn reset(&self) -> (u64, usize) {
        let (generation, dropped) = {
            let mut state = self.state.lock();
            state.generation += 1;
            (state.generation, std::mem::take(&mut state.callbacks))
        };
        (generation, dropped.len())
    }

    /// Number of buffered callbacks.
    pub fn len(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().callbacks.is_empty()
    }

    /// Invoke every callback buffered at the moment of the call.
    ///
    /// The buffer is swapped out under the lock and invoked with the lock
    /// released. Callbacks pushed while the batch runs (including by the batch
    /// itself) wait for the next drain. A panicking callback is logged and the
    /// rest of the batch still runs.
    pub fn drain_once(&self) -> usize {
        let batch = std::mem::take(&mut self.state.lock().callbacks);
        let count = batch.len();
        for callback in batch {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                let failure = ExecutionFailure::from_panic(&*payload);
                error!(error = %failure, "Callback panicked on owning thread");
            }
        }
        if count > 0 {
            debug!(count = count, "Drained callbacks");
        }
        count
    }
}

impl Default for CallbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CallbackChannel")
            .field("generation", &state.generation)
            .field("buffered", &state.callbacks.len())
            .finish()
    }
}
