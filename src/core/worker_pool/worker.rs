//! Worker thread body: dequeue, run off the owning thread, park when idle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::config::EngineConfig;
use crate::core::error::{EngineError, ExecutionFailure};

use super::Shared;

/// Run `body`, turning both `Err` and panics into an [`ExecutionFailure`].
pub(crate) fn run_guarded<R, F>(body: F) -> Result<R, ExecutionFailure>
where
    F: FnOnce() -> anyhow::Result<R>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ExecutionFailure::Failed(err)),
        Err(payload) => Err(ExecutionFailure::from_panic(&*payload)),
    }
}

/// Reports the worker id to the owning thread when the thread ends, however
/// it ends.
struct RetireGuard {
    worker_id: usize,
    retired: Sender<usize>,
}

impl Drop for RetireGuard {
    fn drop(&mut self) {
        let _ = self.retired.send(self.worker_id);
    }
}

/// Spawn a worker bound to cancellation `generation`.
pub(crate) fn spawn_worker(
    worker_id: usize,
    generation: u64,
    shared: Arc<Shared>,
    retired: Sender<usize>,
    config: &EngineConfig,
) -> Result<JoinHandle<()>, EngineError> {
    let mut builder = thread::Builder::new().name(format!("{}-{worker_id}", config.thread_name_prefix));
    if let Some(size) = config.thread_stack_size {
        builder = builder.stack_size(size);
    }
    builder
        .spawn(move || {
            let _guard = RetireGuard { worker_id, retired };
            worker_loop(worker_id, generation, &shared);
        })
        .map_err(|e| EngineError::Spawn(e.to_string()))
}

fn worker_loop(worker_id: usize, generation: u64, shared: &Shared) {
    debug!(worker_id = worker_id, generation = generation, "Worker thread started");

    loop {
        if shared.is_shut_down() {
            debug!(worker_id = worker_id, "Worker observed shutdown, exiting");
            break;
        }
        if shared.callbacks.generation() != generation {
            debug!(worker_id = worker_id, generation = generation, "Worker cancelled, exiting");
            break;
        }

        // read before looking at the queues, see the wake protocol
        let seen = shared.wake_epoch();

        shared.counters.active.fetch_add(1, Ordering::SeqCst);
        if let Some(item) = shared.next_item() {
            item.run(shared, worker_id);
            shared.counters.active.fetch_sub(1, Ordering::SeqCst);
            shared.report_progress();
            continue;
        }
        shared.counters.active.fetch_sub(1, Ordering::SeqCst);

        shared.wait_for_work(seen);
    }

    debug!(worker_id = worker_id, "Worker thread exiting");
}
