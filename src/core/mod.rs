//! Queues, task registry, worker pool and the owning-thread engine.

pub mod callback;
pub mod engine;
pub mod error;
pub mod registry;
pub mod task;
pub mod timer;
pub mod work_queue;
pub mod worker_pool;

pub use callback::{Callback, CallbackChannel};
pub use engine::{Engine, Submitter};
pub use error::{AppResult, EngineError, ExecutionFailure};
pub use registry::TaskRegistry;
pub use task::{Task, TaskContext, TaskHandle, TaskState};
pub use timer::TimedCallbackScheduler;
pub use work_queue::WorkQueue;
pub use worker_pool::EngineStats;
