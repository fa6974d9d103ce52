//! Error types for engine operations.

use thiserror::Error;

/// Errors returned synchronously to the caller of an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has been shut down; the submission was not accepted.
    #[error("engine is shutting down")]
    ShuttingDown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Failure of a work body, captured on the worker and delivered to the
/// owning thread through a callback.
#[derive(Debug, Error)]
pub enum ExecutionFailure {
    /// The body returned an error.
    #[error("work body failed: {0:#}")]
    Failed(anyhow::Error),
    /// The body panicked.
    #[error("work body panicked: {0}")]
    Panicked(String),
}

impl ExecutionFailure {
    /// Build a failure from a panic payload caught with `catch_unwind`.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        Self::Panicked(message)
    }
}

impl From<anyhow::Error> for ExecutionFailure {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
