//! Runtime error types.

use modhost_engine::EngineError;
use modhost_module::PipelineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine was unreachable.
    #[error(transparent)]
    Connection(EngineError),

    /// The engine refused a worker operation after connecting.
    #[error("engine error: {0}")]
    Engine(EngineError),

    /// A module could not be loaded onto the worker.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// [`WorkerRuntime::run`](crate::WorkerRuntime::run) was called twice.
    #[error("worker runtime has already run")]
    AlreadyRun,
}

impl From<EngineError> for RuntimeError {
    fn from(err: EngineError) -> Self {
        if err.is_connection() {
            RuntimeError::Connection(err)
        } else {
            RuntimeError::Engine(err)
        }
    }
}
