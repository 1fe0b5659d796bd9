//! Error types for the engine seam.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be reached.
    #[error("failed to connect to workflow engine at {address}: {source}")]
    Connection {
        address: String,
        source: std::io::Error,
    },

    /// A handler with this name is already registered on the worker.
    #[error("handler '{name}' is already registered on task queue '{task_queue}'")]
    DuplicateHandler { name: String, task_queue: String },

    /// No handler with this name exists on the task queue.
    #[error("no handler '{name}' on task queue '{task_queue}'")]
    UnknownHandler { name: String, task_queue: String },

    /// No worker serves this task queue.
    #[error("no worker for task queue '{0}'")]
    UnknownQueue(String),

    /// A worker already serves this task queue.
    #[error("task queue '{0}' already has a worker")]
    QueueTaken(String),

    /// A handler ran and failed.
    #[error("handler '{name}' failed: {source}")]
    Handler {
        name: String,
        #[source]
        source: HandlerError,
    },

    /// The worker loop could not run or stopped abnormally.
    #[error("worker error: {0}")]
    Worker(String),

    /// The client was closed.
    #[error("engine client is closed")]
    Closed,
}

impl EngineError {
    /// Whether this error came from the engine being unreachable.
    pub fn is_connection(&self) -> bool {
        matches!(self, EngineError::Connection { .. })
    }
}

/// Errors a handler returns to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The handler could not be invoked at all (trap, bad envelope, ...).
    #[error("invocation failed: {0}")]
    Invocation(String),
}
