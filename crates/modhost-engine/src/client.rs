//! Engine connection traits.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{Result, WorkerHandle};

/// Resolves when the worker should stop serving.
pub type Shutdown = BoxFuture<'static, ()>;

/// Where and how to reach the engine.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub address: String,
}

/// Task-queue worker settings.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub task_queue: String,
    pub identity: String,
}

/// Opens a client connection to a workflow engine.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Failure here is an [`EngineError::Connection`](crate::EngineError::Connection).
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn EngineClient>>;
}

/// A live engine connection, held for the process lifetime.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Create the worker for a task queue. Handlers are attached to the
    /// returned handle before [`run_worker`](Self::run_worker).
    fn new_worker(&self, options: WorkerOptions) -> Result<WorkerHandle>;

    /// Accept dispatched work until `shutdown` resolves.
    async fn run_worker(&self, worker: WorkerHandle, shutdown: Shutdown) -> Result<()>;

    /// Release the connection.
    async fn close(&self) -> Result<()>;
}
