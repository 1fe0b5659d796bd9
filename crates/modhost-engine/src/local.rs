//! In-process task-queue engine.
//!
//! Connecting binds the HTTP ingress listener; running a worker serves that
//! listener until shutdown. Tasks submitted through the ingress (or through
//! [`LocalEngine::dispatch`]) are routed to the worker owning the task queue.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::ingress::{self, IngressState, QueueTable};
use crate::{
    ConnectOptions, EngineClient, EngineConnector, EngineError, Result, Shutdown, WorkerHandle,
    WorkerOptions,
};

/// Connector for [`LocalEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConnector;

#[async_trait]
impl EngineConnector for LocalConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn EngineClient>> {
        let engine = LocalEngine::bind(&options.address).await?;
        Ok(Arc::new(engine))
    }
}

pub struct LocalEngine {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    queues: QueueTable,
    closed: AtomicBool,
}

impl LocalEngine {
    /// Bind the ingress listener. `127.0.0.1:0` picks a free port.
    pub async fn bind(address: &str) -> Result<Self> {
        let listener =
            TcpListener::bind(address)
                .await
                .map_err(|source| EngineError::Connection {
                    address: address.to_string(),
                    source,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| EngineError::Connection {
                address: address.to_string(),
                source,
            })?;
        info!(address = %local_addr, "Local engine listening");
        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            queues: Arc::new(RwLock::new(HashMap::new())),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Route one task to the worker serving `task_queue`.
    pub async fn dispatch(&self, task_queue: &str, handler: &str, input: Value) -> Result<Value> {
        let worker = self
            .queues
            .read()
            .get(task_queue)
            .cloned()
            .ok_or_else(|| EngineError::UnknownQueue(task_queue.to_string()))?;
        worker.dispatch(handler, input).await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl EngineClient for LocalEngine {
    fn new_worker(&self, options: WorkerOptions) -> Result<WorkerHandle> {
        self.ensure_open()?;
        let mut queues = self.queues.write();
        if queues.contains_key(&options.task_queue) {
            return Err(EngineError::QueueTaken(options.task_queue));
        }
        let worker = WorkerHandle::new(options.task_queue.clone(), options.identity);
        debug!(task_queue = %options.task_queue, worker_id = worker.id(), "Created worker");
        queues.insert(options.task_queue, worker.clone());
        Ok(worker)
    }

    async fn run_worker(&self, worker: WorkerHandle, shutdown: Shutdown) -> Result<()> {
        self.ensure_open()?;
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| EngineError::Worker("ingress is already serving".to_string()))?;

        info!(
            task_queue = worker.task_queue(),
            identity = worker.identity(),
            handlers = worker.len(),
            address = %self.local_addr,
            "Worker serving"
        );

        let app = ingress::router(IngressState {
            queues: Arc::clone(&self.queues),
        });
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| EngineError::Worker(e.to_string()))?;

        info!(task_queue = worker.task_queue(), "Worker stopped");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.queues.write().clear();
            self.listener.lock().take();
            debug!("Local engine closed");
        }
        Ok(())
    }
}
