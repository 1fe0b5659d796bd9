//! The worker runtime state machine.
//!
//! ```text
//! Initialized → Connecting → PreparingModules → Serving → Draining → Stopped
//! ```
//!
//! Any failure before `Serving` goes straight to `Stopped`. The engine
//! connection is closed on every path out of `PreparingModules`.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use modhost_config::{EngineConfig, ModhostConfig};
use modhost_engine::{
    ConnectOptions, EngineClient, EngineConnector, LocalConnector, WorkerHandle, WorkerOptions,
};
use modhost_module::{ModulePipeline, PipelineReport};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Initialized,
    Connecting,
    PreparingModules,
    Serving,
    Draining,
    Stopped,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RuntimeState::Initialized => "initialized",
            RuntimeState::Connecting => "connecting",
            RuntimeState::PreparingModules => "preparing-modules",
            RuntimeState::Serving => "serving",
            RuntimeState::Draining => "draining",
            RuntimeState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Owns the engine connection and the task-queue worker for one process.
pub struct WorkerRuntime {
    engine: EngineConfig,
    pipeline: ModulePipeline,
    connector: Arc<dyn EngineConnector>,
    state: Arc<watch::Sender<RuntimeState>>,
    started: AtomicBool,
}

impl WorkerRuntime {
    pub fn new(
        engine: EngineConfig,
        pipeline: ModulePipeline,
        connector: Arc<dyn EngineConnector>,
    ) -> Self {
        let (state, _) = watch::channel(RuntimeState::Initialized);
        Self {
            engine,
            pipeline,
            connector,
            state: Arc::new(state),
            started: AtomicBool::new(false),
        }
    }

    /// Runtime with the git/cargo pipeline and the local engine.
    pub fn from_config(config: &ModhostConfig) -> Self {
        Self::new(
            config.engine.clone(),
            ModulePipeline::from_config(config),
            Arc::new(LocalConnector),
        )
    }

    pub fn state(&self) -> RuntimeState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    fn transition(&self, next: RuntimeState) {
        let prev = self.state.send_replace(next);
        info!(from = %prev, to = %next, "Worker runtime state");
    }

    /// Connect, load every module, then serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<PipelineReport, RuntimeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyRun);
        }

        self.transition(RuntimeState::Connecting);
        let options = ConnectOptions {
            address: self.engine.listen.clone(),
        };
        let client = match self.connector.connect(&options).await {
            Ok(client) => client,
            Err(e) => {
                error!(address = %options.address, error = %e, "Could not connect to workflow engine");
                self.transition(RuntimeState::Stopped);
                return Err(e.into());
            }
        };

        let result = self.prepare_and_serve(client.as_ref(), shutdown).await;

        if let Err(e) = client.close().await {
            warn!(error = %e, "Failed to close engine connection");
        }
        self.transition(RuntimeState::Stopped);
        result
    }

    async fn prepare_and_serve<F>(
        &self,
        client: &dyn EngineClient,
        shutdown: F,
    ) -> Result<PipelineReport, RuntimeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let worker = client.new_worker(WorkerOptions {
            task_queue: self.engine.task_queue.clone(),
            identity: self.engine.worker_name.clone(),
        })?;

        self.transition(RuntimeState::PreparingModules);
        let report = self.load_modules(&worker).await?;

        self.transition(RuntimeState::Serving);
        let state = Arc::clone(&self.state);
        let shutdown = async move {
            shutdown.await;
            let prev = state.send_replace(RuntimeState::Draining);
            info!(from = %prev, to = %RuntimeState::Draining, "Worker runtime state");
        }
        .boxed();
        client.run_worker(worker, shutdown).await?;

        if self.state() != RuntimeState::Draining {
            self.transition(RuntimeState::Draining);
        }
        Ok(report)
    }

    async fn load_modules(&self, worker: &WorkerHandle) -> Result<PipelineReport, RuntimeError> {
        let report = self.pipeline.run(worker).await?;
        info!(
            modules = self.pipeline.modules().len(),
            loaded = report.loaded.len(),
            skipped = report.skipped.len(),
            handlers = worker.len(),
            "Modules ready"
        );
        Ok(report)
    }
}
