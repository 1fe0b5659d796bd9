//! Start command - runs the worker until interrupted.

use anyhow::Result;
use clap::Args;
use modhost_worker::{RuntimeError, WorkerRuntime};

use super::Context;

/// Arguments for the start command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Address for the engine ingress (overrides config)
    #[arg(long)]
    pub listen: Option<String>,

    /// Task queue to serve (overrides config)
    #[arg(long)]
    pub task_queue: Option<String>,

    /// Delete and re-fetch every module
    #[arg(long)]
    pub always_download: bool,
}

/// Run the start command.
pub async fn run(args: StartArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(listen) = args.listen {
        config.engine.listen = listen;
    }
    if let Some(task_queue) = args.task_queue {
        config.engine.task_queue = task_queue;
    }
    config.always_download |= args.always_download;

    tracing::info!(
        modules = config.modules.len(),
        storage = %config.storage.display(),
        task_queue = %config.engine.task_queue,
        worker = %config.engine.worker_name,
        "Starting modhost worker"
    );

    let runtime = WorkerRuntime::from_config(&config);
    match runtime.run(shutdown_signal()).await {
        Ok(report) => {
            tracing::info!(
                loaded = report.loaded.len(),
                skipped = report.skipped.len(),
                "Worker stopped"
            );
            Ok(())
        }
        Err(RuntimeError::Pipeline(e)) => {
            tracing::error!(
                module = %e.source_url,
                path = %e.location.display(),
                stage = %e.stage,
                error = %e.error,
                "Startup aborted"
            );
            Err(e.into())
        }
        Err(e) => {
            tracing::error!(error = %e, "Startup aborted");
            Err(e.into())
        }
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}
