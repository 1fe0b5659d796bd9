//! modhost - module host worker
//!
//! Main entry point for the modhost CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use modhost_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;

mod commands;

use commands::{check_config, fetch, start};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// modhost - fetch, build and load workflow modules onto a task-queue worker
#[derive(Parser)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: $MODHOST_CONFIG_FILE, then ./modhost.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to the engine, load every module and serve until interrupted
    Start(start::StartArgs),

    /// Fetch every module and validate its metadata, without building
    Fetch(fetch::FetchArgs),

    /// Validate the configuration and show where modules will be stored
    CheckConfig(check_config::CheckConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = modhost_config::load_config(cli.config.as_deref())?;
    let _guard = init_tracing(&loaded.config.logging, cli.verbose);

    match &loaded.source {
        Some(path) => tracing::debug!(path = %path.display(), "Loaded configuration"),
        None => tracing::debug!("No config file found, using defaults"),
    }
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }

    let ctx = commands::Context {
        config: loaded.config,
        source: loaded.source,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Fetch(args) => fetch::run(args, &ctx).await,
        Commands::CheckConfig(args) => check_config::run(args, &ctx).await,
    }
}

const CRATES: &[&str] = &[
    "modhost",
    "modhost_config",
    "modhost_engine",
    "modhost_module",
    "modhost_worker",
];

/// Console layer filtered by `RUST_LOG` (or the configured level), plus a
/// daily-rolling JSON file layer when `logging.directory` is set.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let directive = if verbose {
        let mut d: Vec<String> = CRATES.iter().map(|c| format!("{c}=debug")).collect();
        d.push(logging.level.clone());
        d.join(",")
    } else {
        logging.level.clone()
    };
    let console_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive))
    };

    let console_text = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(console_filter())
    });
    let console_json = logging.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter())
    });

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "modhost.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let trace: Vec<String> = CRATES.iter().map(|c| format!("{c}=trace")).collect();
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(format!("{},info", trace.join(","))));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_text)
        .with(console_json)
        .with(file_layer)
        .init();
    guard
}
