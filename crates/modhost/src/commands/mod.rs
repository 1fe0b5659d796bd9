//! CLI command handlers.

use std::path::PathBuf;

use modhost_config::ModhostConfig;

pub mod check_config;
pub mod fetch;
pub mod start;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded and validated configuration.
    pub config: ModhostConfig,
    /// File the configuration came from, if any.
    pub source: Option<PathBuf>,
    /// Verbose output enabled.
    pub verbose: bool,
}
