//! Config file discovery and loading.
//!
//! Resolution order (first match wins):
//! 1. `--config <path>` (handled by the caller, passed in as `explicit`)
//! 2. `MODHOST_CONFIG_FILE` environment variable
//! 3. `./modhost.toml`
//!
//! A missing file named by 1 or 2 is an error. A missing default file
//! yields the built-in defaults.

use std::path::{Path, PathBuf};

use crate::{ConfigError, ModhostConfig, Result};

/// Default config filename, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "modhost.toml";

/// Environment variable naming the config file.
pub const CONFIG_FILE_ENV: &str = "MODHOST_CONFIG_FILE";

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ModhostConfig,
    /// File the config came from, `None` when defaults were used.
    pub source: Option<PathBuf>,
    /// Warnings generated during loading (e.g., plaintext passwords).
    pub warnings: Vec<String>,
}

/// Pick the config path from an explicit flag and the env var value.
///
/// Returns the path and whether it was asked for explicitly.
pub fn config_path(explicit: Option<&Path>, env_value: Option<&str>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    if let Some(value) = env_value
        && !value.is_empty()
    {
        return (PathBuf::from(value), true);
    }
    (PathBuf::from(DEFAULT_CONFIG_FILE), false)
}

/// Discover, load and validate configuration.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    let env_value = std::env::var(CONFIG_FILE_ENV).ok();
    let (path, required) = config_path(explicit, env_value.as_deref());

    let (config, source) = if path.is_file() || required {
        (load_config_file(&path)?, Some(path))
    } else {
        (ModhostConfig::default(), None)
    };

    config.validate()?;

    let warnings = config
        .plaintext_password_sources()
        .into_iter()
        .map(|src| {
            format!("plaintext git password in {src}; prefer password_env")
        })
        .collect();

    Ok(LoadedConfig {
        config,
        source,
        warnings,
    })
}

/// Load config from a specific file path (no discovery, no validation).
pub fn load_config_file(path: &Path) -> Result<ModhostConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    ModhostConfig::from_toml(&contents)
}
