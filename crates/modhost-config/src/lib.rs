//! Configuration system for modhost.
//!
//! Provides TOML-based configuration with:
//! - The module descriptor set (`[[modules]]`), each naming a git source,
//!   an optional sub-storage namespace, in-repo subpath, branch and
//!   credential override
//! - Default git credentials (`[git]`) with env-var password resolution
//! - Workflow engine, build, fetch and logging sections
//! - Config file discovery (`--config` → `MODHOST_CONFIG_FILE` → `./modhost.toml`)

pub mod credentials;
pub mod discovery;
pub mod error;
pub mod types;

pub use credentials::{Credentials, GitCredentials};
pub use discovery::{
    CONFIG_FILE_ENV, DEFAULT_CONFIG_FILE, LoadedConfig, config_path, load_config,
    load_config_file,
};
pub use error::{ConfigError, Result};
pub use types::*;
