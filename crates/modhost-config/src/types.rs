//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! always_download = false   # force re-fetch of every module
//! storage = "modhost-storage"
//! [git]                     # default credentials
//! [engine]                  # workflow engine connection + worker identity
//! [build]                   # artifact compiler
//! [fetch]                   # source fetcher
//! [logging]
//! [[modules]]               # one entry per module source
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::{Credentials, GitCredentials};
use crate::{ConfigError, Result};

pub const DEFAULT_STORAGE: &str = "modhost-storage";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:7233";
pub const DEFAULT_TASK_QUEUE: &str = "modhost-task-queue";
pub const DEFAULT_WORKER_NAME: &str = "modhost-worker";
pub const DEFAULT_WASM_TARGET: &str = "wasm32-wasip1";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModhostConfig {
    /// Delete and re-fetch every module even when a checkout already exists.
    pub always_download: bool,

    /// Root directory all module checkouts live under.
    pub storage: PathBuf,

    /// Default git credentials, used by modules without their own.
    pub git: GitCredentials,

    pub engine: EngineConfig,
    pub build: BuildConfig,
    pub fetch: FetchConfig,
    pub logging: LoggingConfig,

    /// Module descriptor set.
    pub modules: Vec<ModuleDescriptor>,
}

impl Default for ModhostConfig {
    fn default() -> Self {
        Self {
            always_download: false,
            storage: PathBuf::from(DEFAULT_STORAGE),
            git: GitCredentials::default(),
            engine: EngineConfig::default(),
            build: BuildConfig::default(),
            fetch: FetchConfig::default(),
            logging: LoggingConfig::default(),
            modules: Vec::new(),
        }
    }
}

impl ModhostConfig {
    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Check the descriptor set and engine settings.
    ///
    /// Rejects modules without a source, subpaths that escape the storage
    /// root, and pairs of modules that would share a checkout directory.
    pub fn validate(&self) -> Result<()> {
        if self.engine.task_queue.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "task_queue".to_string(),
                context: "[engine]".to_string(),
            });
        }

        let mut seen: HashMap<(String, String), &str> = HashMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            if module.git_url.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "git_url".to_string(),
                    context: format!("modules[{i}]"),
                });
            }

            let repo = module.repository_name();
            if repo.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("modules[{i}].git_url"),
                    message: format!("no repository name in '{}'", module.git_url),
                });
            }

            for (field, value) in [
                ("sub_storage", module.sub_storage.as_deref()),
                ("module_location", module.module_location.as_deref()),
            ] {
                if let Some(value) = value.map(str::trim)
                    && !is_contained_relative(value)
                {
                    return Err(ConfigError::InvalidValue {
                        field: format!("modules[{i}].{field}"),
                        message: format!("'{value}' must be a relative path without '..'"),
                    });
                }
            }

            if let Some(branch) = module.branch.as_deref()
                && branch.trim().starts_with('-')
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("modules[{i}].branch"),
                    message: format!("'{branch}' is not a branch name"),
                });
            }

            let key = (normalized(module.sub_storage.as_deref()), repo);
            if let Some(first) = seen.get(&key) {
                let location = if key.0.is_empty() {
                    key.1.clone()
                } else {
                    format!("{}/{}", key.0, key.1)
                };
                return Err(ConfigError::StorageCollision {
                    first: (*first).to_string(),
                    second: module.git_url.clone(),
                    location,
                });
            }
            seen.insert(key, &module.git_url);
        }

        Ok(())
    }

    /// Names of every plaintext-secret location, for load warnings.
    pub fn plaintext_password_sources(&self) -> Vec<String> {
        let mut sources = Vec::new();
        if self.git.has_plaintext_password() {
            sources.push("[git]".to_string());
        }
        for module in &self.modules {
            if module
                .git
                .as_ref()
                .is_some_and(GitCredentials::has_plaintext_password)
            {
                sources.push(format!("module '{}'", module.git_url));
            }
        }
        sources
    }
}

/// A relative path made only of normal components.
fn is_contained_relative(value: &str) -> bool {
    Path::new(value)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// `team`, `team/`, ` team` and `./team` all name the same directory.
fn normalized(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    Path::new(value.trim())
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ─────────────────────────────────────────────────────────────────────────────
// Module descriptors
// ─────────────────────────────────────────────────────────────────────────────

/// One `[[modules]]` entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Source location. A missing scheme or `.git` suffix is filled in at fetch time.
    pub git_url: String,

    /// Namespace directory under the storage root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_storage: Option<String>,

    /// Subpath inside the repository holding the module root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_location: Option<String>,

    /// Branch to check out after cloning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Credential override for this module only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitCredentials>,
}

impl ModuleDescriptor {
    pub fn new(git_url: impl Into<String>) -> Self {
        Self {
            git_url: git_url.into(),
            ..Default::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_sub_storage(mut self, sub_storage: impl Into<String>) -> Self {
        self.sub_storage = Some(sub_storage.into());
        self
    }

    pub fn with_module_location(mut self, location: impl Into<String>) -> Self {
        self.module_location = Some(location.into());
        self
    }

    pub fn with_credentials(mut self, git: GitCredentials) -> Self {
        self.git = Some(git);
        self
    }

    /// Final path segment of the source location, cut at the first `.`.
    ///
    /// `git.example.com/org/repo.git` → `repo`, `https://host/org/repo/` → `repo`.
    pub fn repository_name(&self) -> String {
        let trimmed = self.git_url.trim().trim_end_matches('/');
        let segment = trimmed.rsplit('/').next().unwrap_or_default();
        segment.split('.').next().unwrap_or_default().to_string()
    }

    /// Credentials used to fetch this module.
    ///
    /// The module's own `[modules.git]` table wins whenever any field in it
    /// is set; otherwise `default` applies. Neither being set means an
    /// anonymous fetch.
    pub fn effective_credentials(&self, default: &GitCredentials) -> Credentials {
        match &self.git {
            Some(own) if own.is_set() => own.resolve(),
            _ => default.resolve(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow engine connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the engine ingress binds to.
    pub listen: String,
    pub task_queue: String,
    /// Worker identity reported to the engine.
    pub worker_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

/// Artifact compiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Cargo binary.
    pub cargo: String,
    /// Compilation target of the loadable unit.
    pub target: String,
    /// Verify the target is installed before the first build.
    pub check_target: bool,
    /// Upper bound on one module build. Unset means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cargo: "cargo".to_string(),
            target: DEFAULT_WASM_TARGET.to_string(),
            check_target: true,
            timeout_secs: None,
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Source fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Git binary.
    pub git: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            timeout_secs: None,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit console logs as JSON.
    pub json: bool,
    /// Directory for daily-rolling JSON log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ModhostConfig::from_toml("").unwrap();
        assert!(!config.always_download);
        assert_eq!(config.storage, PathBuf::from("modhost-storage"));
        assert_eq!(config.engine.listen, "127.0.0.1:7233");
        assert_eq!(config.engine.task_queue, "modhost-task-queue");
        assert_eq!(config.engine.worker_name, "modhost-worker");
        assert_eq!(config.build.target, "wasm32-wasip1");
        assert!(config.build.check_target);
        assert!(config.build.timeout().is_none());
        assert_eq!(config.fetch.git, "git");
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
always_download = true
storage = "/var/lib/modhost"

[git]
username = "bot"
password_env = "MODHOST_TEST_UNUSED"

[engine]
listen = "0.0.0.0:9000"
task_queue = "jobs"
worker_name = "w1"

[build]
timeout_secs = 30

[fetch]
timeout_secs = 10

[logging]
level = "debug"
json = true

[[modules]]
git_url = "git.example.com/org/repo"
branch = "main"

[[modules]]
git_url = "https://git.example.com/org/other.git"
sub_storage = "team-a"
module_location = "workers/x"

[modules.git]
username = "alice"
password = "hunter2"
"#;
        let config = ModhostConfig::from_toml(toml).unwrap();
        assert!(config.always_download);
        assert_eq!(config.storage, PathBuf::from("/var/lib/modhost"));
        assert_eq!(config.engine.task_queue, "jobs");
        assert_eq!(config.build.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.fetch.timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].branch.as_deref(), Some("main"));
        assert_eq!(config.modules[1].sub_storage.as_deref(), Some("team-a"));
        assert_eq!(
            config.modules[1].git.as_ref().unwrap().username.as_deref(),
            Some("alice")
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_repository_name() {
        let cases = [
            ("git.example.com/org/repo", "repo"),
            ("https://git.example.com/org/repo.git", "repo"),
            ("https://git.example.com/org/repo/", "repo"),
            ("file:///tmp/fixtures/demo.git", "demo"),
            ("repo.v2.git", "repo"),
        ];
        for (url, expected) in cases {
            assert_eq!(ModuleDescriptor::new(url).repository_name(), expected, "{url}");
        }
    }

    #[test]
    fn test_validate_rejects_empty_source() {
        let mut config = ModhostConfig::default();
        config.modules.push(ModuleDescriptor::new("  "));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field, .. } if field == "git_url"));
    }

    #[test]
    fn test_validate_rejects_storage_collision() {
        let mut config = ModhostConfig::default();
        config.modules.push(ModuleDescriptor::new("github.com/a/tools"));
        config.modules.push(ModuleDescriptor::new("gitlab.com/b/tools.git"));
        let err = config.validate().unwrap_err();
        match err {
            ConfigError::StorageCollision { location, .. } => assert_eq!(location, "tools"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sub_storage_separates_same_repo_name() {
        let mut config = ModhostConfig::default();
        config.modules.push(ModuleDescriptor::new("github.com/a/tools"));
        config
            .modules
            .push(ModuleDescriptor::new("gitlab.com/b/tools").with_sub_storage("b"));
        config.validate().unwrap();
    }

    #[test]
    fn test_equivalent_sub_storage_spellings_collide() {
        for spelling in ["team/", " team", "./team"] {
            let mut config = ModhostConfig::default();
            config
                .modules
                .push(ModuleDescriptor::new("github.com/a/tools").with_sub_storage("team"));
            config
                .modules
                .push(ModuleDescriptor::new("gitlab.com/b/tools").with_sub_storage(spelling));
            match config.validate().unwrap_err() {
                ConfigError::StorageCollision { location, .. } => {
                    assert_eq!(location, "team/tools", "spelling {spelling:?}")
                }
                other => panic!("unexpected error for {spelling:?}: {other}"),
            }
        }
    }

    #[test]
    fn test_blank_sub_storage_is_the_root() {
        let mut config = ModhostConfig::default();
        config.modules.push(ModuleDescriptor::new("github.com/a/tools"));
        config
            .modules
            .push(ModuleDescriptor::new("gitlab.com/b/tools").with_sub_storage(" ./ "));
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::StorageCollision { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_option_like_branch() {
        let mut config = ModhostConfig::default();
        config.modules.push(
            ModuleDescriptor::new("github.com/a/tools").with_branch("--upload-pack=touch pwned"),
        );
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "modules[0].branch")
        );

        let mut config = ModhostConfig::default();
        config
            .modules
            .push(ModuleDescriptor::new("github.com/a/tools").with_branch("release/1.x"));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_escaping_paths() {
        let mut config = ModhostConfig::default();
        config
            .modules
            .push(ModuleDescriptor::new("github.com/a/tools").with_module_location("../../etc"));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let mut config = ModhostConfig::default();
        config
            .modules
            .push(ModuleDescriptor::new("github.com/a/tools").with_sub_storage("/abs"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plaintext_password_sources() {
        let mut config = ModhostConfig::default();
        config.git.password = Some("secret".to_string());
        config.modules.push(
            ModuleDescriptor::new("github.com/a/tools").with_credentials(GitCredentials {
                password_env: Some("X".to_string()),
                ..Default::default()
            }),
        );
        assert_eq!(config.plaintext_password_sources(), vec!["[git]".to_string()]);
    }
}
