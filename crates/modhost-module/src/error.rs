//! Error taxonomy of the module lifecycle.
//!
//! Each stage has its own error type. [`ModuleError`] aggregates them and
//! carries the continue-or-abort policy; [`PipelineError`] is what reaches
//! the caller when the policy says abort.

use std::path::PathBuf;

use thiserror::Error;

/// Storage resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("module descriptor has no source location")]
    EmptySource,

    #[error("cannot derive a repository name from '{0}'")]
    NoRepositoryName(String),

    #[error("'{field}' value '{value}' must be a relative path inside the storage root")]
    EscapesRoot { field: &'static str, value: String },
}

/// Source fetch failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid source location '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// The URL in this error never carries credentials.
    #[error("clone of {url} failed: {stderr}")]
    Clone { url: String, stderr: String },

    #[error("branch '{branch}' not found; available branches: [{}]", available.join(", "))]
    BranchNotFound {
        branch: String,
        available: Vec<String>,
    },

    #[error("checkout of '{branch}' failed: {stderr}")]
    Checkout { branch: String, stderr: String },

    #[error("fetch timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("fetch task failed: {0}")]
    Join(String),
}

/// Manifest read/validation failures.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("manifest not found at {0}")]
    Missing(PathBuf),

    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed manifest {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("manifest field '{field}' is missing or empty")]
    MissingField { field: &'static str },

    #[error("unsupported language '{language}'; supported: [{}]", supported.join(", "))]
    UnsupportedLanguage {
        language: String,
        supported: Vec<String>,
    },
}

impl MetadataError {
    /// The manifest field this error is about, if any.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::MissingField { field } => Some(field),
            Self::UnsupportedLanguage { .. } => Some("language"),
            _ => None,
        }
    }
}

/// Artifact build failures.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no Cargo.toml in {0}")]
    MissingManifest(PathBuf),

    #[error("{message}")]
    Toolchain { message: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    /// `output` is the compiler's stderr, verbatim.
    #[error("build of {path} failed:\n{output}")]
    Compile { path: PathBuf, output: String },

    #[error("no .wasm artifact produced in {0}")]
    ArtifactNotFound(PathBuf),

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("build of {path} timed out after {secs}s")]
    Timeout { path: PathBuf, secs: u64 },
}

/// Artifact load and registration failures.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open artifact {path}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("cannot instantiate artifact {path}: {message}")]
    Instantiate { path: PathBuf, message: String },

    #[error("registration entrypoint '{symbol}' not exported")]
    EntrypointNotFound { symbol: &'static str },

    #[error("registration entrypoint '{symbol}' has the wrong shape: expected {expected}, found {found}")]
    EntrypointWrongShape {
        symbol: &'static str,
        expected: &'static str,
        found: String,
    },

    #[error("registration entrypoint trapped: {0}")]
    EntrypointTrapped(String),

    #[error("module registered handlers but does not export '{0}'")]
    MissingExport(&'static str),

    #[error("handler registration failed: {0}")]
    Registration(#[from] modhost_engine::EngineError),

    #[error("load task failed: {0}")]
    Join(String),
}

/// Lifecycle stage a module failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Resolve,
    Fetch,
    Metadata,
    Build,
    Load,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Resolve => "resolve",
            Stage::Fetch => "fetch",
            Stage::Metadata => "metadata",
            Stage::Build => "build",
            Stage::Load => "load",
        };
        f.write_str(s)
    }
}

/// Any per-module failure.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl ModuleError {
    pub fn stage(&self) -> Stage {
        match self {
            ModuleError::Storage(_) => Stage::Resolve,
            ModuleError::Fetch(_) => Stage::Fetch,
            ModuleError::Metadata(_) => Stage::Metadata,
            ModuleError::Build(_) => Stage::Build,
            ModuleError::Load(_) => Stage::Load,
        }
    }

    /// Fatal errors abort startup; the rest skip the module.
    ///
    /// Only load/registration failures are fatal: they touch the shared
    /// worker and signal a broken entrypoint contract.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModuleError::Load(_))
    }
}

/// A fatal pipeline outcome, naming the offending module.
#[derive(Debug, Error)]
#[error("module {source_url} at {location} failed to {stage}: {error}")]
pub struct PipelineError {
    pub source_url: String,
    pub location: PathBuf,
    pub stage: Stage,
    pub error: ModuleError,
}
