//! Artifact building.
//!
//! Every load is preceded by a fresh build: an artifact left over from an
//! earlier run may come from a different toolchain or host ABI, so it is
//! deleted before the compiler runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{BuildError, StorageLocation};

/// A freshly built loadable unit.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    pub path: PathBuf,
    pub elapsed: Duration,
}

/// Compilation capability.
#[async_trait]
pub trait ArtifactCompiler: Send + Sync {
    /// Compile the crate in `module_dir` and write the loadable unit to
    /// `artifact`. Compiler diagnostics go into [`BuildError::Compile`]
    /// unchanged.
    async fn compile(&self, module_dir: &Path, artifact: &Path) -> Result<(), BuildError>;
}

/// Rebuild the module's artifact from scratch.
pub async fn build(
    compiler: &dyn ArtifactCompiler,
    location: &StorageLocation,
) -> Result<BuildArtifact, BuildError> {
    let artifact = location.artifact_path();
    if artifact.exists() {
        info!(path = %artifact.display(), "Removing previously built artifact");
        tokio::fs::remove_file(&artifact)
            .await
            .map_err(|source| BuildError::Io {
                path: artifact.clone(),
                source,
            })?;
    }

    let start = Instant::now();
    compiler.compile(location.module_dir(), &artifact).await?;
    if !artifact.is_file() {
        return Err(BuildError::ArtifactNotFound(location.module_dir().to_path_buf()));
    }

    let elapsed = start.elapsed();
    info!(path = %artifact.display(), elapsed = ?elapsed, "Built module artifact");
    Ok(BuildArtifact {
        path: artifact,
        elapsed,
    })
}

/// [`ArtifactCompiler`] running `cargo build` for a wasm target.
#[derive(Debug)]
pub struct CargoCompiler {
    cargo: String,
    target: String,
    check_target: bool,
    timeout: Option<Duration>,
    preflight: OnceCell<Result<(), String>>,
}

impl Default for CargoCompiler {
    fn default() -> Self {
        Self::new("cargo", modhost_config::DEFAULT_WASM_TARGET)
    }
}

impl CargoCompiler {
    pub fn new(cargo: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            cargo: cargo.into(),
            target: target.into(),
            check_target: true,
            timeout: None,
            preflight: OnceCell::new(),
        }
    }

    pub fn from_config(config: &modhost_config::BuildConfig) -> Self {
        Self::new(config.cargo.clone(), config.target.clone())
            .with_target_check(config.check_target)
            .with_timeout(config.timeout())
    }

    pub fn with_target_check(mut self, check: bool) -> Self {
        self.check_target = check;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Verify the compilation target is installed. Runs once per compiler.
    pub async fn ensure_target(&self) -> Result<(), BuildError> {
        if !self.check_target {
            return Ok(());
        }
        self.preflight
            .get_or_init(|| check_target_installed(&self.target))
            .await
            .clone()
            .map_err(|message| BuildError::Toolchain { message })
    }

    async fn run_cargo(&self, module_dir: &Path, manifest: &Path) -> Result<(), BuildError> {
        let mut cmd = Command::new(&self.cargo);
        cmd.args(["build", "--lib", "--release", "--target", self.target.as_str()])
            .arg("--manifest-path")
            .arg(manifest)
            .env("CARGO_TARGET_DIR", module_dir.join("target"))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let run = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                BuildError::Timeout {
                    path: module_dir.to_path_buf(),
                    secs: limit.as_secs(),
                }
            })?,
            None => run.await,
        }
        .map_err(|source| BuildError::Spawn {
            program: self.cargo.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(BuildError::Compile {
                path: module_dir.to_path_buf(),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactCompiler for CargoCompiler {
    async fn compile(&self, module_dir: &Path, artifact: &Path) -> Result<(), BuildError> {
        let manifest = module_dir.join("Cargo.toml");
        if !manifest.is_file() {
            return Err(BuildError::MissingManifest(module_dir.to_path_buf()));
        }

        self.ensure_target().await?;
        self.run_cargo(module_dir, &manifest).await?;

        let release_dir = module_dir
            .join("target")
            .join(&self.target)
            .join("release");
        let wasm = find_wasm(&release_dir)?;
        debug!(from = %wasm.display(), to = %artifact.display(), "Copying artifact");
        tokio::fs::copy(&wasm, artifact)
            .await
            .map_err(|source| BuildError::Io {
                path: artifact.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

/// First `.wasm` file (by name) in the cargo release directory.
fn find_wasm(release_dir: &Path) -> Result<PathBuf, BuildError> {
    let entries = std::fs::read_dir(release_dir)
        .map_err(|_| BuildError::ArtifactNotFound(release_dir.to_path_buf()))?;
    let mut wasm: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "wasm"))
        .collect();
    wasm.sort();
    wasm.into_iter()
        .next()
        .ok_or_else(|| BuildError::ArtifactNotFound(release_dir.to_path_buf()))
}

async fn check_target_installed(target: &str) -> Result<(), String> {
    let output = match Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "rustup unavailable, skipping target check");
            return Ok(());
        }
    };

    let installed = String::from_utf8_lossy(&output.stdout);
    if installed.lines().any(|line| line.trim() == target) {
        Ok(())
    } else {
        Err(format!(
            "the {target} target is not installed; install it with: rustup target add {target}"
        ))
    }
}
