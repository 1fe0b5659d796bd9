//! Source fetching: idempotency and cleanup policy around a pluggable
//! clone/checkout capability.
//!
//! [`fetch`] owns the decisions (skip an existing tree, honour force
//! refresh, never leave a partial checkout behind). [`SourceFetch`] only
//! knows how to materialise a URL into an empty directory; [`GitFetcher`]
//! does that with the system `git` binary so SSH keys and credential
//! helpers keep working.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use modhost_config::{Credentials, ModuleDescriptor};
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FetchError, StorageLocation};

/// File whose presence at the module root marks a completed checkout.
pub const ENTRY_FILE: &str = "Cargo.toml";

/// What [`fetch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched,
    AlreadyPresent,
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchOutcome::Fetched => write!(f, "fetched"),
            FetchOutcome::AlreadyPresent => write!(f, "already present"),
        }
    }
}

/// Clone/checkout capability.
#[async_trait]
pub trait SourceFetch: Send + Sync {
    /// Materialise `url` into `dest`, which does not exist yet, and check
    /// out `branch` when given. A missing branch is
    /// [`FetchError::BranchNotFound`]. Partial state left in `dest` on error
    /// is removed by the caller.
    async fn fetch_into(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        credentials: &Credentials,
    ) -> Result<(), FetchError>;
}

/// Bring a module's source tree into place.
pub async fn fetch(
    fetcher: &dyn SourceFetch,
    descriptor: &ModuleDescriptor,
    location: &StorageLocation,
    credentials: &Credentials,
    force_refresh: bool,
) -> Result<FetchOutcome, FetchError> {
    let checkout = location.checkout_dir();
    let entry = location.module_dir().join(ENTRY_FILE);

    if entry.is_file() && !force_refresh {
        info!(
            module = %descriptor.git_url,
            path = %checkout.display(),
            "Module already present, skipping fetch"
        );
        return Ok(FetchOutcome::AlreadyPresent);
    }

    if checkout.exists() {
        if force_refresh {
            info!(path = %checkout.display(), "Force refresh: removing existing checkout");
        } else {
            warn!(path = %checkout.display(), "Removing incomplete checkout");
        }
        remove_tree(checkout).await?;
    }

    if let Some(parent) = checkout.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| FetchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let url = normalize_url(&descriptor.git_url)?;
    info!(
        module = %descriptor.git_url,
        url = %url,
        branch = descriptor.branch.as_deref().unwrap_or("-"),
        path = %checkout.display(),
        "Fetching module"
    );

    let result = fetcher
        .fetch_into(&url, checkout, descriptor.branch.as_deref(), credentials)
        .await;

    if let Err(e) = result {
        if checkout.exists()
            && let Err(cleanup) = tokio::fs::remove_dir_all(checkout).await
        {
            warn!(
                path = %checkout.display(),
                error = %cleanup,
                "Failed to remove partial checkout"
            );
        }
        return Err(e);
    }

    Ok(FetchOutcome::Fetched)
}

async fn remove_tree(path: &Path) -> Result<(), FetchError> {
    tokio::fs::remove_dir_all(path)
        .await
        .map_err(|source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Fill in a transport scheme and `.git` suffix where absent.
///
/// `git.example.com/org/repo` → `https://git.example.com/org/repo.git`.
/// `file://` and scp-style `git@host:org/repo` locations keep their form
/// apart from the suffix rule, which skips `file://`.
pub fn normalize_url(raw: &str) -> Result<String, FetchError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: "empty source location".to_string(),
        });
    }

    let scp_like = !trimmed.contains("://") && trimmed.contains('@') && trimmed.contains(':');
    let mut url = if trimmed.contains("://") || scp_like {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    if !url.starts_with("file://") && !url.ends_with(".git") {
        url.push_str(".git");
    }
    Ok(url)
}

/// Put credentials into the URL userinfo (http/https only).
pub fn authenticated_url(url: &str, credentials: &Credentials) -> Result<String, FetchError> {
    if credentials.is_anonymous() {
        return Ok(url.to_string());
    }
    let mut parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        debug!(url, "Credentials ignored for non-http source");
        return Ok(url.to_string());
    }

    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let username = credentials.username.as_deref().unwrap_or("git");
    parsed
        .set_username(username)
        .map_err(|()| invalid("cannot carry a username"))?;
    if let Some(secret) = credentials.secret.as_deref() {
        parsed
            .set_password(Some(secret))
            .map_err(|()| invalid("cannot carry a password"))?;
    }
    Ok(parsed.into())
}

/// [`SourceFetch`] using the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    program: String,
    timeout: Option<Duration>,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new("git", None)
    }
}

impl GitFetcher {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Check if git is available on the system.
    pub fn is_available(&self) -> bool {
        std::process::Command::new(&self.program)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command) -> Result<std::process::Output, FetchError> {
        cmd.output().await.map_err(|source| FetchError::Spawn {
            program: self.program.clone(),
            source,
        })
    }

    async fn clone_and_checkout(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        credentials: &Credentials,
    ) -> Result<(), FetchError> {
        let auth_url = authenticated_url(url, credentials)?;

        let mut clone = self.command();
        if credentials.insecure {
            clone.args(["-c", "http.sslVerify=false"]);
        }
        clone.args(["clone", "--quiet", "--"]).arg(&auth_url).arg(dest);
        let output = self.run(clone).await?;
        if !output.status.success() {
            return Err(FetchError::Clone {
                url: url.to_string(),
                stderr: scrub(&output.stderr, credentials),
            });
        }

        let Some(branch) = branch else {
            return Ok(());
        };
        if branch.starts_with('-') {
            return Err(FetchError::Checkout {
                branch: branch.to_string(),
                stderr: "branch names cannot start with '-'".to_string(),
            });
        }

        let mut checkout = self.command();
        checkout
            .arg("-C")
            .arg(dest)
            .args(["checkout", "--quiet", branch]);
        let output = self.run(checkout).await?;
        if output.status.success() {
            debug!(branch, path = %dest.display(), "Checked out branch");
            return Ok(());
        }

        let available = self.remote_branches(dest).await?;
        if available.iter().any(|b| b == branch) {
            Err(FetchError::Checkout {
                branch: branch.to_string(),
                stderr: scrub(&output.stderr, credentials),
            })
        } else {
            Err(FetchError::BranchNotFound {
                branch: branch.to_string(),
                available,
            })
        }
    }

    /// Remote-tracking branches of a fresh clone, without the `origin/` prefix.
    async fn remote_branches(&self, repo: &Path) -> Result<Vec<String>, FetchError> {
        let mut cmd = self.command();
        cmd.arg("-C")
            .arg(repo)
            .args(["branch", "-r", "--format=%(refname:short)"]);
        let output = self.run(cmd).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_remote_branches(&stdout))
    }
}

#[async_trait]
impl SourceFetch for GitFetcher {
    async fn fetch_into(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        credentials: &Credentials,
    ) -> Result<(), FetchError> {
        let work = self.clone_and_checkout(url, dest, branch, credentials);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| FetchError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => work.await,
        }
    }
}

fn parse_remote_branches(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("origin/"))
        .filter(|name| !name.is_empty() && *name != "HEAD")
        .map(str::to_string)
        .collect()
}

/// Stderr as text with any secret masked.
fn scrub(stderr: &[u8], credentials: &Credentials) -> String {
    let text = String::from_utf8_lossy(stderr).trim().to_string();
    match credentials.secret.as_deref() {
        Some(secret) if !secret.is_empty() => text.replace(secret, "***"),
        _ => text,
    }
}
