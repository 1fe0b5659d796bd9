//! Fakes for pipeline integration tests: an in-memory "remote" of module
//! sources and a compiler that turns a checked-in WAT file into the artifact.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use modhost_config::Credentials;
use modhost_module::fetch::ENTRY_FILE;
use modhost_module::metadata::MANIFEST_FILE;
use modhost_module::{ArtifactCompiler, BuildError, FetchError, SourceFetch};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// WAT source file the fake compiler reads from the module root.
pub const WAT_FILE: &str = "module.wat";

/// One repository on the fake remote.
#[derive(Clone)]
pub struct FakeRepo {
    pub branches: Vec<String>,
    /// Subpath of the module root inside the repository.
    pub module_location: Option<String>,
    pub manifest: Value,
    pub wat: String,
}

impl FakeRepo {
    pub fn new(name: &str, handlers: &[&str]) -> Self {
        Self {
            branches: vec!["main".to_string()],
            module_location: None,
            manifest: manifest(name, "rust"),
            wat: handler_wat(handlers),
        }
    }

    pub fn with_wat(mut self, wat: impl Into<String>) -> Self {
        self.wat = wat.into();
        self
    }

    pub fn with_manifest(mut self, manifest: Value) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn at(mut self, subpath: &str) -> Self {
        self.module_location = Some(subpath.to_string());
        self
    }
}

pub fn manifest(name: &str, language: &str) -> Value {
    json!({
        "name": name,
        "description": "x",
        "version": "1.0",
        "creator": "a",
        "contact": "a@b.com",
        "language": language,
    })
}

/// Reactor module registering each name as an activity that answers
/// `{"ok": "done"}`.
pub fn handler_wat(names: &[&str]) -> String {
    let mut data = String::new();
    let mut calls = String::new();
    let mut offset = 16;
    for name in names {
        data.push_str(&format!("  (data (i32.const {offset}) \"{name}\")\n"));
        calls.push_str(&format!(
            "    (drop (call $register (local.get $h) (i32.const 1) (i32.const {offset}) (i32.const {})))\n",
            name.len()
        ));
        offset += name.len() + 1;
    }
    let envelope = r#"{\"ok\":\"done\"}"#;
    let packed = (4096i64 << 32) | 13;
    format!(
        r#"(module
  (import "modhost" "register_handler" (func $register (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
{data}  (data (i32.const 4096) "{envelope}")
  (global $bump (mut i32) (i32.const 8192))
  (func (export "modhost_register") (param $h i32)
{calls}  )
  (func (export "modhost_alloc") (param $len i32) (result i32)
    (local $p i32)
    (local.set $p (global.get $bump))
    (global.set $bump (i32.add (global.get $bump) (local.get $len)))
    (local.get $p))
  (func (export "modhost_dealloc") (param i32 i32))
  (func (export "modhost_invoke") (param i32 i32 i32 i32) (result i64)
    (i64.const {packed})))"#
    )
}

/// Source fetcher serving [`FakeRepo`]s keyed by normalized URL.
#[derive(Default)]
pub struct FakeRemote {
    repos: Mutex<HashMap<String, FakeRepo>>,
    fetches: AtomicUsize,
    seen_credentials: Mutex<Vec<Credentials>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, url: &str, repo: FakeRepo) {
        self.repos.lock().insert(url.to_string(), repo);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn seen_credentials(&self) -> Vec<Credentials> {
        self.seen_credentials.lock().clone()
    }
}

#[async_trait]
impl SourceFetch for FakeRemote {
    async fn fetch_into(
        &self,
        url: &str,
        dest: &Path,
        branch: Option<&str>,
        credentials: &Credentials,
    ) -> Result<(), FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.seen_credentials.lock().push(credentials.clone());

        let repo = self
            .repos
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Clone {
                url: url.to_string(),
                stderr: "repository not found".to_string(),
            })?;

        // Clone succeeds before the branch is looked at, as with git.
        std::fs::create_dir_all(dest).unwrap();
        std::fs::write(dest.join("README"), "clone").unwrap();

        if let Some(branch) = branch
            && !repo.branches.iter().any(|b| b == branch)
        {
            return Err(FetchError::BranchNotFound {
                branch: branch.to_string(),
                available: repo.branches.clone(),
            });
        }

        let root = match &repo.module_location {
            Some(sub) => dest.join(sub),
            None => dest.to_path_buf(),
        };
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(ENTRY_FILE), "[package]\nname = \"m\"\n").unwrap();
        std::fs::write(root.join(MANIFEST_FILE), repo.manifest.to_string()).unwrap();
        std::fs::write(root.join(WAT_FILE), &repo.wat).unwrap();
        Ok(())
    }
}

/// Compiler copying `module.wat` to the artifact path.
#[derive(Default)]
pub struct WatCompiler {
    builds: AtomicUsize,
    stale_seen: AtomicUsize,
}

impl WatCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Builds that started while an old artifact was still on disk.
    pub fn stale_seen(&self) -> usize {
        self.stale_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactCompiler for WatCompiler {
    async fn compile(&self, module_dir: &Path, artifact: &Path) -> Result<(), BuildError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if artifact.exists() {
            self.stale_seen.fetch_add(1, Ordering::SeqCst);
        }
        let source = module_dir.join(WAT_FILE);
        let wat = std::fs::read_to_string(&source).map_err(|source_err| BuildError::Io {
            path: source.clone(),
            source: source_err,
        })?;
        if wat.contains("COMPILE_ERROR") {
            return Err(BuildError::Compile {
                path: module_dir.to_path_buf(),
                output: "error[E0425]: cannot find value `x` in this scope".to_string(),
            });
        }
        std::fs::write(artifact, wat).map_err(|e| BuildError::Io {
            path: artifact.to_path_buf(),
            source: e,
        })
    }
}
