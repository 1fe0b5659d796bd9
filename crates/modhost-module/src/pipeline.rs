//! The module lifecycle pipeline.
//!
//! Two stages, each fanned out as one task per module and joined before the
//! next stage starts:
//!
//! 1. resolve → fetch → read metadata
//! 2. build → load/register
//!
//! Within a module the steps run in order; across modules nothing is
//! ordered, so handler registration order varies from run to run.
//! Resolve, fetch, metadata and build failures skip the module. A load or
//! registration failure is fatal once every sibling in the stage has
//! finished.

use std::path::PathBuf;
use std::sync::Arc;

use modhost_config::{GitCredentials, ModhostConfig, ModuleDescriptor};
use modhost_engine::{HandlerKind, WorkerHandle};
use tracing::{error, info, warn};

use crate::build::{self, ArtifactCompiler, CargoCompiler};
use crate::fetch::{self, FetchOutcome, GitFetcher, SourceFetch};
use crate::loader::WasmLoader;
use crate::metadata::{self, ModuleMetadata};
use crate::storage::{self, StorageLocation};
use crate::{FetchError, LoadError, ModuleError, PipelineError};

/// A module that made it through stage one.
#[derive(Debug, Clone)]
pub struct PreparedModule {
    pub descriptor: ModuleDescriptor,
    pub location: StorageLocation,
    pub metadata: ModuleMetadata,
    pub fetch: FetchOutcome,
}

/// A module left out of the worker, and why.
#[derive(Debug)]
pub struct SkippedModule {
    pub source: String,
    pub location: Option<PathBuf>,
    pub error: ModuleError,
}

/// A module whose handlers are on the worker.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub name: String,
    pub source: String,
    pub location: PathBuf,
    pub handlers: Vec<(String, HandlerKind)>,
}

#[derive(Debug, Default)]
pub struct PrepareReport {
    pub prepared: Vec<PreparedModule>,
    pub skipped: Vec<SkippedModule>,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
    pub loaded: Vec<LoadedModule>,
    pub skipped: Vec<SkippedModule>,
}

enum LoadOutcome {
    Loaded(LoadedModule),
    Skipped(SkippedModule),
    Fatal(PipelineError),
}

impl LoadOutcome {
    /// Classify a failed module by [`ModuleError::is_fatal`].
    fn failed(source: String, location: PathBuf, error: ModuleError) -> Self {
        if error.is_fatal() {
            LoadOutcome::Fatal(PipelineError {
                source_url: source,
                location,
                stage: error.stage(),
                error,
            })
        } else {
            LoadOutcome::Skipped(SkippedModule {
                source,
                location: Some(location),
                error,
            })
        }
    }
}

/// Drives every configured module from descriptor to registered handlers.
pub struct ModulePipeline {
    modules: Vec<ModuleDescriptor>,
    storage_root: PathBuf,
    force_refresh: bool,
    default_credentials: GitCredentials,
    fetcher: Arc<dyn SourceFetch>,
    compiler: Arc<dyn ArtifactCompiler>,
    loader: WasmLoader,
}

impl ModulePipeline {
    /// Pipeline with the system git and cargo collaborators.
    pub fn new(modules: Vec<ModuleDescriptor>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            modules,
            storage_root: storage_root.into(),
            force_refresh: false,
            default_credentials: GitCredentials::default(),
            fetcher: Arc::new(GitFetcher::default()),
            compiler: Arc::new(CargoCompiler::default()),
            loader: WasmLoader::default(),
        }
    }

    pub fn from_config(config: &ModhostConfig) -> Self {
        Self::new(config.modules.clone(), config.storage.clone())
            .with_force_refresh(config.always_download)
            .with_default_credentials(config.git.clone())
            .with_fetcher(Arc::new(GitFetcher::new(
                config.fetch.git.clone(),
                config.fetch.timeout(),
            )))
            .with_compiler(Arc::new(CargoCompiler::from_config(&config.build)))
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn with_default_credentials(mut self, credentials: GitCredentials) -> Self {
        self.default_credentials = credentials;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetch>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn ArtifactCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_loader(mut self, loader: WasmLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    /// Run both stages against `worker`.
    pub async fn run(&self, worker: &WorkerHandle) -> Result<PipelineReport, PipelineError> {
        let prepared = self.prepare().await;
        let mut report = self.load(prepared.prepared, worker).await?;
        let mut skipped = prepared.skipped;
        skipped.append(&mut report.skipped);
        report.skipped = skipped;
        Ok(report)
    }

    /// Stage one: resolve, fetch and read metadata for every module.
    pub async fn prepare(&self) -> PrepareReport {
        if self.modules.is_empty() {
            info!("No modules configured");
            return PrepareReport::default();
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.storage_root).await {
            warn!(path = %self.storage_root.display(), error = %e, "Could not create storage root");
        }

        let mut handles = Vec::with_capacity(self.modules.len());
        for descriptor in self.modules.iter().cloned() {
            let fetcher = Arc::clone(&self.fetcher);
            let root = self.storage_root.clone();
            let credentials = descriptor.effective_credentials(&self.default_credentials);
            let force = self.force_refresh;
            let source = descriptor.git_url.clone();
            let handle = tokio::spawn(async move {
                let location = storage::resolve(&descriptor, &root).map_err(|e| SkippedModule {
                    source: descriptor.git_url.clone(),
                    location: None,
                    error: e.into(),
                })?;
                let skip = |error: ModuleError| SkippedModule {
                    source: descriptor.git_url.clone(),
                    location: Some(location.module_dir().to_path_buf()),
                    error,
                };

                let outcome =
                    fetch::fetch(fetcher.as_ref(), &descriptor, &location, &credentials, force)
                        .await
                        .map_err(|e| skip(e.into()))?;
                let metadata =
                    metadata::read_metadata(location.module_dir()).map_err(|e| skip(e.into()))?;

                info!(
                    module = %metadata.name,
                    version = %metadata.version,
                    source = %descriptor.git_url,
                    path = %location.module_dir().display(),
                    fetch = %outcome,
                    "Module prepared"
                );
                Ok::<_, SkippedModule>(PreparedModule {
                    descriptor,
                    location,
                    metadata,
                    fetch: outcome,
                })
            });
            handles.push((source, handle));
        }

        let mut report = PrepareReport::default();
        for (source, handle) in handles {
            let result = handle.await.unwrap_or_else(|e| {
                Err(SkippedModule {
                    source,
                    location: None,
                    error: FetchError::Join(e.to_string()).into(),
                })
            });
            match result {
                Ok(prepared) => report.prepared.push(prepared),
                Err(skipped) => {
                    log_skip(&skipped);
                    report.skipped.push(skipped);
                }
            }
        }
        report
    }

    /// Stage two: build and load every prepared module onto `worker`.
    pub async fn load(
        &self,
        prepared: Vec<PreparedModule>,
        worker: &WorkerHandle,
    ) -> Result<PipelineReport, PipelineError> {
        let mut handles = Vec::with_capacity(prepared.len());
        for module in prepared {
            let compiler = Arc::clone(&self.compiler);
            let loader = self.loader.clone();
            let worker = worker.clone();
            let source = module.descriptor.git_url.clone();
            let location = module.location.module_dir().to_path_buf();
            let handle =
                tokio::spawn(async move { build_and_load(module, compiler, loader, worker).await });
            handles.push((source, location, handle));
        }

        let mut report = PipelineReport::default();
        let mut fatal = Vec::new();
        for (source, location, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                LoadOutcome::failed(source, location, LoadError::Join(e.to_string()).into())
            });
            match outcome {
                LoadOutcome::Loaded(loaded) => report.loaded.push(loaded),
                LoadOutcome::Skipped(skipped) => {
                    log_skip(&skipped);
                    report.skipped.push(skipped);
                }
                LoadOutcome::Fatal(e) => {
                    error!(
                        module = %e.source_url,
                        path = %e.location.display(),
                        stage = %e.stage,
                        error = %e.error,
                        "Module failed to load"
                    );
                    fatal.push(e);
                }
            }
        }

        match fatal.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

async fn build_and_load(
    module: PreparedModule,
    compiler: Arc<dyn ArtifactCompiler>,
    loader: WasmLoader,
    worker: WorkerHandle,
) -> LoadOutcome {
    let source = module.descriptor.git_url.clone();
    let module_dir = module.location.module_dir().to_path_buf();

    let artifact = match build::build(compiler.as_ref(), &module.location).await {
        Ok(artifact) => artifact,
        Err(e) => return LoadOutcome::failed(source, module_dir, e.into()),
    };

    let name = module.metadata.name.clone();
    let dir = module_dir.clone();
    let loaded = tokio::task::spawn_blocking(move || {
        loader.load_and_register(&artifact.path, &name, &dir, &worker)
    })
    .await
    .unwrap_or_else(|e| Err(LoadError::Join(e.to_string())));

    match loaded {
        Ok(report) => LoadOutcome::Loaded(LoadedModule {
            name: module.metadata.name,
            source,
            location: module_dir,
            handlers: report.handlers,
        }),
        Err(e) => LoadOutcome::failed(source, module_dir, e.into()),
    }
}

fn log_skip(skipped: &SkippedModule) {
    let path = skipped
        .location
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    warn!(
        module = %skipped.source,
        path = %path,
        stage = %skipped.error.stage(),
        error = %skipped.error,
        "Skipping module"
    );
}
