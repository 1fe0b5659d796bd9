//! Module lifecycle: turn module descriptors into handlers on a task-queue
//! worker.
//!
//! # Flow
//!
//! 1. [`storage::resolve`] maps a descriptor onto the storage root
//! 2. [`fetch::fetch`] clones the source (or skips an existing checkout)
//! 3. [`metadata::read_metadata`] validates `metadata.json`
//! 4. [`build::build`] compiles a fresh `module.wasm`
//! 5. [`loader::WasmLoader`] instantiates it and runs `modhost_register`
//!
//! [`ModulePipeline`] runs steps 1-3 and 4-5 as two concurrent stages.

pub mod build;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod metadata;
pub mod pipeline;
pub mod storage;

pub use build::{ArtifactCompiler, BuildArtifact, CargoCompiler};
pub use error::{
    BuildError, FetchError, LoadError, MetadataError, ModuleError, PipelineError, Stage,
    StorageError,
};
pub use fetch::{FetchOutcome, GitFetcher, SourceFetch};
pub use loader::{LoadReport, WasmLoader};
pub use metadata::ModuleMetadata;
pub use pipeline::{
    LoadedModule, ModulePipeline, PipelineReport, PrepareReport, PreparedModule, SkippedModule,
};
pub use storage::StorageLocation;
