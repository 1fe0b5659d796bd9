//! Deterministic on-disk placement of module sources.
//!
//! ```text
//! <root>/<sub_storage>/<repository>/            checkout_dir
//! <root>/<sub_storage>/<repository>/<subpath>/  module_dir
//! <module_dir>/module.wasm                      artifact
//! ```

use std::path::{Component, Path, PathBuf};

use modhost_config::ModuleDescriptor;

use crate::StorageError;

/// Well-known artifact filename inside the module root.
pub const ARTIFACT_FILE: &str = "module.wasm";

/// Where a module's checkout, root and artifact live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    repository: String,
    checkout_dir: PathBuf,
    module_dir: PathBuf,
}

impl StorageLocation {
    /// Repository name, the last segment of the source location.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Root of the repository checkout. Fetch writes only under here.
    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    /// Module root inside the checkout: manifest and crate live here.
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.module_dir.join(ARTIFACT_FILE)
    }
}

/// Map a descriptor onto the storage root. Pure; no filesystem access.
pub fn resolve(
    descriptor: &ModuleDescriptor,
    root: &Path,
) -> Result<StorageLocation, StorageError> {
    if descriptor.git_url.trim().is_empty() {
        return Err(StorageError::EmptySource);
    }
    let repository = descriptor.repository_name();
    if repository.is_empty() {
        return Err(StorageError::NoRepositoryName(descriptor.git_url.clone()));
    }

    let mut checkout_dir = root.to_path_buf();
    if let Some(sub) = non_empty(descriptor.sub_storage.as_deref()) {
        checkout_dir.push(contained("sub_storage", sub)?);
    }
    checkout_dir.push(&repository);

    let module_dir = match non_empty(descriptor.module_location.as_deref()) {
        Some(subpath) => checkout_dir.join(contained("module_location", subpath)?),
        None => checkout_dir.clone(),
    };

    Ok(StorageLocation {
        repository,
        checkout_dir,
        module_dir,
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn contained<'a>(field: &'static str, value: &'a str) -> Result<&'a Path, StorageError> {
    let path = Path::new(value);
    let ok = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(path)
    } else {
        Err(StorageError::EscapesRoot {
            field,
            value: value.to_string(),
        })
    }
}
