//! Resolving resource references to source text.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::trace;

use vellum_core::{ExtensionId, ResourceRef};

use crate::error::{ResourceError, ResourceResult};

/// Resolves `(extension, resource)` pairs to file contents.
pub trait ResourceLoader: Send + Sync {
    /// Load one resource.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the resource is unknown or unreadable.
    fn load(&self, extension: &ExtensionId, resource: &ResourceRef) -> ResourceResult<String>;
}

/// Resources held in memory, keyed by extension and reference.
#[derive(Debug, Default)]
pub struct InMemoryResources {
    files: RwLock<HashMap<(ExtensionId, ResourceRef), String>>,
}

impl InMemoryResources {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(
        self,
        extension: impl Into<ExtensionId>,
        resource: impl Into<ResourceRef>,
        contents: impl Into<String>,
    ) -> Self {
        self.insert(extension, resource, contents);
        self
    }

    /// Add or replace a resource.
    pub fn insert(
        &self,
        extension: impl Into<ExtensionId>,
        resource: impl Into<ResourceRef>,
        contents: impl Into<String>,
    ) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((extension.into(), resource.into()), contents.into());
    }
}

impl ResourceLoader for InMemoryResources {
    fn load(&self, extension: &ExtensionId, resource: &ResourceRef) -> ResourceResult<String> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(extension.clone(), resource.clone()))
            .cloned()
            .ok_or_else(|| ResourceError::NotFound {
                extension: extension.clone(),
                resource: resource.clone(),
            })
    }
}

/// Resources read from `<root>/<extension>/<resource>`.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    /// Serve resources from `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, extension: &ExtensionId, resource: &ResourceRef) -> ResourceResult<PathBuf> {
        let mut path = self.root.clone();
        for part in [extension.as_str(), resource.as_str()] {
            path.push(relative(part)?);
        }
        Ok(path)
    }
}

/// Accept only plain relative paths.
fn relative(raw: &str) -> ResourceResult<&Path> {
    let path = Path::new(raw);
    let plain = !raw.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if plain {
        Ok(path)
    } else {
        Err(ResourceError::InvalidPath {
            path: raw.to_string(),
        })
    }
}

impl ResourceLoader for DirectoryResources {
    fn load(&self, extension: &ExtensionId, resource: &ResourceRef) -> ResourceResult<String> {
        let path = self.resolve(extension, resource)?;
        trace!(path = %path.display(), "Loading resource");
        std::fs::read_to_string(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ResourceError::NotFound {
                    extension: extension.clone(),
                    resource: resource.clone(),
                }
            } else {
                ResourceError::Io { path, source }
            }
        })
    }
}
