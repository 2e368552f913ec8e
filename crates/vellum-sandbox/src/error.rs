//! Execution error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use vellum_core::{DocumentError, ExtensionId, ResourceRef};

/// A script raised an error inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScriptFault {
    /// Error text reported by the engine.
    pub message: String,
}

impl ScriptFault {
    /// Create a fault.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised while running or styling one resource.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The script threw.
    #[error("Script {resource} failed: {message}")]
    ScriptFailed {
        /// Failing resource.
        resource: ResourceRef,
        /// Error text.
        message: String,
    },

    /// The engine panicked while running the script.
    #[error("Script {resource} aborted the engine")]
    Panicked {
        /// Failing resource.
        resource: ResourceRef,
    },

    /// The script did not finish in time.
    #[error("Script {resource} exceeded {timeout:?}")]
    Timeout {
        /// Failing resource.
        resource: ResourceRef,
        /// Configured limit.
        timeout: Duration,
    },

    /// The stylesheet is already applied to this document.
    #[error("Stylesheet {resource} is already applied")]
    DuplicateStyle {
        /// Rejected resource.
        resource: ResourceRef,
    },

    /// Isolated-world code needs a capability bridge.
    #[error("Isolated world for {resource} has no capability bridge")]
    MissingBridge {
        /// Affected resource.
        resource: ResourceRef,
    },

    /// The worker could not be started.
    #[error("Failed to start sandbox worker: {0}")]
    Spawn(String),

    /// The document refused a DOM operation.
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The resource could not be loaded.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Result type for execution operations.
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors raised while resolving resource references.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The extension does not ship this resource.
    #[error("Resource {resource} not found for extension {extension}")]
    NotFound {
        /// Owning extension.
        extension: ExtensionId,
        /// Missing resource.
        resource: ResourceRef,
    },

    /// The reference escapes the extension's directory.
    #[error("Resource path '{path}' is not allowed")]
    InvalidPath {
        /// Offending path.
        path: String,
    },

    /// Reading the resource failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for resource loading.
pub type ResourceResult<T> = Result<T, ResourceError>;
