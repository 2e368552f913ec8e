//! The interpreter seam.

use vellum_bridge::ChromeApi;
use vellum_core::{DocumentRef, ExtensionId, ResourceRef, WindowRef};

use crate::error::ScriptFault;

/// Code to run, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    /// Owning extension.
    pub extension: ExtensionId,
    /// Resource the code was loaded from.
    pub resource: ResourceRef,
    /// Script text.
    pub code: String,
}

impl ScriptSource {
    /// Create a script source.
    #[must_use]
    pub fn new(extension: ExtensionId, resource: ResourceRef, code: impl Into<String>) -> Self {
        Self {
            extension,
            resource,
            code: code.into(),
        }
    }
}

/// The complete global scope of an isolated world.
///
/// There is nothing else: page globals are reachable only through
/// `window`, which the engine resolves to the page's own object. That
/// reference is the one sanctioned path into page state.
#[derive(Debug, Clone)]
pub struct IsolatedGlobals {
    /// The `chrome` capability object.
    pub chrome: ChromeApi,
    /// The page's `window`.
    pub window: WindowRef,
    /// The page's `document`.
    pub document: DocumentRef,
}

/// Host-supplied interpreter for isolated-world code.
///
/// Implementations must bind exactly the names in [`IsolatedGlobals`] and
/// nothing else into the script's scope.
pub trait ScriptEngine: Send + Sync {
    /// Evaluate `script` against `globals`.
    ///
    /// # Errors
    ///
    /// Returns a [`ScriptFault`] if the script throws.
    fn evaluate(&self, script: &ScriptSource, globals: &IsolatedGlobals) -> Result<(), ScriptFault>;
}
