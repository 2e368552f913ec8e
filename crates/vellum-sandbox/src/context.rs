//! Running code and styles against a document.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use vellum_bridge::CapabilityBridge;
use vellum_core::{Document, ElementHandle, ExtensionId, ResourceRef, ScriptElement, StyleElement, World};

use crate::engine::{IsolatedGlobals, ScriptEngine, ScriptSource};
use crate::error::{ExecutionError, ExecutionResult};
use crate::sandbox::{RealmSandbox, Sandbox, SandboxKind};

/// Style elements the engine has appended to one document.
///
/// Keyed by extension and resource, so each stylesheet is applied at most
/// once per document.
#[derive(Debug, Default)]
pub struct StyleMarkers {
    markers: HashMap<(ExtensionId, ResourceRef), ElementHandle>,
}

impl StyleMarkers {
    /// Create an empty marker set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stylesheet is applied.
    #[must_use]
    pub fn contains(&self, extension: &ExtensionId, resource: &ResourceRef) -> bool {
        self.markers
            .contains_key(&(extension.clone(), resource.clone()))
    }

    /// Number of applied stylesheets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Whether no stylesheet is applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Remove every marker from `target`. Elements the document already
    /// dropped are ignored. Returns how many were removed.
    pub fn detach_all(&mut self, target: &dyn Document) -> usize {
        let mut removed: usize = 0;
        for ((extension, resource), handle) in self.markers.drain() {
            match target.remove_element(handle) {
                Ok(()) => removed = removed.saturating_add(1),
                Err(e) => debug!(
                    extension_id = %extension,
                    resource = %resource,
                    error = %e,
                    "Style marker already gone"
                ),
            }
        }
        removed
    }

    /// Forget every marker without touching the document.
    pub fn clear(&mut self) {
        self.markers.clear();
    }
}

/// Executes resources in the main or an isolated world.
#[derive(Clone)]
pub struct ExecutionContext {
    sandbox: Arc<dyn Sandbox>,
    engine: Arc<dyn ScriptEngine>,
}

impl ExecutionContext {
    /// Create a context running isolated code with `engine` inside `sandbox`.
    #[must_use]
    pub fn new(sandbox: Arc<dyn Sandbox>, engine: Arc<dyn ScriptEngine>) -> Self {
        Self { sandbox, engine }
    }

    /// Create a context with a [`RealmSandbox`].
    #[must_use]
    pub fn with_engine(engine: Arc<dyn ScriptEngine>) -> Self {
        Self::new(Arc::new(RealmSandbox), engine)
    }

    /// Active sandbox variant.
    #[must_use]
    pub fn sandbox_kind(&self) -> SandboxKind {
        self.sandbox.kind()
    }

    /// Run one script.
    ///
    /// In the main world the script element is attached to `target` and
    /// removed straight after; the page reports the outcome. In an isolated
    /// world the script sees only `bridge`'s capability API plus the
    /// target's `window` and `document`.
    ///
    /// # Errors
    ///
    /// Any [`ExecutionError`] for this resource. Siblings are unaffected.
    pub fn run(
        &self,
        script: &ScriptSource,
        world: World,
        target: &dyn Document,
        bridge: Option<&CapabilityBridge>,
    ) -> ExecutionResult<()> {
        match world {
            World::Main => run_main(script, target),
            World::Isolated => {
                let bridge = bridge.ok_or_else(|| ExecutionError::MissingBridge {
                    resource: script.resource.clone(),
                })?;
                let globals = IsolatedGlobals {
                    chrome: bridge.chrome_api(),
                    window: target.window(),
                    document: target.document_ref(),
                };
                self.sandbox.run(&self.engine, script, globals)
            },
        }
    }

    /// Append a stylesheet and record its marker.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::DuplicateStyle`] if the same extension already
    /// applied this resource, or [`ExecutionError::Document`] if the page
    /// refuses the element.
    pub fn inject_style(
        &self,
        markers: &mut StyleMarkers,
        target: &dyn Document,
        style: StyleElement,
    ) -> ExecutionResult<ElementHandle> {
        let key = (style.extension.clone(), style.resource.clone());
        if markers.markers.contains_key(&key) {
            return Err(ExecutionError::DuplicateStyle {
                resource: style.resource,
            });
        }
        let handle = target.append_style(style)?;
        trace!(extension_id = %key.0, resource = %key.1, ?handle, "Style appended");
        markers.markers.insert(key, handle);
        Ok(handle)
    }
}

fn run_main(script: &ScriptSource, target: &dyn Document) -> ExecutionResult<()> {
    let attachment = target.attach_script(ScriptElement {
        extension: script.extension.clone(),
        resource: script.resource.clone(),
        source: script.code.clone(),
    })?;

    // The side effect is the payload; the element itself is not kept.
    if let Err(e) = target.remove_element(attachment.handle) {
        debug!(resource = %script.resource, error = %e, "Main-world element already gone");
    }

    attachment
        .outcome
        .map_err(|message| ExecutionError::ScriptFailed {
            resource: script.resource.clone(),
            message,
        })
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("sandbox", &self.sandbox.kind())
            .finish_non_exhaustive()
    }
}
