//! The document abstraction the host shell implements.
//!
//! The engine reads a document's ready state and subscribes to its
//! lifecycle signals; it never changes the ready state. The only DOM
//! mutations it performs are attaching and removing its own script and
//! style elements.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{DocumentId, ExtensionId, ResourceRef};
use crate::rule::RunAt;

/// Loading phase of a document, as the host reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    /// The document is still being parsed.
    Loading,
    /// Parsing finished; subresources may still be loading.
    Interactive,
    /// Everything has loaded.
    Complete,
}

impl ReadyState {
    /// The latest injection phase a document in this state has passed.
    #[must_use]
    pub fn reached_phase(self) -> RunAt {
        match self {
            Self::Loading => RunAt::DocumentStart,
            Self::Interactive => RunAt::DocumentEnd,
            Self::Complete => RunAt::DocumentIdle,
        }
    }
}

/// A lifecycle transition emitted by the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    /// DOM fully parsed (`DOMContentLoaded`).
    DomContentLoaded,
    /// All subresources loaded (`load`).
    Load,
}

impl LifecycleSignal {
    /// The injection phase this signal opens.
    #[must_use]
    pub fn phase(self) -> RunAt {
        match self {
            Self::DomContentLoaded => RunAt::DocumentEnd,
            Self::Load => RunAt::DocumentIdle,
        }
    }
}

/// Where a document sits in its frame tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// Top-level browsing context.
    #[default]
    Top,
    /// Same-document iframe.
    Child {
        /// URL of the embedding document, if known.
        parent_url: Option<String>,
    },
}

impl Frame {
    /// Whether this is the top frame.
    #[must_use]
    pub fn is_top(&self) -> bool {
        matches!(self, Self::Top)
    }

    /// URL of the parent document for child frames.
    #[must_use]
    pub fn parent_url(&self) -> Option<&str> {
        match self {
            Self::Top => None,
            Self::Child { parent_url } => parent_url.as_deref(),
        }
    }
}

/// Handle of an element the engine attached to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementHandle(pub u64);

/// Handle of a lifecycle listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

/// Opaque reference to a page's `window`, resolved by the host's script engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowRef(pub DocumentId);

/// Opaque reference to a page's `document`, resolved by the host's script engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentRef(pub DocumentId);

/// A script element to attach to the page (main world).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptElement {
    /// Extension that owns the script.
    pub extension: ExtensionId,
    /// Resource the code came from.
    pub resource: ResourceRef,
    /// Script source.
    pub source: String,
}

/// A style element to append to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleElement {
    /// Extension that owns the stylesheet.
    pub extension: ExtensionId,
    /// Resource the stylesheet came from; used as the removal tag.
    pub resource: ResourceRef,
    /// Stylesheet text.
    pub css: String,
}

/// Result of attaching a script element.
///
/// The element stays attached even when the script throws, so the handle is
/// returned alongside the script's outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAttachment {
    /// The attached element.
    pub handle: ElementHandle,
    /// `Err(message)` if the page reported an exception.
    pub outcome: Result<(), String>,
}

/// Errors a document can report for DOM operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The document is no longer attached to a frame.
    #[error("Document is detached")]
    Detached,

    /// The element handle is unknown (already removed).
    #[error("Element {0:?} not found")]
    ElementNotFound(ElementHandle),

    /// The host refused the operation.
    #[error("Document rejected operation: {0}")]
    Rejected(String),
}

/// Lifecycle callback installed by the engine.
pub type LifecycleListener = Box<dyn Fn(LifecycleSignal) + Send + Sync>;

/// A navigated document owned by the host shell.
pub trait Document: Send + Sync {
    /// Identity of this document instance.
    fn id(&self) -> DocumentId;

    /// Current loading phase.
    fn ready_state(&self) -> ReadyState;

    /// Position in the frame tree.
    fn frame(&self) -> Frame {
        Frame::Top
    }

    /// Subscribe to lifecycle transitions.
    fn add_lifecycle_listener(&self, listener: LifecycleListener) -> ListenerId;

    /// Remove a lifecycle subscription. Returns `false` if it was unknown.
    fn remove_lifecycle_listener(&self, id: ListenerId) -> bool;

    /// Attach a script element so it runs in the page's global scope.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] if the element could not be attached.
    fn attach_script(&self, script: ScriptElement) -> Result<ScriptAttachment, DocumentError>;

    /// Append a style element.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] if the element could not be appended.
    fn append_style(&self, style: StyleElement) -> Result<ElementHandle, DocumentError>;

    /// Remove an element previously attached by the engine.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentError`] if the element is unknown or the document is gone.
    fn remove_element(&self, handle: ElementHandle) -> Result<(), DocumentError>;

    /// Reference to the page's `window`.
    fn window(&self) -> WindowRef {
        WindowRef(self.id())
    }

    /// Reference to the page's `document`.
    fn document_ref(&self) -> DocumentRef {
        DocumentRef(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reached_phase() {
        assert_eq!(ReadyState::Loading.reached_phase(), RunAt::DocumentStart);
        assert_eq!(ReadyState::Interactive.reached_phase(), RunAt::DocumentEnd);
        assert_eq!(ReadyState::Complete.reached_phase(), RunAt::DocumentIdle);
    }

    #[test]
    fn test_signal_phase() {
        assert_eq!(LifecycleSignal::DomContentLoaded.phase(), RunAt::DocumentEnd);
        assert_eq!(LifecycleSignal::Load.phase(), RunAt::DocumentIdle);
    }

    #[test]
    fn test_frame_parent_url() {
        assert_eq!(Frame::Top.parent_url(), None);
        let child = Frame::Child {
            parent_url: Some("https://a.com/".into()),
        };
        assert!(!child.is_top());
        assert_eq!(child.parent_url(), Some("https://a.com/"));
    }
}
