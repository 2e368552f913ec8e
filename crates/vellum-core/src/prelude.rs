//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vellum_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{ManifestError, ManifestResult, RuleValidationError};

// Identifiers
pub use crate::{DocumentId, ExtensionId, ResourceRef, RuleId};

// Rules
pub use crate::{ExtensionManifest, RuleSpec, RunAt, ScriptRule, World};

// Documents
pub use crate::{
    Document, DocumentError, DocumentRef, ElementHandle, Frame, LifecycleSignal, ReadyState,
    WindowRef,
};

// Records
pub use crate::InjectionRecord;
