//! Vellum Core - Shared types and traits for the content-script injection engine.
//!
//! This crate provides:
//! - Identifiers for extensions, documents, resources and rules
//! - The declarative rule schema ([`RuleSpec`]) and its validated form ([`ScriptRule`])
//! - Document lifecycle types and the [`Document`] trait implemented by the host shell
//! - Injection records used for idempotency
//! - Extension manifest parsing (`content_scripts`)
//!
//! # Example
//!
//! ```
//! use vellum_core::{ExtensionId, RuleId, RuleSpec, RunAt, World};
//!
//! let spec = RuleSpec::new(["https://*.example.com/*"])
//!     .with_js(["content.js"])
//!     .with_run_at(RunAt::DocumentEnd);
//!
//! let rule = spec.validate(RuleId::new(ExtensionId::new("ext1"), 0)).unwrap();
//! assert_eq!(rule.phase(), RunAt::DocumentEnd);
//! assert_eq!(rule.world(), World::Isolated);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod document;
mod error;
mod ids;
mod manifest;
mod record;
mod rule;

pub use document::{
    Document, DocumentError, DocumentRef, ElementHandle, Frame, LifecycleListener,
    LifecycleSignal, ListenerId, ReadyState, ScriptAttachment, ScriptElement, StyleElement,
    WindowRef,
};
pub use error::{ManifestError, ManifestResult, RuleValidationError};
pub use ids::{DocumentId, ExtensionId, ResourceRef, RuleId};
pub use manifest::ExtensionManifest;
pub use record::InjectionRecord;
pub use rule::{RuleSpec, RunAt, ScriptRule, World};
