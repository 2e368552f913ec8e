//! Vellum Test - Shared test utilities for the vellum engine.
//!
//! This crate provides mock implementations of the host-side seams
//! ([`Document`](vellum_core::Document), [`HostShell`](vellum_bridge::HostShell),
//! [`ScriptEngine`](vellum_sandbox::ScriptEngine)) and rule fixtures that can
//! be used across crates as a dev-dependency.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! vellum-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use vellum_core::ReadyState;
//! use vellum_test::MockDocument;
//!
//! let doc = MockDocument::new();
//! doc.advance(ReadyState::Complete); // fires DOMContentLoaded, then load
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod document;
pub mod engine;
pub mod fixtures;
pub mod harness;
pub mod shell;

pub use document::MockDocument;
pub use engine::{MockScriptEngine, ScriptRun};
pub use fixtures::*;
pub use harness::*;
pub use shell::{MockHostShell, RecordedMessage};
