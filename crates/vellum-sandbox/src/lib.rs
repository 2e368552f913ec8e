//! Vellum Sandbox - Execution contexts for injected code.
//!
//! Two worlds are supported:
//!
//! - **Main world**: the script is attached to the page as an element, so it
//!   runs in the page's own global scope, then the element is removed.
//! - **Isolated world**: the script runs through a host [`ScriptEngine`]
//!   inside a [`Sandbox`] and sees only [`IsolatedGlobals`]: the capability
//!   bridge's `chrome` object plus the page's `window` and `document`.
//!
//! Sandboxes come in two flavours, selected by [`SandboxKind`]:
//! [`RealmSandbox`] runs on the calling thread with a fresh scope, and
//! [`WorkerSandbox`] runs each script on its own thread with a deadline.
//!
//! Isolation is only as strong as the engine's scoping. The `window`
//! reference is a path into page state by construction.
//!
//! Stylesheets are appended through [`ExecutionContext::inject_style`] and
//! tracked in [`StyleMarkers`] for removal at teardown.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod engine;
mod error;
mod resources;
mod sandbox;

#[cfg(test)]
mod test_support;

pub use context::{ExecutionContext, StyleMarkers};
pub use engine::{IsolatedGlobals, ScriptEngine, ScriptSource};
pub use error::{ExecutionError, ExecutionResult, ResourceError, ResourceResult, ScriptFault};
pub use resources::{DirectoryResources, InMemoryResources, ResourceLoader};
pub use sandbox::{
    DEFAULT_EXECUTION_TIMEOUT, RealmSandbox, Sandbox, SandboxKind, WorkerSandbox, sandbox_for,
};
