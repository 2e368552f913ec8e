//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vellum_sandbox::prelude::*;` to import all essential types.

// Errors
pub use crate::{ExecutionError, ExecutionResult, ResourceError, ScriptFault};

// Execution
pub use crate::{ExecutionContext, IsolatedGlobals, ScriptEngine, ScriptSource, StyleMarkers};

// Sandboxes
pub use crate::{RealmSandbox, Sandbox, SandboxKind, WorkerSandbox};

// Resources
pub use crate::{DirectoryResources, InMemoryResources, ResourceLoader};
