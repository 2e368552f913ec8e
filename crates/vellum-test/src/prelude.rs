//! Prelude module - commonly used test helpers.
//!
//! Use `use vellum_test::prelude::*;` to import all essential types.

pub use crate::fixtures::*;
pub use crate::harness::init_test_logging;
pub use crate::{MockDocument, MockHostShell, MockScriptEngine, RecordedMessage, ScriptRun};
