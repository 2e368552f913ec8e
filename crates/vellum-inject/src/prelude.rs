//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vellum_inject::prelude::*;` to import all essential types.

// Coordinator
pub use crate::{CoordinatorConfig, InjectionCoordinator};

// Errors
pub use crate::{RegistrationError, RegistrationResult};

// Document state
pub use crate::{DocumentState, TeardownReport};

// Registration and planning
pub use crate::{InjectionPlan, PlannedInjection, RegistrationReport, RejectedRule};

// Events
pub use crate::{EventReceiver, InjectionEvent};
