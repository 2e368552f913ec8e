//! Vellum Inject - the content-script injection coordinator.
//!
//! The coordinator takes a navigated document, matches registered rules
//! against its URL and frame, partitions them by phase and hands each
//! partition to the lifecycle scheduler. When a phase fires, every
//! resource is checked against the document's injection records, then run
//! in its world: main-world scripts are attached to the page, isolated-world
//! scripts run in a sandbox that sees only the capability bridge.
//!
//! All per-document state lives in one context per navigation, destroyed by
//! [`InjectionCoordinator::teardown`] in a fixed order: pending phases are
//! cancelled, style markers detached, channels closed and records cleared.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vellum_core::RuleSpec;
//! use vellum_inject::prelude::*;
//! use vellum_sandbox::InMemoryResources;
//! # fn host() -> (Arc<dyn vellum_sandbox::ScriptEngine>, Arc<dyn vellum_bridge::HostShell>, Arc<dyn vellum_core::Document>) { unimplemented!() }
//!
//! let (engine, shell, document) = host();
//! let resources = Arc::new(InMemoryResources::new().with("ext1", "a.js", "console.log(1)"));
//! let coordinator =
//!     InjectionCoordinator::new(CoordinatorConfig::default(), engine, resources, shell);
//!
//! coordinator
//!     .register("ext1", vec![RuleSpec::new(["<all_urls>"]).with_js(["a.js"])])
//!     .unwrap();
//! coordinator.on_navigate(document, "https://example.com/");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config_bridge;
pub mod prelude;

mod context;
mod coordinator;
mod error;
mod events;
mod registry;

pub use context::{DocumentState, TeardownReport};
pub use coordinator::{CoordinatorConfig, EXTENSION_LOG_TARGET, InjectionCoordinator};
pub use error::{RegistrationError, RegistrationResult};
pub use events::{DEFAULT_EVENT_CAPACITY, EventBus, EventReceiver, InjectionEvent};
pub use registry::{
    InjectionPlan, MatchedRule, PlannedInjection, RegistrationReport, RejectedRule, RuleRegistry,
    partition,
};
