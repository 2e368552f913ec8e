//! Vellum Lifecycle - Phase scheduling against a document's loading lifecycle.
//!
//! The [`LifecycleScheduler`] fires one callback per `(document, phase)` when
//! the document reaches that phase:
//!
//! ```text
//! START (before any DOM) ──DOMContentLoaded──▶ END ──load──▶ IDLE
//! ```
//!
//! Subscribing late is tolerated: a phase the document has already passed
//! fires immediately and synchronously. Phases always fire in
//! `START, END, IDLE` order for a given document, and each phase fires at
//! most once per document instance.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod scheduler;

pub use scheduler::{LifecycleScheduler, PhaseCallback, Subscription};
