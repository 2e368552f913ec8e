//! Vellum Telemetry - logging setup for the vellum injection engine.
//!
//! # Example
//!
//! ```rust,no_run
//! use vellum_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), vellum_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("vellum::extension=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("engine started");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
