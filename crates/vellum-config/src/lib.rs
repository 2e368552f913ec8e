#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Configuration for the vellum injection engine.
//!
//! # Usage
//!
//! ```rust,no_run
//! use vellum_config::EngineConfig;
//!
//! let resolved = EngineConfig::load(None).unwrap();
//! println!("sandbox: {}", resolved.config.sandbox.kind);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Config file** (`--config <path>`, or the user config
//!    `<config dir>/vellum/config.toml`)
//! 2. **Environment variables** (`VELLUM_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! # Design
//!
//! This crate has **no dependencies on other internal vellum crates**.
//! Conversion to domain types (sandbox kind, bridge limits, log config)
//! happens in `vellum_inject::config_bridge`.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use types::*;

impl EngineConfig {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a config file is malformed or the final
    /// configuration fails validation.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(path)
    }
}
