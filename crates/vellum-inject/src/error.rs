//! Registration errors.

use thiserror::Error;
use vellum_core::{ExtensionId, RuleValidationError};

/// Errors surfaced synchronously by `register` and `unregister`.
///
/// Injection-time failures are never returned to the caller; they are
/// logged and published as events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The extension id is empty or whitespace.
    #[error("Extension id must not be blank")]
    BlankExtension,

    /// A rule has an invalid shape; nothing from the call was registered.
    #[error(transparent)]
    InvalidRule(#[from] RuleValidationError),

    /// `unregister` was called for an unknown extension.
    #[error("Extension {extension} is not registered")]
    NotRegistered {
        /// The unknown extension.
        extension: ExtensionId,
    },
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;
