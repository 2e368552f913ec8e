//! Pattern compilation errors.

use thiserror::Error;

/// A match pattern failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// The pattern is empty.
    #[error("Empty match pattern")]
    Empty,

    /// The pattern has no `scheme://` prefix.
    #[error("Match pattern '{pattern}' is missing a scheme separator")]
    MissingScheme {
        /// Offending pattern.
        pattern: String,
    },

    /// The scheme is not one content scripts may target.
    #[error("Match pattern '{pattern}' uses unsupported scheme '{scheme}'")]
    UnsupportedScheme {
        /// Offending pattern.
        pattern: String,
        /// Rejected scheme.
        scheme: String,
    },

    /// The generated expression was rejected by the regex engine.
    #[error("Match pattern '{pattern}' failed to compile: {message}")]
    Compile {
        /// Offending pattern.
        pattern: String,
        /// Regex engine message.
        message: String,
    },
}

/// Result type for pattern operations.
pub type PatternResult<T> = Result<T, PatternError>;
