//! Error types for rule validation and manifest parsing.

use std::path::PathBuf;

use thiserror::Error;

use crate::ids::RuleId;

/// A rule's shape is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleValidationError {
    /// The rule declares no match patterns.
    #[error("Rule {rule} declares no match patterns")]
    EmptyMatches {
        /// Offending rule.
        rule: RuleId,
    },

    /// The rule declares neither scripts nor stylesheets.
    #[error("Rule {rule} declares neither scripts nor styles")]
    NoResources {
        /// Offending rule.
        rule: RuleId,
    },

    /// A resource reference is empty.
    #[error("Rule {rule} contains an empty resource reference")]
    EmptyResource {
        /// Offending rule.
        rule: RuleId,
    },
}

/// Errors that can occur while loading an extension manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("Failed to read manifest at {path}: {source}")]
    Io {
        /// Manifest path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid JSON or does not match the schema.
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
