//! Extension manifest parsing.
//!
//! Only the parts of `manifest.json` the injection engine consumes are
//! modelled; unknown keys are ignored.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};
use crate::rule::RuleSpec;

/// The content-script relevant subset of an extension manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Display name.
    pub name: String,
    /// Extension version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Declared content scripts, in declaration order.
    #[serde(default)]
    pub content_scripts: Vec<RuleSpec>,
}

impl ExtensionManifest {
    /// Parse a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] if the text is not a valid manifest.
    pub fn from_json(text: &str) -> ManifestResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] if the file cannot be read and
    /// [`ManifestError::Parse`] if it is not a valid manifest.
    pub fn load(path: &Path) -> ManifestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}
