//! Configuration struct definitions.
//!
//! Defaults here mirror `defaults.toml` so a partially-specified file still
//! deserializes.

use serde::{Deserialize, Serialize};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// `[sandbox]`
    pub sandbox: SandboxSection,
    /// `[bridge]`
    pub bridge: BridgeSection,
    /// `[patterns]`
    pub patterns: PatternsSection,
    /// `[logging]`
    pub logging: LoggingSection,
}

/// Isolated-world execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// `realm` or `worker`.
    pub kind: String,
    /// Per-script limit for worker sandboxes, in milliseconds.
    pub execution_timeout_ms: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            kind: "realm".to_owned(),
            execution_timeout_ms: 5000,
        }
    }
}

/// Capability bridge limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    /// How long a request waits for its reply, in milliseconds.
    pub response_timeout_ms: u64,
    /// Unanswered requests allowed per channel.
    pub max_pending_requests: usize,
    /// Open ports allowed per channel.
    pub max_ports: usize,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            response_timeout_ms: 30_000,
            max_pending_requests: 256,
            max_ports: 64,
        }
    }
}

/// Pattern compilation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsSection {
    /// Compiled patterns kept in the cache.
    pub cache_capacity: usize,
}

impl Default for PatternsSection {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Level or `EnvFilter` directive.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
        }
    }
}
