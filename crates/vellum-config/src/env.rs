//! Environment variable fallbacks.
//!
//! A `VELLUM_*` variable only fills a field that no config file set.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// How to interpret an environment value.
#[derive(Debug, Clone, Copy)]
enum Kind {
    Text,
    Integer,
}

/// Environment variable → dotted config path.
const ENV_FALLBACKS: &[(&str, &str, Kind)] = &[
    ("VELLUM_SANDBOX_KIND", "sandbox.kind", Kind::Text),
    ("VELLUM_EXECUTION_TIMEOUT_MS", "sandbox.execution_timeout_ms", Kind::Integer),
    ("VELLUM_RESPONSE_TIMEOUT_MS", "bridge.response_timeout_ms", Kind::Integer),
    ("VELLUM_MAX_PENDING_REQUESTS", "bridge.max_pending_requests", Kind::Integer),
    ("VELLUM_MAX_PORTS", "bridge.max_ports", Kind::Integer),
    ("VELLUM_PATTERN_CACHE_CAPACITY", "patterns.cache_capacity", Kind::Integer),
    ("VELLUM_LOG_LEVEL", "logging.level", Kind::Text),
    ("VELLUM_LOG_FORMAT", "logging.format", Kind::Text),
];

/// Collect the process's `VELLUM_*` variables.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with("VELLUM_"))
        .collect()
}

/// Apply fallbacks to `merged` for every path not in `file_paths`.
///
/// Returns the dotted paths that were filled from the environment.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if a numeric variable does not
/// parse.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    file_paths: &HashSet<String>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<Vec<String>> {
    let mut applied = Vec::new();
    for (var, path, kind) in ENV_FALLBACKS {
        let Some(raw) = env_vars.get(*var) else {
            continue;
        };
        if file_paths.contains(*path) {
            debug!(var, path, "config file value takes precedence over env var");
            continue;
        }
        let value = match kind {
            Kind::Text => toml::Value::String(raw.clone()),
            Kind::Integer => raw
                .trim()
                .parse::<i64>()
                .map(toml::Value::Integer)
                .map_err(|e| ConfigError::ValidationError {
                    field: (*var).to_owned(),
                    message: format!("expected an integer, got '{raw}': {e}"),
                })?,
        };
        set_path(merged, path, value);
        applied.push((*path).to_owned());
    }
    Ok(applied)
}

fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(leaf) = parts.pop() else {
        return;
    };
    let mut node = root;
    for part in parts {
        let toml::Value::Table(table) = node else {
            return;
        };
        node = table
            .entry(part.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let toml::Value::Table(table) = node {
        table.insert(leaf.to_owned(), value);
    }
}

/// Collect the dotted paths of every leaf in `value`.
pub(crate) fn leaf_paths(value: &toml::Value, prefix: &str, out: &mut HashSet<String>) {
    if let toml::Value::Table(table) = value {
        for (key, child) in table {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            leaf_paths(child, &path, out);
        }
    } else {
        out.insert(prefix.to_owned());
    }
}
