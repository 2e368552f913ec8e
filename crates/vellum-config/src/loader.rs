//! Config file discovery and layered loading.
//!
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge the config file (explicit path, or the user config if present)
//! 3. Apply `VELLUM_*` fallbacks for fields the file left unset
//! 4. Deserialize and validate

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars, leaf_paths};
use crate::error::{ConfigError, ConfigResult};
use crate::types::EngineConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration plus where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: EngineConfig,
    /// Files merged over the defaults.
    pub loaded_files: Vec<String>,
    /// Dotted paths filled from the environment.
    pub env_overrides: Vec<String>,
}

impl ResolvedConfig {
    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::ValidationError`] if serialization fails.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(&self.config).map_err(|e| ConfigError::ValidationError {
            field: "<config>".to_owned(),
            message: e.to_string(),
        })
    }
}

/// Default user config location (`<config dir>/vellum/config.toml`).
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("rs", "vellum", "vellum")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration using the process environment.
///
/// With `path`, that file must exist. Without it, the user config is merged
/// when present.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is unreadable or malformed, or the
/// merged result fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(path, &collect_env_vars())
}

/// Load configuration with an explicit set of environment variables.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    path: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let mut loaded_files = Vec::new();
    let mut file_paths = HashSet::new();

    let overlay = match path {
        Some(explicit) => Some((read_file(explicit)?, explicit.to_path_buf())),
        None => match user_config_path() {
            Some(user) => try_load_file(&user)?.map(|value| (value, user)),
            None => None,
        },
    };

    if let Some((overlay, file)) = overlay {
        leaf_paths(&overlay, "", &mut file_paths);
        deep_merge(&mut merged, &overlay);
        loaded_files.push(file.display().to_string());
        info!(path = %file.display(), "loaded config file");
    }

    let env_overrides = apply_env_fallbacks(&mut merged, &file_paths, env_vars)?;
    if !env_overrides.is_empty() {
        debug!(count = env_overrides.len(), "applied environment variable fallbacks");
    }

    let config: EngineConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        loaded_files,
        env_overrides,
    })
}

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the base.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_content(path, &content)
}

/// Try to load a file, returning `None` if it doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };
    parse_content(path, &content).map(Some)
}

fn parse_content(path: &Path, content: &str) -> ConfigResult<toml::Value> {
    if u64::try_from(content.len()).unwrap_or(u64::MAX) > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }
    toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_embedded_defaults_match_struct_defaults() {
        let parsed: EngineConfig = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config("[bridge]\nresponse_timeout_ms = 500\n");
        let resolved = load_with_env(Some(file.path()), &HashMap::new()).unwrap();

        assert_eq!(resolved.config.bridge.response_timeout_ms, 500);
        assert_eq!(resolved.config.bridge.max_pending_requests, 256);
        assert_eq!(resolved.loaded_files.len(), 1);
    }

    #[test]
    fn test_env_fills_unset_fields_only() {
        let file = write_config("[sandbox]\nkind = \"realm\"\n");
        let vars = env(&[
            ("VELLUM_SANDBOX_KIND", "worker"),
            ("VELLUM_MAX_PORTS", "8"),
            ("VELLUM_LOG_FORMAT", "json"),
        ]);
        let resolved = load_with_env(Some(file.path()), &vars).unwrap();

        assert_eq!(resolved.config.sandbox.kind, "realm");
        assert_eq!(resolved.config.bridge.max_ports, 8);
        assert_eq!(resolved.config.logging.format, "json");
        assert_eq!(
            resolved.env_overrides,
            vec!["bridge.max_ports".to_owned(), "logging.format".to_owned()]
        );
    }

    #[test]
    fn test_bad_env_integer() {
        let vars = env(&[("VELLUM_RESPONSE_TIMEOUT_MS", "soon")]);
        let file = write_config("");
        let err = load_with_env(Some(file.path()), &vars).unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError { field, .. } if field == "VELLUM_RESPONSE_TIMEOUT_MS")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_with_env(Some(&dir.path().join("nope.toml")), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_invalid_value_rejected() {
        let file = write_config("[sandbox]\nkind = \"process\"\n");
        assert!(matches!(
            load_with_env(Some(file.path()), &HashMap::new()),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config("[bridge\n");
        assert!(matches!(
            load_with_env(Some(file.path()), &HashMap::new()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_render_round_trips() {
        let file = write_config("[patterns]\ncache_capacity = 10\n");
        let resolved = load_with_env(Some(file.path()), &HashMap::new()).unwrap();
        let rendered = resolved.to_toml().unwrap();
        let reparsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed, resolved.config);
    }

    #[test]
    fn test_deep_merge_replaces_scalars() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n[b]\nz = 4\n").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_integer(), Some(4));
    }
}
