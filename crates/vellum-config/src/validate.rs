//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::EngineConfig;

const SANDBOX_KINDS: &[&str] = &["realm", "worker"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Validate a fully-merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &EngineConfig) -> ConfigResult<()> {
    validate_sandbox(config)?;
    validate_bridge(config)?;
    validate_patterns(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_sandbox(config: &EngineConfig) -> ConfigResult<()> {
    let s = &config.sandbox;
    if !SANDBOX_KINDS.contains(&s.kind.as_str()) {
        return Err(invalid(
            "sandbox.kind",
            format!("unsupported sandbox '{}'; expected realm or worker", s.kind),
        ));
    }
    if s.execution_timeout_ms == 0 {
        return Err(invalid("sandbox.execution_timeout_ms", "must be greater than 0"));
    }
    Ok(())
}

fn validate_bridge(config: &EngineConfig) -> ConfigResult<()> {
    let b = &config.bridge;
    if b.response_timeout_ms == 0 {
        return Err(invalid("bridge.response_timeout_ms", "must be greater than 0"));
    }
    if b.max_pending_requests == 0 {
        return Err(invalid("bridge.max_pending_requests", "must be greater than 0"));
    }
    if b.max_ports == 0 {
        return Err(invalid("bridge.max_ports", "must be greater than 0"));
    }
    Ok(())
}

fn validate_patterns(config: &EngineConfig) -> ConfigResult<()> {
    if config.patterns.cache_capacity == 0 {
        return Err(invalid("patterns.cache_capacity", "must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(config: &EngineConfig) -> ConfigResult<()> {
    let l = &config.logging;
    if l.level.trim().is_empty() {
        return Err(invalid("logging.level", "must not be empty"));
    }
    if !LOG_FORMATS.contains(&l.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: {}",
                l.format,
                LOG_FORMATS.join(", ")
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_unknown_sandbox() {
        let mut config = EngineConfig::default();
        config.sandbox.kind = "process".into();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. } if field == "sandbox.kind"));
    }

    #[test]
    fn test_rejects_zero_limits() {
        let mut config = EngineConfig::default();
        config.bridge.max_pending_requests = 0;
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.bridge.response_timeout_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = EngineConfig::default();
        config.patterns.cache_capacity = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let mut config = EngineConfig::default();
        config.logging.format = "xml".into();
        assert!(validate(&config).is_err());
    }
}
