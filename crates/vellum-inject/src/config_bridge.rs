//! Bridge from `vellum_config::EngineConfig` to domain types.
//!
//! The config crate depends on no internal crate, so every conversion into
//! coordinator, bridge, sandbox and logging types happens here, once.

use std::time::Duration;

use tracing::warn;

use vellum_bridge::BridgeConfig;
use vellum_config::EngineConfig;
use vellum_sandbox::SandboxKind;
use vellum_telemetry::{LogConfig, LogFormat};

use crate::coordinator::CoordinatorConfig;
use crate::events::DEFAULT_EVENT_CAPACITY;

/// Convert config to [`CoordinatorConfig`].
#[must_use]
pub fn to_coordinator_config(cfg: &EngineConfig) -> CoordinatorConfig {
    CoordinatorConfig {
        sandbox: to_sandbox_kind(cfg),
        execution_timeout: Duration::from_millis(cfg.sandbox.execution_timeout_ms),
        bridge: to_bridge_config(cfg),
        pattern_cache_capacity: cfg.patterns.cache_capacity,
        event_capacity: DEFAULT_EVENT_CAPACITY,
    }
}

/// Convert config to [`BridgeConfig`].
#[must_use]
pub fn to_bridge_config(cfg: &EngineConfig) -> BridgeConfig {
    BridgeConfig {
        response_timeout: Duration::from_millis(cfg.bridge.response_timeout_ms),
        max_pending_requests: cfg.bridge.max_pending_requests,
        max_ports: cfg.bridge.max_ports,
    }
}

/// Convert `sandbox.kind` to [`SandboxKind`].
///
/// Validation already rejects unknown kinds; an unvalidated value falls
/// back to the realm sandbox.
#[must_use]
pub fn to_sandbox_kind(cfg: &EngineConfig) -> SandboxKind {
    match cfg.sandbox.kind.trim().to_ascii_lowercase().as_str() {
        "worker" => SandboxKind::Worker,
        "realm" => SandboxKind::Realm,
        other => {
            warn!(kind = other, "Unknown sandbox kind, using realm");
            SandboxKind::Realm
        },
    }
}

/// Convert the `[logging]` section to [`LogConfig`].
#[must_use]
pub fn to_log_config(cfg: &EngineConfig) -> LogConfig {
    let format = cfg.logging.format.parse().unwrap_or_else(|_| {
        warn!(format = %cfg.logging.format, "Unknown log format, using compact");
        LogFormat::Compact
    });
    LogConfig::new(&cfg.logging.level).with_format(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert_to_domain_defaults() {
        let cfg = EngineConfig::default();
        let coordinator = to_coordinator_config(&cfg);

        assert_eq!(coordinator.sandbox, SandboxKind::Realm);
        assert_eq!(coordinator.execution_timeout, Duration::from_secs(5));
        assert_eq!(coordinator.bridge, BridgeConfig::default());
        assert_eq!(coordinator.pattern_cache_capacity, 1024);
    }

    #[test]
    fn test_worker_sandbox() {
        let mut cfg = EngineConfig::default();
        cfg.sandbox.kind = "Worker".into();
        cfg.sandbox.execution_timeout_ms = 250;

        let coordinator = to_coordinator_config(&cfg);
        assert_eq!(coordinator.sandbox, SandboxKind::Worker);
        assert_eq!(coordinator.execution_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_bridge_limits() {
        let mut cfg = EngineConfig::default();
        cfg.bridge.response_timeout_ms = 1500;
        cfg.bridge.max_pending_requests = 4;
        cfg.bridge.max_ports = 2;

        let bridge = to_bridge_config(&cfg);
        assert_eq!(bridge.response_timeout, Duration::from_millis(1500));
        assert_eq!(bridge.max_pending_requests, 4);
        assert_eq!(bridge.max_ports, 2);
    }

    #[test]
    fn test_log_config() {
        let mut cfg = EngineConfig::default();
        cfg.logging.level = "debug".into();
        cfg.logging.format = "json".into();

        let log = to_log_config(&cfg);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);

        cfg.logging.format = "xml".into();
        assert_eq!(to_log_config(&cfg).format, LogFormat::Compact);
    }
}
