//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::health::{HealthCheckOptions, HttpProbe, Probe, TcpProbe};
use crate::load_balancer::registry;
use crate::load_balancer::BackendConfig;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Strategy name (`round-robin`, `first`, `url`, `url-path`, `leastconn`).
    pub strategy: String,

    /// Pool members, in selection order.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: registry::ROUND_ROBIN.to_string(),
            backends: Vec::new(),
            health_check: HealthCheckConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Built-in probe used by configured health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Tcp,
    Http,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Time between rounds in milliseconds.
    pub interval_ms: u64,

    /// Probes per backend per round.
    pub window: usize,

    /// Successful probes needed to stay enabled.
    pub threshold: usize,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    pub probe: ProbeKind,

    /// Path requested by the HTTP probe.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 5000,
            window: 5,
            threshold: 3,
            timeout_ms: 1000,
            probe: ProbeKind::Tcp,
            path: "/ping".to_string(),
        }
    }
}

impl HealthCheckConfig {
    pub fn options(&self) -> HealthCheckOptions {
        HealthCheckOptions {
            interval: Duration::from_millis(self.interval_ms),
            window: self.window,
            threshold: self.threshold,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Probe described by this configuration.
    pub fn build_probe(&self) -> Arc<dyn Probe> {
        match self.probe {
            ProbeKind::Tcp => Arc::new(TcpProbe::new(self.timeout())),
            ProbeKind::Http => Arc::new(HttpProbe::new(self.path.clone(), self.timeout())),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: BalancerConfig = toml::from_str(
            r#"
            [[backends]]
            host = "a.example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.strategy, "round-robin");
        assert_eq!(config.backends.len(), 1);
        assert!(!config.health_check.enabled);
        assert_eq!(config.health_check.options(), HealthCheckOptions::default());
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_probe_kind() {
        let config: HealthCheckConfig = toml::from_str(
            r#"
            enabled = true
            probe = "http"
            path = "/health"
            timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.probe, ProbeKind::Http);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert!(toml::from_str::<HealthCheckConfig>(r#"probe = "icmp""#).is_err());
    }
}
