//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate backend entries (address present, weight ≥ 1, known protocol)
//! - Validate value ranges (interval > 0, 1 ≤ threshold ≤ window)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::BalancerConfig;
use crate::load_balancer::backend::is_supported_protocol;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `backends[1].weight`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.strategy.trim().is_empty() {
        errors.push(ValidationError::new("strategy", "must not be empty"));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::new("backends", "at least one backend is required"));
    }

    for (i, backend) in config.backends.iter().enumerate() {
        let field = |name: &str| format!("backends[{}].{}", i, name);

        if backend.host.as_deref().map_or(true, |h| h.trim().is_empty()) && backend.ip.is_none() {
            errors.push(ValidationError::new(field("host"), "host or ip is required"));
        }
        if backend.weight == 0 {
            errors.push(ValidationError::new(field("weight"), "must be at least 1"));
        }
        if let Some(protocol) = backend.protocol.as_deref() {
            if !is_supported_protocol(protocol) {
                errors.push(ValidationError::new(
                    field("protocol"),
                    format!("unsupported protocol '{}'", protocol),
                ));
            }
        }
        if backend.port == Some(0) {
            errors.push(ValidationError::new(field("port"), "must not be 0"));
        }
    }

    let health = &config.health_check;
    if health.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be greater than 0"));
    }
    if health.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
    }
    if health.window == 0 {
        errors.push(ValidationError::new("health_check.window", "must be at least 1"));
    }
    if health.threshold == 0 || health.threshold > health.window {
        errors.push(ValidationError::new(
            "health_check.threshold",
            format!("must be between 1 and window ({})", health.window),
        ));
    }
    if !health.path.starts_with('/') {
        errors.push(ValidationError::new("health_check.path", "must start with '/'"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address '{}'", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
