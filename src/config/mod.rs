//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//!     → Balancer::from_config + HealthCheckConfig::options/probe
//! ```
//!
//! # Design Decisions
//! - All fields except the backend list have defaults
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BalancerConfig, HealthCheckConfig, ObservabilityConfig, ProbeKind};
pub use validation::{validate_config, ValidationError};
