//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pool, balancer and health monitor produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → Log output (stdout)
//!     → Prometheus exporter, when the binary installs one
//! ```
//!
//! # Design Decisions
//! - Library code only emits; installing subscribers and recorders is left
//!   to the binary
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
