//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (active.rs)
//!     → window × probe.rs per backend, backends concurrently
//!     → successes ≥ threshold ? enable : disable (pool status)
//!     → HealthEvent on the broadcast channel (events.rs)
//! ```
//!
//! # Design Decisions
//! - Every backend is probed each round, disabled ones included, so a
//!   backend that was marked sick can come back
//! - A verdict is written to the pool before its event is published
//! - A probe that errors, times out or panics counts as one failure

pub mod active;
pub mod events;
pub mod probe;

pub use active::{HealthCheckOptions, HealthError, HealthMonitor, MonitorHandle};
pub use events::{HealthEvent, HealthVerdict};
pub use probe::{HttpProbe, Probe, ProbeError, TcpProbe};
