//! Upstream balancer library.
//!
//! Picks a backend for each outgoing request from a pool of interchangeable
//! servers, rewrites the request to that backend, and keeps the pool's
//! availability current with periodic health probes.

pub mod balancer;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use balancer::{Balancer, Dispatch, OutgoingRequest, SelectError, SimulatedRequest, TerminalEvent};
pub use config::BalancerConfig;
pub use health::{HealthCheckOptions, HealthEvent, HealthVerdict, Probe, ProbeError};
pub use lifecycle::Shutdown;
pub use load_balancer::{Backend, BackendConfig, BackendId, PoolError, RoutingContext, ServerPool, Status};
