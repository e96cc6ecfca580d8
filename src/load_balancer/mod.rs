//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request routing key (URL)
//!     → registry.rs (strategy name → strategy)
//!     → Strategy:
//!         - round_robin.rs (weighted rotation)
//!         - least_conn.rs (fewest in-flight connections)
//!         - hash.rs (url / url-path hash → index)
//!         - first.rs (first available)
//!         - custom.rs (user closure over the full list)
//!     → pool.rs (selection primitive over the availability view)
//!     → Backend snapshot or none
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless; the pool owns the round-robin cursor and all
//!   backend state
//! - Disabled backends are excluded by the availability view, not by each
//!   strategy

pub mod backend;
pub mod custom;
pub mod first;
pub mod hash;
pub mod least_conn;
pub mod pool;
pub mod registry;
pub mod round_robin;

pub use backend::{Backend, BackendConfig, BackendId, ConnectionGuard, Status};
pub use pool::{AvailabilityView, PoolError, ServerPool};
pub use registry::StrategyRegistry;

/// What a strategy may look at when choosing a backend.
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    /// Pool-relative request URL (path plus optional query).
    pub url: &'a str,
}

impl<'a> RoutingContext<'a> {
    pub fn new(url: &'a str) -> Self {
        Self { url }
    }

    /// Path component of the URL, without query or fragment.
    ///
    /// Taken verbatim: no dot-segment removal or percent-encoding, so
    /// distinct request paths stay distinct hash keys.
    pub fn path(&self) -> &'a str {
        self.url.split(['?', '#']).next().unwrap_or_default()
    }
}

/// A backend selection strategy.
pub trait SelectionStrategy: Send + Sync {
    /// Choose the next backend, or `None` if nothing is available.
    fn next_server(&self, pool: &ServerPool, ctx: &RoutingContext<'_>) -> Option<Backend>;

    /// Whether dispatch should track in-flight connections for this strategy.
    fn tracks_connections(&self) -> bool {
        false
    }
}
