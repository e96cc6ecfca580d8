//! Balancer facade.
//!
//! # Responsibilities
//! - Bind a strategy name to the strategy registry and the shared pool
//! - Choose a backend for a routing context
//! - Rewrite outgoing requests (`dispatch`) and account connections for
//!   strategies that track them
//! - Own the health monitor and the health event channel
//!
//! # Data Flow
//! ```text
//! OutgoingRequest
//!     → dispatch (pass-through unless the URL starts with '/')
//!     → choose_backend → registry → strategy → ServerPool
//!     → URL rewrite + Host header
//!     → ConnectionGuard moved into the terminal callback (leastconn)
//! ```

pub mod dispatch;

use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::config::BalancerConfig;
use crate::health::{events, HealthCheckOptions, HealthError, HealthEvent, HealthMonitor, MonitorHandle, Probe};
use crate::load_balancer::registry::StrategyRegistry;
use crate::load_balancer::{
    Backend, BackendConfig, ConnectionGuard, PoolError, RoutingContext, SelectionStrategy, ServerPool,
};
use crate::observability::metrics;

pub use dispatch::{Dispatch, OutgoingRequest, SimulatedRequest, TerminalCallback, TerminalEvent};

/// Name custom functions passed to `with_custom_strategy` are registered under.
pub const CUSTOM: &str = "custom";

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no backend available (strategy {strategy})")]
    NoBackendAvailable { strategy: String },

    /// Nothing is registered under the bound strategy name. Fails only the
    /// current request, like `NoBackendAvailable`, and clears once a strategy
    /// is registered under that name.
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("strategy name must not be empty")]
    InvalidStrategyName,
}

impl SelectError {
    /// Whether the request went unrouted: no available backend, or no
    /// strategy bound under the current name.
    pub fn is_no_backend(&self) -> bool {
        matches!(self, Self::NoBackendAvailable { .. } | Self::UnknownStrategy(_))
    }
}

pub struct Balancer {
    pool: Arc<ServerPool>,
    registry: StrategyRegistry,
    strategy: ArcSwap<String>,
    events: broadcast::Sender<HealthEvent>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl Balancer {
    /// Build a pool from `backends` and bind the strategy called `strategy`.
    ///
    /// An unregistered name is accepted; selections fail with
    /// `UnknownStrategy` until a strategy is registered under it.
    pub fn new(backends: Vec<BackendConfig>, strategy: &str) -> Result<Self, PoolError> {
        Self::with_registry(backends, strategy, StrategyRegistry::with_builtins())
    }

    fn with_registry(
        backends: Vec<BackendConfig>,
        strategy: &str,
        registry: StrategyRegistry,
    ) -> Result<Self, PoolError> {
        let pool = Arc::new(ServerPool::new(backends)?);
        if !registry.contains(strategy) {
            tracing::warn!(strategy = %strategy, "Balancer bound to an unregistered strategy");
        }

        tracing::info!(
            strategy = %strategy,
            backends = pool.len(),
            available = pool.available().len(),
            "Balancer created"
        );

        Ok(Self {
            pool,
            registry,
            strategy: ArcSwap::from_pointee(strategy.to_string()),
            events: events::channel(),
            monitor: Mutex::new(None),
        })
    }

    /// Build a balancer whose strategy is `select`, registered as `custom`.
    pub fn with_custom_strategy<F>(backends: Vec<BackendConfig>, select: F) -> Result<Self, PoolError>
    where
        F: for<'a> Fn(&'a [Backend], &RoutingContext<'_>) -> Option<&'a Backend>
            + Send
            + Sync
            + 'static,
    {
        let registry = StrategyRegistry::with_builtins();
        registry.register_fn(CUSTOM, select);
        Self::with_registry(backends, CUSTOM, registry)
    }

    /// Build from a loaded configuration. Does not start health checks.
    pub fn from_config(config: &BalancerConfig) -> Result<Self, PoolError> {
        Self::new(config.backends.clone(), &config.strategy)
    }

    pub fn pool(&self) -> Arc<ServerPool> {
        self.pool.clone()
    }

    pub fn strategy_name(&self) -> String {
        self.strategy.load().to_string()
    }

    pub fn strategies(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Rebind the active strategy. Takes effect on the next selection.
    pub fn set_strategy(&self, name: &str) {
        if !self.registry.contains(name) {
            tracing::warn!(strategy = %name, "Switching to an unregistered strategy");
        }
        let previous = self.strategy.swap(Arc::new(name.to_string()));
        tracing::info!(from = %previous, to = %name, "Strategy changed");
    }

    /// Register a closure strategy under `name`.
    pub fn register_strategy<F>(&self, name: &str, select: F) -> Result<(), SelectError>
    where
        F: for<'a> Fn(&'a [Backend], &RoutingContext<'_>) -> Option<&'a Backend>
            + Send
            + Sync
            + 'static,
    {
        if name.trim().is_empty() {
            return Err(SelectError::InvalidStrategyName);
        }
        self.registry.register_fn(name, select);
        Ok(())
    }

    /// Register a strategy implementation under `name`.
    pub fn register(&self, name: &str, strategy: Arc<dyn SelectionStrategy>) -> Result<(), SelectError> {
        if name.trim().is_empty() {
            return Err(SelectError::InvalidStrategyName);
        }
        self.registry.register(name, strategy);
        Ok(())
    }

    pub fn choose_backend(&self, ctx: &RoutingContext<'_>) -> Result<Backend, SelectError> {
        let (name, strategy) = self.active_strategy()?;
        self.select(&name, strategy.as_ref(), ctx)
    }

    /// Route `request` to a backend.
    ///
    /// URLs that do not start with `/` are left untouched. Otherwise the URL
    /// is rewritten to the chosen backend, `Host` is set when the backend is
    /// addressed by ip, and for strategies that track connections the
    /// backend's count is incremented until the first terminal event.
    pub fn dispatch<R>(&self, request: &mut R) -> Result<Dispatch, SelectError>
    where
        R: OutgoingRequest + ?Sized,
    {
        if !dispatch::is_pool_relative(request.url()) {
            tracing::trace!(url = %request.url(), "Passing request through");
            return Ok(Dispatch::Passthrough);
        }

        let (name, strategy) = self.active_strategy()?;
        let path = request.url().to_string();
        let backend = self.select(&name, strategy.as_ref(), &RoutingContext::new(&path))?;

        if let Some(host) = backend.host_header() {
            request.set_header("host", host);
        }
        request.set_url(backend.target_url(&path));

        if !strategy.tracks_connections() {
            return Ok(Dispatch::Routed(backend));
        }

        match ConnectionGuard::acquire(self.pool.clone(), backend.id) {
            Ok(guard) => {
                request.on_terminal(Box::new(move |event| {
                    if guard.release() {
                        tracing::trace!(backend = %guard.backend_id(), ?event, "Connection released");
                    }
                }));
            }
            Err(e) => {
                tracing::warn!(backend = %backend.label(), error = %e, "Failed to track connection");
            }
        }

        let routed = self.pool.get(&backend.id).unwrap_or(backend);
        Ok(Dispatch::Routed(routed))
    }

    /// Snapshot of the availability view.
    pub fn available_servers(&self) -> Vec<Backend> {
        self.pool.available()
    }

    /// Subscribe to health verdicts. Works before any monitor is started.
    pub fn health_events(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    /// Start periodic health checks, replacing any running monitor.
    pub fn start_health_check(&self, options: HealthCheckOptions, probe: impl Probe) -> Result<(), HealthError> {
        self.start_shared_health_check(options, Arc::new(probe))
    }

    pub fn start_shared_health_check(
        &self,
        options: HealthCheckOptions,
        probe: Arc<dyn Probe>,
    ) -> Result<(), HealthError> {
        let handle = HealthMonitor::new(self.pool.clone(), options)
            .shared_probe(probe)
            .events(self.events.clone())
            .start()?;

        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = monitor.replace(handle) {
            previous.stop();
            tracing::info!("Previous health monitor replaced");
        }
        Ok(())
    }

    /// Stop the running monitor. Returns false if none was running.
    pub fn stop_health_check(&self) -> bool {
        let handle = self.monitor.lock().unwrap_or_else(PoisonError::into_inner).take();
        match handle {
            Some(handle) => {
                handle.stop();
                tracing::info!("Health monitor stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_health_check_running(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn active_strategy(&self) -> Result<(Arc<String>, Arc<dyn SelectionStrategy>), SelectError> {
        let name = self.strategy.load_full();
        let strategy = self
            .registry
            .get(&name)
            .ok_or_else(|| SelectError::UnknownStrategy(name.to_string()))?;
        Ok((name, strategy))
    }

    fn select(
        &self,
        name: &str,
        strategy: &dyn SelectionStrategy,
        ctx: &RoutingContext<'_>,
    ) -> Result<Backend, SelectError> {
        match strategy.next_server(&self.pool, ctx) {
            Some(backend) => {
                metrics::record_selection(name);
                tracing::trace!(strategy = %name, backend = %backend.label(), url = ctx.url, "Backend selected");
                Ok(backend)
            }
            None => {
                metrics::record_no_backend(name);
                tracing::debug!(strategy = %name, url = ctx.url, "No backend available");
                Err(SelectError::NoBackendAvailable {
                    strategy: name.to_string(),
                })
            }
        }
    }
}

impl Drop for Balancer {
    fn drop(&mut self) {
        self.stop_health_check();
    }
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("strategy", &self.strategy_name())
            .field("backends", &self.pool.len())
            .finish_non_exhaustive()
    }
}
