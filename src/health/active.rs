//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend, enabled or not
//! - Turn each backend's window of probe results into a verdict
//! - Write the verdict to the pool, then publish it as a `HealthEvent`

use futures_util::future::join_all;
use futures_util::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::health::events::{self, HealthEvent, HealthVerdict};
use crate::health::probe::{Probe, ProbeError};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Backend, ServerPool, Status};

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("health check started without a probe")]
    MissingProbe,

    #[error("invalid health check options: {0}")]
    InvalidOptions(String),

    #[error("health check requires a running tokio runtime")]
    NoRuntime,
}

/// Probe schedule and verdict rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckOptions {
    /// Time between the starts of two rounds.
    pub interval: Duration,
    /// Probes per backend per round.
    pub window: usize,
    /// Successes needed for a healthy verdict.
    pub threshold: usize,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            window: 5,
            threshold: 3,
        }
    }
}

impl HealthCheckOptions {
    pub fn validate(&self) -> Result<(), HealthError> {
        if self.interval.is_zero() {
            return Err(HealthError::InvalidOptions("interval must be greater than zero".into()));
        }
        if self.window == 0 {
            return Err(HealthError::InvalidOptions("window must be at least 1".into()));
        }
        if self.threshold == 0 || self.threshold > self.window {
            return Err(HealthError::InvalidOptions(format!(
                "threshold must be between 1 and window ({}), got {}",
                self.window, self.threshold
            )));
        }
        Ok(())
    }

    fn verdict(&self, successes: usize) -> HealthVerdict {
        if successes >= self.threshold {
            HealthVerdict::Healthy
        } else {
            HealthVerdict::Sick
        }
    }
}

pub struct HealthMonitor {
    pool: Arc<ServerPool>,
    options: HealthCheckOptions,
    probe: Option<Arc<dyn Probe>>,
    events: broadcast::Sender<HealthEvent>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ServerPool>, options: HealthCheckOptions) -> Self {
        Self {
            pool,
            options,
            probe: None,
            events: events::channel(),
        }
    }

    pub fn probe(mut self, probe: impl Probe) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn shared_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Publish events on an existing channel instead of the monitor's own.
    pub fn events(mut self, sender: broadcast::Sender<HealthEvent>) -> Self {
        self.events = sender;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> &HealthCheckOptions {
        &self.options
    }

    /// Validate and spawn the monitor on the current tokio runtime.
    ///
    /// The first round starts immediately.
    pub fn start(self) -> Result<MonitorHandle, HealthError> {
        self.options.validate()?;
        let probe = self.probe.clone().ok_or(HealthError::MissingProbe)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HealthError::NoRuntime)?;

        let shutdown = Arc::new(Shutdown::new());
        let rx = shutdown.subscribe();
        let task = runtime.spawn(self.run(probe, rx));

        Ok(MonitorHandle { shutdown, task })
    }

    async fn run(self, probe: Arc<dyn Probe>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.options.interval.as_millis() as u64,
            window = self.options.window,
            threshold = self.options.threshold,
            backends = self.pool.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.round(probe.as_ref()).await;
                }
            }
        }
    }

    /// Run one round against every backend and return the verdicts in pool
    /// order.
    pub async fn check_all(&self) -> Result<Vec<HealthEvent>, HealthError> {
        let probe = self.probe.clone().ok_or(HealthError::MissingProbe)?;
        Ok(self.round(probe.as_ref()).await)
    }

    async fn round(&self, probe: &dyn Probe) -> Vec<HealthEvent> {
        let checks = self
            .pool
            .all()
            .into_iter()
            .map(|backend| self.check_backend(probe, backend));
        join_all(checks).await
    }

    async fn check_backend(&self, probe: &dyn Probe, backend: Backend) -> HealthEvent {
        let window = self.options.window;
        let results = join_all((0..window).map(|_| ping_once(probe, &backend))).await;
        let mut successes = 0;
        for result in results {
            match result {
                Ok(()) => successes += 1,
                Err(ProbeError::Panicked) => {
                    tracing::warn!(backend = %backend.label(), "Health probe panicked")
                }
                Err(e) => tracing::debug!(backend = %backend.label(), error = %e, "Health probe failed"),
            }
        }
        let verdict = self.options.verdict(successes);

        let status = match verdict {
            HealthVerdict::Healthy => Status::Enabled,
            HealthVerdict::Sick => Status::Disabled,
        };
        if let Err(e) = self.pool.set_status(&backend.id, status) {
            tracing::error!(backend = %backend.label(), error = %e, "Failed to apply health verdict");
        }

        match verdict {
            HealthVerdict::Healthy => tracing::debug!(
                backend = %backend.label(),
                successes,
                window,
                "Backend healthy"
            ),
            HealthVerdict::Sick => tracing::warn!(
                backend = %backend.label(),
                successes,
                window,
                "Backend sick"
            ),
        }

        let event = HealthEvent {
            verdict,
            backend: self.pool.get(&backend.id).unwrap_or(backend),
            successes,
            window,
        };
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        event
    }
}

/// One probe. A panic, raised while building the future or while polling
/// it, becomes `ProbeError::Panicked`.
async fn ping_once(probe: &dyn Probe, backend: &Backend) -> Result<(), ProbeError> {
    let ping = catch_unwind(AssertUnwindSafe(|| probe.ping(backend))).map_err(|_| ProbeError::Panicked)?;
    AssertUnwindSafe(ping)
        .catch_unwind()
        .await
        .unwrap_or(Err(ProbeError::Panicked))
}

/// Handle to a running monitor. Dropping it also stops the monitor.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: Arc<Shutdown>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the monitor to stop. No round starts after this returns.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_triggered()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Health monitor task ended abnormally");
        }
    }
}
