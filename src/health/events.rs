//! Health verdict notifications.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::load_balancer::Backend;

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Sick,
}

/// One verdict for one backend in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEvent {
    pub verdict: HealthVerdict,
    /// State of the backend right after the verdict was applied.
    pub backend: Backend,
    /// Successful probes in this round.
    pub successes: usize,
    /// Probes sent in this round.
    pub window: usize,
}

impl HealthEvent {
    pub fn is_healthy(&self) -> bool {
        self.verdict == HealthVerdict::Healthy
    }
}

/// Sender side of a health event channel.
pub fn channel() -> broadcast::Sender<HealthEvent> {
    let (tx, _) = broadcast::channel(EVENT_CAPACITY);
    tx
}
