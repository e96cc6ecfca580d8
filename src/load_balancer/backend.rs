//! Backend abstraction.
//!
//! # Responsibilities
//! - Describe a single pool member (addressing, weight, backup flag)
//! - Hold the live status and in-flight connection count as atomics
//! - Hand out read-only `Backend` snapshots; live state never leaves the pool

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::load_balancer::pool::ServerPool;

/// Opaque backend identifier, assigned by the pool at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(Uuid);

impl BackendId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Administrative status of a backend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Enabled = 0,
    Disabled = 1,
}

impl From<u8> for Status {
    fn from(val: u8) -> Self {
        match val {
            1 => Status::Disabled,
            _ => Status::Enabled,
        }
    }
}

/// Pool construction input for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Display name, used only for logs.
    #[serde(default)]
    pub name: Option<String>,

    /// Logical hostname. Sent as the `Host` header when `ip` is also set.
    #[serde(default)]
    pub host: Option<String>,

    /// Address to connect to instead of resolving `host`.
    #[serde(default)]
    pub ip: Option<IpAddr>,

    #[serde(default)]
    pub port: Option<u16>,

    /// URL scheme, `http` when absent.
    #[serde(default)]
    pub protocol: Option<String>,

    /// Relative share of round-robin selections.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Only eligible while no non-backup backend is enabled.
    #[serde(default)]
    pub backup: bool,

    #[serde(default)]
    pub status: Status,
}

fn default_weight() -> u32 {
    1
}

impl BackendConfig {
    /// Backend addressed by hostname.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::empty()
        }
    }

    /// Backend addressed by IP.
    pub fn ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Self::empty()
        }
    }

    fn empty() -> Self {
        Self {
            name: None,
            host: None,
            ip: None,
            port: None,
            protocol: None,
            weight: default_weight(),
            backup: false,
            status: Status::Enabled,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Reason this config cannot address a backend, if any.
    pub(crate) fn problem(&self) -> Option<&'static str> {
        let host_usable = self.host.as_deref().is_some_and(|h| !h.trim().is_empty());
        if !host_usable && self.ip.is_none() {
            return Some("backend needs a host or an ip");
        }
        if self.weight == 0 {
            return Some("weight must be at least 1");
        }
        if self.protocol.as_deref().is_some_and(|p| !is_supported_protocol(p)) {
            return Some("protocol must be http or https");
        }
        if self.port == Some(0) {
            return Some("port must not be 0");
        }
        None
    }
}

/// Schemes a backend may be addressed with.
pub fn is_supported_protocol(protocol: &str) -> bool {
    matches!(protocol, "http" | "https")
}

/// Read-only snapshot of a pool member.
///
/// Selection and inspection calls return these; mutating a snapshot has no
/// effect on the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Backend {
    pub id: BackendId,
    pub name: Option<String>,
    pub host: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub weight: u32,
    pub backup: bool,
    pub status: Status,
    pub connection_count: usize,
}

impl Backend {
    /// Scheme used to reach this backend.
    pub fn scheme(&self) -> &str {
        self.protocol.as_deref().unwrap_or("http")
    }

    /// Host part of the target address: the ip when set, otherwise the host.
    pub fn address_host(&self) -> String {
        match (self.ip, self.host.as_deref()) {
            (Some(IpAddr::V6(v6)), _) => format!("[{}]", v6),
            (Some(ip), _) => ip.to_string(),
            (None, Some(host)) => host.to_string(),
            (None, None) => String::new(),
        }
    }

    /// `scheme://ip-or-host[:port]`, without a trailing slash.
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme(), self.address_host(), port),
            None => format!("{}://{}", self.scheme(), self.address_host()),
        }
    }

    /// Target URL for a pool-relative `path`.
    pub fn target_url(&self, path: &str) -> String {
        format!("{}{}", self.origin(), path)
    }

    /// Hostname to send in the `Host` header, only when routing by ip.
    pub fn host_header(&self) -> Option<&str> {
        match (self.ip, self.host.as_deref()) {
            (Some(_), Some(host)) => Some(host),
            _ => None,
        }
    }

    /// Port to connect to, falling back to the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.scheme() == "https" { 443 } else { 80 })
    }

    pub fn is_enabled(&self) -> bool {
        self.status == Status::Enabled
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => match self.port {
                Some(port) => format!("{}:{}", self.address_host(), port),
                None => self.address_host(),
            },
        }
    }
}

/// Live pool member. Owned by the `ServerPool`.
#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) id: BackendId,
    config: BackendConfig,
    weight: AtomicU32,
    status: AtomicU8,
    connections: AtomicUsize,
}

impl Member {
    pub(crate) fn new(config: BackendConfig) -> Self {
        Self {
            id: BackendId::generate(),
            weight: AtomicU32::new(config.weight),
            status: AtomicU8::new(config.status as u8),
            connections: AtomicUsize::new(0),
            config,
        }
    }

    pub(crate) fn status(&self) -> Status {
        Status::from(self.status.load(Ordering::Acquire))
    }

    /// Store a new status, returning the previous one.
    pub(crate) fn store_status(&self, status: Status) -> Status {
        Status::from(self.status.swap(status as u8, Ordering::AcqRel))
    }

    pub(crate) fn weight(&self) -> u32 {
        self.weight.load(Ordering::Acquire)
    }

    pub(crate) fn store_weight(&self, weight: u32) {
        self.weight.store(weight, Ordering::Release);
    }

    pub(crate) fn is_backup(&self) -> bool {
        self.config.backup
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Add `delta` to the connection count. `None` if it would drop below zero.
    pub(crate) fn adjust_connections(&self, delta: isize) -> Option<usize> {
        self.connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add_signed(delta)
            })
            .ok()
            .and_then(|previous| previous.checked_add_signed(delta))
    }

    pub(crate) fn snapshot(&self) -> Backend {
        Backend {
            id: self.id,
            name: self.config.name.clone(),
            host: self.config.host.clone(),
            ip: self.config.ip,
            port: self.config.port,
            protocol: self.config.protocol.clone(),
            weight: self.weight(),
            backup: self.config.backup,
            status: self.status(),
            connection_count: self.connection_count(),
        }
    }
}

/// Releases one in-flight connection on the backend exactly once.
///
/// Released explicitly via [`ConnectionGuard::release`] (first call wins)
/// or implicitly on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    pool: Arc<ServerPool>,
    id: BackendId,
    released: AtomicBool,
}

impl ConnectionGuard {
    /// Increment the connection count of `id` and return a guard for it.
    pub fn acquire(pool: Arc<ServerPool>, id: BackendId) -> Result<Self, crate::load_balancer::PoolError> {
        pool.adjust_connection_count(&id, 1)?;
        Ok(Self {
            pool,
            id,
            released: AtomicBool::new(false),
        })
    }

    pub fn backend_id(&self) -> BackendId {
        self.id
    }

    /// Decrement the connection count. Returns false if already released.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.pool.adjust_connection_count(&self.id, -1) {
            tracing::warn!(backend = %self.id, error = %e, "Failed to release connection");
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
