//! Health probes.
//!
//! A probe answers one question about one backend: is it reachable right
//! now. Any `Fn(Backend) -> impl Future<Output = Result<(), ProbeError>>`
//! closure is a probe; `TcpProbe` and `HttpProbe` cover the usual cases.

use futures_util::future::BoxFuture;
use hyper::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use crate::load_balancer::Backend;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("backend has no usable address: {0}")]
    Address(String),

    #[error("probe panicked")]
    Panicked,

    #[error("{0}")]
    Other(String),
}

/// Single reachability check against one backend.
pub trait Probe: Send + Sync + 'static {
    fn ping(&self, backend: &Backend) -> BoxFuture<'static, Result<(), ProbeError>>;
}

impl<F, Fut> Probe for F
where
    F: Fn(Backend) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
{
    fn ping(&self, backend: &Backend) -> BoxFuture<'static, Result<(), ProbeError>> {
        Box::pin(self(backend.clone()))
    }
}

/// Healthy when a TCP connection can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Probe for TcpProbe {
    fn ping(&self, backend: &Backend) -> BoxFuture<'static, Result<(), ProbeError>> {
        let timeout = self.timeout;
        let port = backend.effective_port();
        let host = match (backend.ip, backend.host.as_deref()) {
            (Some(ip), _) => Some(ip.to_string()),
            (None, Some(host)) => Some(host.to_string()),
            (None, None) => None,
        };
        let label = backend.label();

        Box::pin(async move {
            let host = host.ok_or(ProbeError::Address(label))?;
            match time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
                Ok(Ok(_stream)) => Ok(()),
                Ok(Err(e)) => Err(ProbeError::Connect(e)),
                Err(_) => Err(ProbeError::Timeout(timeout)),
            }
        })
    }
}

/// Healthy when `GET {path}` answers with a 2xx status.
///
/// Plain HTTP only; `https` backends fail this probe.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, String>,
    path: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        Self {
            client,
            path,
            timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl std::fmt::Debug for HttpProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProbe")
            .field("path", &self.path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Probe for HttpProbe {
    fn ping(&self, backend: &Backend) -> BoxFuture<'static, Result<(), ProbeError>> {
        let client = self.client.clone();
        let timeout = self.timeout;
        let uri = backend.target_url(&self.path);

        let mut builder = Request::builder()
            .method("GET")
            .uri(uri)
            .header("user-agent", "upstream-balancer-health-check");
        if let Some(host) = backend.host_header() {
            builder = builder.header("host", host);
        }
        let request = builder.body(String::new());

        Box::pin(async move {
            let request = request.map_err(|e| ProbeError::Address(e.to_string()))?;

            match time::timeout(timeout, client.request(request)).await {
                Ok(Ok(response)) if response.status().is_success() => Ok(()),
                Ok(Ok(response)) => Err(ProbeError::Status(response.status().as_u16())),
                Ok(Err(e)) => Err(ProbeError::Request(e.to_string())),
                Err(_) => Err(ProbeError::Timeout(timeout)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{BackendConfig, ServerPool};
    use tokio::net::TcpListener;

    fn backend_at(port: u16) -> Backend {
        let pool = ServerPool::new(vec![BackendConfig::ip("127.0.0.1".parse().unwrap()).with_port(port)]).unwrap();
        pool.all().remove(0)
    }

    #[tokio::test]
    async fn test_closure_is_probe() {
        let probe = |backend: Backend| async move {
            if backend.port == Some(1) {
                Ok(())
            } else {
                Err(ProbeError::Other("down".into()))
            }
        };

        assert!(probe.ping(&backend_at(1)).await.is_ok());
        assert!(probe.ping(&backend_at(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::default();
        assert!(probe.ping(&backend_at(port)).await.is_ok());

        drop(listener);
        assert!(probe.ping(&backend_at(port)).await.is_err());
    }

    #[test]
    fn test_http_probe_path_normalized() {
        assert_eq!(HttpProbe::new("ping", DEFAULT_TIMEOUT).path(), "/ping");
        assert_eq!(HttpProbe::new("/health", DEFAULT_TIMEOUT).path(), "/health");
    }
}
