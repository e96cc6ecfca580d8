//! Outgoing request integration.
//!
//! The balancer never performs I/O for a request. It only needs to read and
//! rewrite the target URL, set a header, and learn when the request is over.
//! Any HTTP client's request type can take part by implementing
//! [`OutgoingRequest`].

use std::fmt;

use crate::load_balancer::Backend;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    Completed,
    Failed,
}

/// Invoked on every terminal event the transport reports.
pub type TerminalCallback = Box<dyn Fn(TerminalEvent) + Send + Sync>;

pub trait OutgoingRequest {
    fn url(&self) -> &str;

    fn set_url(&mut self, url: String);

    fn set_header(&mut self, name: &str, value: &str);

    /// Register a callback for the request's terminal events. Transports may
    /// report more than one (for example a response followed by an error).
    fn on_terminal(&mut self, callback: TerminalCallback);
}

/// Outcome of [`Balancer::dispatch`](crate::balancer::Balancer::dispatch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// URL was not pool-relative; the request was left untouched.
    Passthrough,
    /// URL rewritten to this backend.
    Routed(Backend),
}

impl Dispatch {
    pub fn backend(&self) -> Option<&Backend> {
        match self {
            Dispatch::Passthrough => None,
            Dispatch::Routed(backend) => Some(backend),
        }
    }
}

/// A pool-relative URL starts with `/`; anything else is passed through.
pub fn is_pool_relative(url: &str) -> bool {
    url.starts_with('/')
}

/// In-memory request, for driving the balancer without a transport.
#[derive(Default)]
pub struct SimulatedRequest {
    url: String,
    headers: Vec<(String, String)>,
    callbacks: Vec<TerminalCallback>,
}

impl SimulatedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Last value set for `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Report a terminal event to every registered callback.
    pub fn finish(&self, event: TerminalEvent) {
        for callback in &self.callbacks {
            callback(event);
        }
    }
}

impl fmt::Debug for SimulatedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedRequest")
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl OutgoingRequest for SimulatedRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn set_url(&mut self, url: String) {
        self.url = url;
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn on_terminal(&mut self, callback: TerminalCallback) {
        self.callbacks.push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pool_relative() {
        assert!(is_pool_relative("/users?id=1"));
        assert!(!is_pool_relative("http://example.com/users"));
        assert!(!is_pool_relative(""));
    }

    #[test]
    fn test_simulated_request() {
        let mut request = SimulatedRequest::new("/a");
        request.set_header("Host", "one");
        request.set_header("host", "two");
        assert_eq!(request.header("HOST"), Some("two"));

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        request.on_terminal(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        request.finish(TerminalEvent::Completed);
        request.finish(TerminalEvent::Failed);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
