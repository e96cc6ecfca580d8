//! Least Connections load balancing strategy.

use crate::load_balancer::{Backend, RoutingContext, SelectionStrategy, ServerPool};

/// Least connections selector.
/// Selects the backend with the minimum number of in-flight connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for LeastConnections {
    fn next_server(&self, pool: &ServerPool, _ctx: &RoutingContext<'_>) -> Option<Backend> {
        // In case of tie, the first one is selected (stability)
        pool.select_least_connections()
    }

    fn tracks_connections(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::BackendConfig;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let pool = ServerPool::new(vec![
            BackendConfig::ip("127.0.0.1".parse().unwrap()).with_port(8080),
            BackendConfig::ip("127.0.0.1".parse().unwrap()).with_port(8081),
        ])
        .unwrap();
        let ids: Vec<_> = pool.all().into_iter().map(|b| b.id).collect();
        let ctx = RoutingContext::new("/");

        // artificially increase connections on b1
        pool.adjust_connection_count(&ids[0], 1).unwrap();

        // Should pick b2 (0 connections)
        let s1 = lb.next_server(&pool, &ctx).unwrap();
        assert_eq!(s1.id, ids[1]);

        // now b2 has 2, b1 has 1
        pool.adjust_connection_count(&ids[1], 2).unwrap();

        let s2 = lb.next_server(&pool, &ctx).unwrap();
        assert_eq!(s2.id, ids[0]);
        assert!(lb.tracks_connections());
    }
}
