//! Weighted round-robin strategy.

use crate::load_balancer::{Backend, RoutingContext, SelectionStrategy, ServerPool};

/// Round-robin selector.
/// The rotation cursor lives in the pool so it shrinks with the view.
#[derive(Debug, Default)]
pub struct RoundRobin;

impl RoundRobin {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for RoundRobin {
    fn next_server(&self, pool: &ServerPool, _ctx: &RoutingContext<'_>) -> Option<Backend> {
        pool.select_round_robin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::BackendConfig;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let pool = ServerPool::new(vec![
            BackendConfig::ip("127.0.0.1".parse().unwrap()).with_port(8080),
            BackendConfig::ip("127.0.0.1".parse().unwrap()).with_port(8081),
        ])
        .unwrap();
        let ctx = RoutingContext::new("/");

        let s1 = lb.next_server(&pool, &ctx).unwrap();
        assert_eq!(s1.port, Some(8080));

        let s2 = lb.next_server(&pool, &ctx).unwrap();
        assert_eq!(s2.port, Some(8081));

        let s3 = lb.next_server(&pool, &ctx).unwrap();
        assert_eq!(s3.port, Some(8080));
    }
}
