//! First-available strategy.

use crate::load_balancer::{Backend, RoutingContext, SelectionStrategy, ServerPool};

/// Always picks the first backend of the availability view.
#[derive(Debug, Default)]
pub struct FirstAvailable;

impl SelectionStrategy for FirstAvailable {
    fn next_server(&self, pool: &ServerPool, _ctx: &RoutingContext<'_>) -> Option<Backend> {
        pool.select_by_index(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::BackendConfig;

    #[test]
    fn test_first_available() {
        let pool = ServerPool::new(vec![BackendConfig::host("a"), BackendConfig::host("b")]).unwrap();
        let ctx = RoutingContext::new("/");
        let a = pool.all()[0].id;

        assert_eq!(FirstAvailable.next_server(&pool, &ctx).unwrap().id, a);
        assert_eq!(FirstAvailable.next_server(&pool, &ctx).unwrap().id, a);

        pool.disable(&a).unwrap();
        assert_eq!(FirstAvailable.next_server(&pool, &ctx).unwrap().host.as_deref(), Some("b"));
    }
}
