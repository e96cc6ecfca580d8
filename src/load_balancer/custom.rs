//! Closure-backed strategies.
//!
//! A custom strategy sees every pool member (construction order, current
//! status included) plus the routing context, and returns one element of
//! that list. The pick is re-resolved by id against the live pool and only
//! honoured while the backend is in the availability view.

use std::fmt;

use crate::load_balancer::{Backend, RoutingContext, SelectionStrategy, ServerPool};

/// Signature of a user-supplied selection function.
pub type CustomFn =
    dyn for<'a> Fn(&'a [Backend], &RoutingContext<'_>) -> Option<&'a Backend> + Send + Sync;

pub struct CustomStrategy {
    select: Box<CustomFn>,
}

impl CustomStrategy {
    pub fn new<F>(select: F) -> Self
    where
        F: for<'a> Fn(&'a [Backend], &RoutingContext<'_>) -> Option<&'a Backend>
            + Send
            + Sync
            + 'static,
    {
        Self {
            select: Box::new(select),
        }
    }
}

impl fmt::Debug for CustomStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomStrategy").finish_non_exhaustive()
    }
}

impl SelectionStrategy for CustomStrategy {
    fn next_server(&self, pool: &ServerPool, ctx: &RoutingContext<'_>) -> Option<Backend> {
        let all = pool.all();
        let picked = (self.select)(&all, ctx)?;

        let resolved = pool.get_available(&picked.id);
        if resolved.is_none() {
            tracing::debug!(
                backend = %picked.id,
                url = ctx.url,
                "Custom strategy picked a backend outside the availability view"
            );
        }
        resolved
    }
}
