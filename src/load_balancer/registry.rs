//! Strategy registry.
//!
//! Maps strategy names to implementations. Built-ins are registered up
//! front; user strategies are added under their own names and may shadow a
//! built-in.

use dashmap::DashMap;
use std::sync::Arc;

use crate::load_balancer::custom::CustomStrategy;
use crate::load_balancer::first::FirstAvailable;
use crate::load_balancer::hash::UrlHash;
use crate::load_balancer::least_conn::LeastConnections;
use crate::load_balancer::round_robin::RoundRobin;
use crate::load_balancer::{Backend, RoutingContext, SelectionStrategy};

pub const ROUND_ROBIN: &str = "round-robin";
pub const FIRST: &str = "first";
pub const URL: &str = "url";
pub const URL_PATH: &str = "url-path";
pub const LEAST_CONN: &str = "leastconn";

/// Names of the strategies every registry starts with.
pub const BUILTIN: [&str; 5] = [ROUND_ROBIN, FIRST, URL, URL_PATH, LEAST_CONN];

pub struct StrategyRegistry {
    strategies: DashMap<String, Arc<dyn SelectionStrategy>>,
}

impl StrategyRegistry {
    /// Registry holding only the built-in strategies.
    pub fn with_builtins() -> Self {
        let strategies: DashMap<String, Arc<dyn SelectionStrategy>> = DashMap::new();
        strategies.insert(ROUND_ROBIN.to_string(), Arc::new(RoundRobin::new()));
        strategies.insert(FIRST.to_string(), Arc::new(FirstAvailable));
        strategies.insert(URL.to_string(), Arc::new(UrlHash::full_url()));
        strategies.insert(URL_PATH.to_string(), Arc::new(UrlHash::path_only()));
        strategies.insert(LEAST_CONN.to_string(), Arc::new(LeastConnections::new()));
        Self { strategies }
    }

    /// Register `strategy` under `name`, returning whatever it replaced.
    pub fn register(
        &self,
        name: impl Into<String>,
        strategy: Arc<dyn SelectionStrategy>,
    ) -> Option<Arc<dyn SelectionStrategy>> {
        let name = name.into();
        let previous = self.strategies.insert(name.clone(), strategy);
        if previous.is_some() {
            tracing::info!(strategy = %name, "Strategy replaced");
        } else {
            tracing::debug!(strategy = %name, "Strategy registered");
        }
        previous
    }

    /// Register a closure-backed strategy.
    pub fn register_fn<F>(&self, name: impl Into<String>, select: F) -> Option<Arc<dyn SelectionStrategy>>
    where
        F: for<'a> Fn(&'a [Backend], &RoutingContext<'_>) -> Option<&'a Backend>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(CustomStrategy::new(select)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SelectionStrategy>> {
        self.strategies.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{BackendConfig, ServerPool};

    #[test]
    fn test_builtins_present() {
        let registry = StrategyRegistry::with_builtins();
        for name in BUILTIN {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert!(!registry.contains("random"));
        assert!(registry.get(LEAST_CONN).unwrap().tracks_connections());
        assert!(!registry.get(ROUND_ROBIN).unwrap().tracks_connections());
    }

    #[test]
    fn test_register_custom() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.register_fn("last", |backends, _| backends.last()).is_none());

        let pool = ServerPool::new(vec![BackendConfig::host("a"), BackendConfig::host("b")]).unwrap();
        let chosen = registry
            .get("last")
            .unwrap()
            .next_server(&pool, &RoutingContext::new("/"))
            .unwrap();
        assert_eq!(chosen.host.as_deref(), Some("b"));
        assert_eq!(registry.names().len(), BUILTIN.len() + 1);
    }

    #[test]
    fn test_register_replaces() {
        let registry = StrategyRegistry::with_builtins();
        assert!(registry.register_fn(FIRST, |backends, _| backends.last()).is_some());
    }
}
