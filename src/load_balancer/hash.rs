//! Hash-based strategies: `url` and `url-path`.
//!
//! The routing key is hashed to an integer and mapped onto the availability
//! view with `ServerPool::select_by_index`, so the same key lands on the same
//! backend for as long as pool membership is unchanged.

use ahash::RandomState;

use crate::load_balancer::{Backend, RoutingContext, SelectionStrategy, ServerPool};

// Fixed seeds: the mapping must not change between calls.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Deterministic hash of a routing key.
pub fn hash_key(key: &str) -> u64 {
    RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3]).hash_one(key)
}

/// Which part of the URL is hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKey {
    /// Path and query.
    Url,
    /// Path only.
    Path,
}

/// Hash selector.
#[derive(Debug)]
pub struct UrlHash {
    key: HashKey,
}

impl UrlHash {
    pub fn full_url() -> Self {
        Self { key: HashKey::Url }
    }

    pub fn path_only() -> Self {
        Self { key: HashKey::Path }
    }

    fn index_for(&self, ctx: &RoutingContext<'_>) -> usize {
        let hash = match self.key {
            HashKey::Url => hash_key(ctx.url),
            HashKey::Path => hash_key(ctx.path()),
        };
        hash as usize
    }
}

impl SelectionStrategy for UrlHash {
    fn next_server(&self, pool: &ServerPool, ctx: &RoutingContext<'_>) -> Option<Backend> {
        pool.select_by_index(self.index_for(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::BackendConfig;

    fn pool(n: usize) -> ServerPool {
        ServerPool::new(
            (0..n)
                .map(|i| BackendConfig::host(format!("s{}.example.com", i)))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_key("/users/1"), hash_key("/users/1"));
        assert_ne!(hash_key("/users/1"), hash_key("/users/2"));
    }

    #[test]
    fn test_url_hash_is_deterministic() {
        let pool = pool(5);
        let lb = UrlHash::full_url();
        let ctx = RoutingContext::new("/users/1?expand=true");

        let first = lb.next_server(&pool, &ctx).unwrap();
        for _ in 0..20 {
            assert_eq!(lb.next_server(&pool, &ctx).unwrap().id, first.id);
        }
    }

    #[test]
    fn test_path_hash_ignores_query() {
        let pool = pool(5);
        let lb = UrlHash::path_only();

        let a = lb.next_server(&pool, &RoutingContext::new("/users/1?page=1")).unwrap();
        let b = lb.next_server(&pool, &RoutingContext::new("/users/1?page=2")).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_path_key_is_not_normalized() {
        let key = |url| hash_key(RoutingContext::new(url).path());
        assert_ne!(key("/a/../b"), key("/b"));
        assert_ne!(key("//evil/x"), key("/x"));
        assert_ne!(key("/ä b"), key("/%C3%A4%20b"));
    }

    #[test]
    fn test_hash_follows_availability() {
        let pool = pool(3);
        let lb = UrlHash::full_url();
        let ctx = RoutingContext::new("/x");

        let chosen = lb.next_server(&pool, &ctx).unwrap();
        pool.disable(&chosen.id).unwrap();
        let next = lb.next_server(&pool, &ctx).unwrap();
        assert_ne!(next.id, chosen.id);
    }
}
