//! Backend pool management.
//!
//! # Responsibilities
//! - Own the canonical list of backends (fixed at construction)
//! - Derive the availability view whenever status or weight changes
//! - Provide the selection primitives the strategies are built on
//!
//! # Design Decisions
//! - The view is rebuilt synchronously under a mutation lock and published
//!   through `ArcSwap`, so a selection never observes a view older than the
//!   last mutation that returned
//! - Backup members are only part of the view while no non-backup member is
//!   enabled

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::load_balancer::backend::{Backend, BackendConfig, BackendId, Member, Status};
use crate::observability::metrics;

/// Errors reported by pool construction and mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("backend list is empty")]
    Empty,

    #[error("backend #{index} is invalid: {reason}")]
    InvalidBackend { index: usize, reason: &'static str },

    #[error("unknown backend id {0}")]
    UnknownBackend(BackendId),

    #[error("weight must be at least 1")]
    InvalidWeight,

    #[error("connection count of backend {0} would drop below zero")]
    ConnectionUnderflow(BackendId),
}

/// Members eligible for selection right now, with the weights they had when
/// the view was built.
#[derive(Debug, Default)]
pub struct AvailabilityView {
    entries: Vec<(Arc<Member>, u32)>,
    total_weight: usize,
}

impl AvailabilityView {
    fn build(members: &[Arc<Member>]) -> Self {
        let enabled = |m: &&Arc<Member>| m.status() == Status::Enabled;

        let mut selected: Vec<&Arc<Member>> =
            members.iter().filter(enabled).filter(|m| !m.is_backup()).collect();
        if selected.is_empty() {
            selected = members.iter().filter(enabled).collect();
        }

        let entries: Vec<(Arc<Member>, u32)> = selected
            .into_iter()
            .map(|m| (m.clone(), m.weight()))
            .collect();
        let total_weight = entries.iter().map(|(_, w)| *w as usize).sum();

        Self {
            entries,
            total_weight,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_weight(&self) -> usize {
        self.total_weight
    }

    fn contains(&self, id: &BackendId) -> bool {
        self.entries.iter().any(|(m, _)| m.id == *id)
    }
}

/// Canonical store of backends and their derived availability.
#[derive(Debug)]
pub struct ServerPool {
    members: Vec<Arc<Member>>,
    view: ArcSwap<AvailabilityView>,
    /// Round-robin cursor, kept in `[0, total_weight)`.
    cursor: AtomicUsize,
    /// Serializes mutate-then-rebuild sequences.
    mutation: Mutex<()>,
}

impl ServerPool {
    /// Build a pool, assigning every backend a fresh id.
    pub fn new(configs: Vec<BackendConfig>) -> Result<Self, PoolError> {
        if configs.is_empty() {
            return Err(PoolError::Empty);
        }
        for (index, config) in configs.iter().enumerate() {
            if let Some(reason) = config.problem() {
                return Err(PoolError::InvalidBackend { index, reason });
            }
        }

        let members: Vec<Arc<Member>> = configs
            .into_iter()
            .map(|config| Arc::new(Member::new(config)))
            .collect();
        let view = AvailabilityView::build(&members);

        tracing::debug!(
            backends = members.len(),
            available = view.len(),
            total_weight = view.total_weight(),
            "Server pool created"
        );

        Ok(Self {
            members,
            view: ArcSwap::from_pointee(view),
            cursor: AtomicUsize::new(0),
            mutation: Mutex::new(()),
        })
    }

    /// Snapshot of the availability view, in construction order.
    pub fn available(&self) -> Vec<Backend> {
        self.view.load().entries.iter().map(|(m, _)| m.snapshot()).collect()
    }

    /// Snapshot of every member, in construction order.
    pub fn all(&self) -> Vec<Backend> {
        self.members.iter().map(|m| m.snapshot()).collect()
    }

    /// Snapshot of one member.
    pub fn get(&self, id: &BackendId) -> Option<Backend> {
        self.find(id).map(|m| m.snapshot())
    }

    /// Snapshot of `id` if it is currently in the availability view.
    pub fn get_available(&self, id: &BackendId) -> Option<Backend> {
        let view = self.view.load();
        view.entries
            .iter()
            .find(|(m, _)| m.id == *id)
            .map(|(m, _)| m.snapshot())
    }

    pub fn is_available(&self, id: &BackendId) -> bool {
        self.view.load().contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Sum of weights in the current availability view.
    pub fn total_weight(&self) -> usize {
        self.view.load().total_weight()
    }

    /// Weighted round-robin over the availability view.
    pub fn select_round_robin(&self) -> Option<Backend> {
        let view = self.view.load();
        let total = view.total_weight();
        if view.is_empty() || total == 0 {
            return None;
        }

        // fetch_update only fails when the closure returns None.
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c % total + 1) % total))
            .unwrap_or_else(|c| c);
        let index = previous % total;

        let mut cumulative = 0usize;
        for (member, weight) in view.entries.iter() {
            cumulative += *weight as usize;
            if index < cumulative {
                return Some(member.snapshot());
            }
        }
        None
    }

    /// `view[n mod len]`. Basis of the hash strategies.
    pub fn select_by_index(&self, n: usize) -> Option<Backend> {
        let view = self.view.load();
        if view.is_empty() {
            return None;
        }
        let (member, _) = &view.entries[n % view.len()];
        Some(member.snapshot())
    }

    /// Member with the fewest in-flight connections; left-most wins ties.
    pub fn select_least_connections(&self) -> Option<Backend> {
        let view = self.view.load();
        let mut best: Option<(&Arc<Member>, usize)> = None;
        for (member, _) in view.entries.iter() {
            let count = member.connection_count();
            match best {
                Some((_, min)) if count >= min => {}
                _ => best = Some((member, count)),
            }
        }
        best.map(|(m, _)| m.snapshot())
    }

    /// Change the status of `id` and rebuild the availability view.
    pub fn set_status(&self, id: &BackendId, status: Status) -> Result<(), PoolError> {
        let member = self.find(id).ok_or_else(|| {
            tracing::warn!(backend = %id, "set_status for unknown backend");
            PoolError::UnknownBackend(*id)
        })?;

        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = member.store_status(status);
        self.rebuild();

        if previous != status {
            tracing::info!(
                backend = %id,
                from = ?previous,
                to = ?status,
                available = self.view.load().len(),
                "Backend status changed"
            );
        }
        metrics::record_backend_health(&member.snapshot().label(), status == Status::Enabled);
        Ok(())
    }

    pub fn enable(&self, id: &BackendId) -> Result<(), PoolError> {
        self.set_status(id, Status::Enabled)
    }

    pub fn disable(&self, id: &BackendId) -> Result<(), PoolError> {
        self.set_status(id, Status::Disabled)
    }

    /// Change the round-robin weight of `id` and rebuild the availability view.
    pub fn set_weight(&self, id: &BackendId, weight: u32) -> Result<(), PoolError> {
        if weight == 0 {
            return Err(PoolError::InvalidWeight);
        }
        let member = self.find(id).ok_or(PoolError::UnknownBackend(*id))?;

        let _guard = self.mutation.lock().unwrap_or_else(PoisonError::into_inner);
        member.store_weight(weight);
        self.rebuild();

        tracing::info!(backend = %id, weight, "Backend weight changed");
        Ok(())
    }

    /// Add `delta` to the connection count of `id`, returning the new count.
    ///
    /// A decrement that would go below zero is refused and leaves the count
    /// unchanged.
    pub fn adjust_connection_count(&self, id: &BackendId, delta: isize) -> Result<usize, PoolError> {
        let member = self.find(id).ok_or_else(|| {
            tracing::warn!(backend = %id, delta, "adjust_connection_count for unknown backend");
            PoolError::UnknownBackend(*id)
        })?;

        match member.adjust_connections(delta) {
            Some(count) => {
                metrics::record_connections(&member.snapshot().label(), count);
                Ok(count)
            }
            None => {
                tracing::warn!(
                    backend = %id,
                    delta,
                    current = member.connection_count(),
                    "Unmatched connection release"
                );
                Err(PoolError::ConnectionUnderflow(*id))
            }
        }
    }

    fn find(&self, id: &BackendId) -> Option<&Arc<Member>> {
        self.members.iter().find(|m| m.id == *id)
    }

    /// Caller must hold `mutation`.
    fn rebuild(&self) {
        let view = AvailabilityView::build(&self.members);
        let total = view.total_weight();
        self.view.store(Arc::new(view));
        if total > 0 {
            // Keep the cursor inside the new cycle; `% total` at selection
            // time covers any racing increment.
            let _ = self
                .cursor
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some(c % total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> BackendConfig {
        BackendConfig::host(format!("{}.example.com", name)).with_name(name)
    }

    fn names(backends: &[Backend]) -> Vec<String> {
        backends.iter().map(|b| b.name.clone().unwrap_or_default()).collect()
    }

    fn pick_rr(pool: &ServerPool, n: usize) -> Vec<String> {
        (0..n)
            .map(|_| pool.select_round_robin().unwrap().name.unwrap())
            .collect()
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert_eq!(ServerPool::new(vec![]).unwrap_err(), PoolError::Empty);
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let err = ServerPool::new(vec![named("a"), named("b").with_weight(0)]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidBackend { index: 1, .. }));

        let err = ServerPool::new(vec![named("a").with_protocol("ftp")]).unwrap_err();
        assert!(matches!(err, PoolError::InvalidBackend { index: 0, .. }));
    }

    #[test]
    fn test_ids_are_unique() {
        let pool = ServerPool::new(vec![named("a"), named("b"), named("c")]).unwrap();
        let mut ids: Vec<BackendId> = pool.all().iter().map(|b| b.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_round_robin_equal_weights() {
        let pool = ServerPool::new(vec![named("a"), named("b"), named("c")]).unwrap();
        assert_eq!(pick_rr(&pool, 6), ["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn test_round_robin_weighted() {
        let pool = ServerPool::new(vec![named("a").with_weight(2), named("b")]).unwrap();
        assert_eq!(pick_rr(&pool, 6), ["a", "a", "b", "a", "a", "b"]);
    }

    #[test]
    fn test_round_robin_cycle_shrinks_on_disable() {
        let pool = ServerPool::new(vec![named("a").with_weight(2), named("b")]).unwrap();
        let a = pool.all()[0].id;

        assert_eq!(pick_rr(&pool, 2), ["a", "a"]);
        pool.disable(&a).unwrap();
        assert_eq!(pool.total_weight(), 1);
        assert_eq!(pick_rr(&pool, 3), ["b", "b", "b"]);
    }

    #[test]
    fn test_round_robin_after_reenable() {
        let pool = ServerPool::new(vec![named("a").with_weight(2), named("b")]).unwrap();
        let a = pool.all()[0].id;
        pool.disable(&a).unwrap();

        assert_eq!(pick_rr(&pool, 2), ["b", "b"]);
        pool.enable(&a).unwrap();
        // Cursor wrapped to 0 inside the one-slot cycle.
        assert_eq!(pick_rr(&pool, 3), ["a", "a", "b"]);
    }

    #[test]
    fn test_select_by_index() {
        let pool = ServerPool::new(vec![named("a"), named("b")]).unwrap();
        assert_eq!(pool.select_by_index(1).unwrap().name.as_deref(), Some("b"));
        assert_eq!(pool.select_by_index(2).unwrap().name.as_deref(), Some("a"));

        let b = pool.all()[1].id;
        pool.disable(&b).unwrap();
        assert_eq!(pool.select_by_index(1).unwrap().name.as_deref(), Some("a"));
    }

    #[test]
    fn test_least_connections_ties_go_left() {
        let pool = ServerPool::new(vec![named("a"), named("b"), named("c")]).unwrap();
        let ids: Vec<BackendId> = pool.all().iter().map(|b| b.id).collect();

        assert_eq!(pool.select_least_connections().unwrap().id, ids[0]);

        pool.adjust_connection_count(&ids[0], 1).unwrap();
        assert_eq!(pool.select_least_connections().unwrap().id, ids[1]);

        pool.adjust_connection_count(&ids[1], 2).unwrap();
        pool.adjust_connection_count(&ids[2], 1).unwrap();
        // a=1, b=2, c=1
        assert_eq!(pool.select_least_connections().unwrap().id, ids[0]);

        pool.adjust_connection_count(&ids[1], -2).unwrap();
        assert_eq!(pool.select_least_connections().unwrap().id, ids[1]);
    }

    #[test]
    fn test_backup_promotion() {
        let pool = ServerPool::new(vec![named("backup").with_backup(true), named("primary")]).unwrap();
        let backup = pool.all()[0].id;
        let primary = pool.all()[1].id;

        assert_eq!(names(&pool.available()), ["primary"]);
        assert_eq!(pick_rr(&pool, 2), ["primary", "primary"]);
        assert!(!pool.is_available(&backup));

        pool.disable(&primary).unwrap();
        assert_eq!(names(&pool.available()), ["backup"]);
        assert_eq!(pick_rr(&pool, 2), ["backup", "backup"]);
        assert!(pool.is_available(&backup));
        assert!(!pool.is_available(&primary));

        pool.enable(&primary).unwrap();
        assert_eq!(names(&pool.available()), ["primary"]);
        assert!(pool.is_available(&primary));
    }

    #[test]
    fn test_all_disabled_yields_nothing() {
        let pool = ServerPool::new(vec![named("a"), named("b").with_status(Status::Disabled)]).unwrap();
        let a = pool.all()[0].id;
        pool.disable(&a).unwrap();

        assert!(pool.available().is_empty());
        assert!(pool.select_round_robin().is_none());
        assert!(pool.select_by_index(7).is_none());
        assert!(pool.select_least_connections().is_none());
    }

    #[test]
    fn test_unknown_id_is_non_fatal() {
        let pool = ServerPool::new(vec![named("a")]).unwrap();
        let other = ServerPool::new(vec![named("x")]).unwrap().all()[0].id;

        assert_eq!(pool.disable(&other), Err(PoolError::UnknownBackend(other)));
        assert_eq!(pool.adjust_connection_count(&other, 1), Err(PoolError::UnknownBackend(other)));
        assert_eq!(pool.available().len(), 1);
    }

    #[test]
    fn test_unmatched_decrement_is_refused() {
        let pool = ServerPool::new(vec![named("a")]).unwrap();
        let a = pool.all()[0].id;

        assert_eq!(pool.adjust_connection_count(&a, -1), Err(PoolError::ConnectionUnderflow(a)));
        assert_eq!(pool.get(&a).unwrap().connection_count, 0);
    }

    #[test]
    fn test_set_weight_rebuilds_view() {
        let pool = ServerPool::new(vec![named("a"), named("b")]).unwrap();
        let a = pool.all()[0].id;

        pool.set_weight(&a, 3).unwrap();
        assert_eq!(pool.total_weight(), 4);
        assert_eq!(pool.set_weight(&a, 0), Err(PoolError::InvalidWeight));
        assert_eq!(pick_rr(&pool, 4), ["a", "a", "a", "b"]);
    }

    #[test]
    fn test_snapshots_are_detached() {
        let pool = ServerPool::new(vec![named("a")]).unwrap();
        let mut snapshot = pool.available();
        snapshot[0].status = Status::Disabled;
        snapshot[0].connection_count = 42;

        let live = pool.get(&snapshot[0].id).unwrap();
        assert_eq!(live.status, Status::Enabled);
        assert_eq!(live.connection_count, 0);
    }
}
