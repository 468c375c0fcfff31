//! Backend selection.
//!
//! Picks one eligible backend of a routing group: lowest load first, ties
//! broken by a per-group round-robin cursor. Groups without an eligible
//! backend fall back to the registry's default group, except on retries,
//! which stay inside the group that failed.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::load_balancer::backend::Backend;
use crate::load_balancer::registry::BackendRegistry;

/// Errors returned by [`BackendSelector`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// Neither the requested group nor the default group has an active,
    /// healthy backend.
    #[error("no healthy backend in routing group '{0}'")]
    NoHealthyBackend(String),
}

/// Load-aware backend selector.
#[derive(Debug)]
pub struct BackendSelector {
    registry: Arc<BackendRegistry>,
    /// Round-robin cursor per routing group.
    cursors: DashMap<String, AtomicUsize>,
}

impl BackendSelector {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            cursors: DashMap::new(),
        }
    }

    /// Select a backend for the given group.
    pub fn select(&self, group: &str) -> Result<Arc<Backend>, SelectError> {
        self.select_excluding(group, &[])
    }

    /// Select a backend for the given group, skipping the named backends.
    pub fn select_excluding(
        &self,
        group: &str,
        excluded: &[&str],
    ) -> Result<Arc<Backend>, SelectError> {
        self.pick(group, excluded, true)
    }

    /// Select a backend of exactly `group`, skipping the named backends.
    /// Never falls back to the default group.
    pub fn select_in_group_excluding(
        &self,
        group: &str,
        excluded: &[&str],
    ) -> Result<Arc<Backend>, SelectError> {
        self.pick(group, excluded, false)
    }

    fn pick(
        &self,
        group: &str,
        excluded: &[&str],
        allow_fallback: bool,
    ) -> Result<Arc<Backend>, SelectError> {
        let snapshot = self.registry.snapshot();
        let eligible = |g: &str| -> Vec<Arc<Backend>> {
            snapshot
                .group(g)
                .iter()
                .filter(|b| b.is_eligible() && !excluded.contains(&b.name.as_str()))
                .cloned()
                .collect()
        };

        let mut used_group = group;
        let mut candidates = eligible(group);
        let default_group = self.registry.default_group();
        if candidates.is_empty() && allow_fallback && group != default_group {
            tracing::debug!(
                group = %group,
                default_group = %default_group,
                "No eligible backend in group, falling back to default group"
            );
            used_group = default_group;
            candidates = eligible(default_group);
        }

        let Some(min_load) = candidates.iter().map(|b| b.load).min() else {
            tracing::debug!(
                group = %group,
                backend_count = snapshot.group(group).len(),
                "No healthy backends found in group"
            );
            return Err(SelectError::NoHealthyBackend(group.to_string()));
        };
        candidates.retain(|b| b.load == min_load);

        let index = self.next_index(used_group, candidates.len());
        Ok(candidates.swap_remove(index))
    }

    /// Advance the group's cursor and map it into `0..len`.
    fn next_index(&self, group: &str, len: usize) -> usize {
        if len == 1 {
            return 0;
        }
        let cursor = match self.cursors.get(group) {
            Some(c) => c.fetch_add(1, Ordering::Relaxed),
            None => self
                .cursors
                .entry(group.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        cursor % len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::HealthState;
    use url::Url;

    fn backend(name: &str, group: &str, load: u64) -> Backend {
        let mut b = Backend::new(name, Url::parse("http://localhost:8080").unwrap(), group);
        b.load = load;
        b
    }

    fn selector(backends: Vec<Backend>) -> (Arc<BackendRegistry>, BackendSelector) {
        let registry = Arc::new(BackendRegistry::with_backends("adhoc", backends));
        (registry.clone(), BackendSelector::new(registry))
    }

    #[test]
    fn picks_lowest_load() {
        let (_, selector) = selector(vec![backend("a", "adhoc", 1), backend("b", "adhoc", 5)]);
        for _ in 0..5 {
            assert_eq!(selector.select("adhoc").unwrap().name, "a");
        }
    }

    #[test]
    fn equal_load_rotates() {
        let (_, selector) = selector(vec![
            backend("a", "adhoc", 2),
            backend("b", "adhoc", 2),
            backend("c", "adhoc", 9),
        ]);
        let picks: Vec<_> = (0..4)
            .map(|_| selector.select("adhoc").unwrap().name.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn skips_inactive_and_unhealthy() {
        let (registry, selector) = selector(vec![
            backend("a", "adhoc", 0),
            backend("b", "adhoc", 3),
            backend("c", "adhoc", 4),
        ]);
        registry.set_health("a", HealthState::Unhealthy);
        registry.set_active("b", false);
        assert_eq!(selector.select("adhoc").unwrap().name, "c");
    }

    #[test]
    fn falls_back_to_default_group() {
        let (registry, selector) = selector(vec![
            backend("a", "adhoc", 0),
            backend("s", "scheduled", 0),
        ]);
        assert_eq!(selector.select("scheduled").unwrap().name, "s");
        assert_eq!(selector.select("etl").unwrap().name, "a");

        registry.mark_health("s", false);
        assert_eq!(selector.select("scheduled").unwrap().name, "a");
    }

    #[test]
    fn no_healthy_backend() {
        let (registry, selector) = selector(vec![backend("a", "adhoc", 0)]);
        registry.mark_health("a", false);
        assert_eq!(
            selector.select("adhoc").unwrap_err(),
            SelectError::NoHealthyBackend("adhoc".into())
        );
        assert_eq!(
            selector.select("scheduled").unwrap_err(),
            SelectError::NoHealthyBackend("scheduled".into())
        );
    }

    #[test]
    fn excluded_backends_are_skipped() {
        let (_, selector) = selector(vec![backend("a", "adhoc", 0), backend("b", "adhoc", 9)]);
        assert_eq!(selector.select_excluding("adhoc", &["a"]).unwrap().name, "b");
        assert!(selector.select_excluding("adhoc", &["a", "b"]).is_err());
    }

    #[test]
    fn in_group_selection_never_leaves_the_group() {
        let (_, selector) = selector(vec![
            backend("a", "adhoc", 0),
            backend("s1", "scheduled", 0),
            backend("s2", "scheduled", 4),
        ]);
        assert_eq!(
            selector.select_in_group_excluding("scheduled", &["s1"]).unwrap().name,
            "s2"
        );
        assert_eq!(
            selector
                .select_in_group_excluding("scheduled", &["s1", "s2"])
                .unwrap_err(),
            SelectError::NoHealthyBackend("scheduled".into())
        );
        // The fallback variant would have answered with the default group.
        assert_eq!(selector.select_excluding("scheduled", &["s1", "s2"]).unwrap().name, "a");
    }

    #[test]
    fn same_state_gives_same_choice() {
        let backends = || vec![backend("a", "adhoc", 1), backend("b", "adhoc", 1)];
        let (_, first) = selector(backends());
        let (_, second) = selector(backends());
        for _ in 0..6 {
            assert_eq!(
                first.select("adhoc").unwrap().name,
                second.select("adhoc").unwrap().name
            );
        }
    }

    #[test]
    fn concurrent_selection_spreads_evenly() {
        let (_, selector) = selector(vec![backend("a", "adhoc", 0), backend("b", "adhoc", 0)]);
        let selector = Arc::new(selector);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let selector = selector.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| selector.select("adhoc").unwrap().name == "a")
                        .count()
                })
            })
            .collect();
        let a_hits: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(a_hits, 200);
    }
}
