//! Backend registry.
//!
//! # Responsibilities
//! - Hold every known backend and its routing-group membership
//! - Apply registration, health, activation and load updates
//! - Hand out consistent snapshots to the selector and dispatcher
//!
//! # Design Decisions
//! - Each write builds a new immutable `RegistrySnapshot` and installs it
//!   with `ArcSwap::rcu`; readers never lock and never see a torn record
//! - Backends are kept sorted by name so per-group arrays are deterministic
//! - The generation counter increases on every applied write

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::load_balancer::backend::{Backend, HealthState};

/// Immutable view of the registry at one point in time.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    generation: u64,
    backends: Vec<Arc<Backend>>,
    by_group: HashMap<String, Arc<[Arc<Backend>]>>,
}

impl RegistrySnapshot {
    fn build(generation: u64, mut backends: Vec<Arc<Backend>>) -> Self {
        backends.sort_by(|a, b| a.name.cmp(&b.name));

        let mut groups: HashMap<String, Vec<Arc<Backend>>> = HashMap::new();
        for backend in &backends {
            groups
                .entry(backend.routing_group.clone())
                .or_default()
                .push(backend.clone());
        }
        let by_group = groups
            .into_iter()
            .map(|(group, members)| (group, Arc::from(members)))
            .collect();

        Self {
            generation,
            backends,
            by_group,
        }
    }

    /// Write counter of the registry when this snapshot was taken.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// All backends, sorted by name.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Backends of one routing group, sorted by name.
    pub fn group(&self, group: &str) -> &[Arc<Backend>] {
        self.by_group.get(group).map(|g| &g[..]).unwrap_or(&[])
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends
            .binary_search_by(|b| b.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.backends[i])
    }

    /// Routing groups that currently have at least one backend.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.by_group.keys().map(String::as_str)
    }
}

/// Registry of backend clusters.
#[derive(Debug)]
pub struct BackendRegistry {
    default_group: String,
    snapshot: ArcSwap<RegistrySnapshot>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new(default_group: impl Into<String>) -> Self {
        Self {
            default_group: default_group.into(),
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
        }
    }

    /// Create a registry seeded with the given backends.
    pub fn with_backends(default_group: impl Into<String>, backends: Vec<Backend>) -> Self {
        let registry = Self::new(default_group);
        for backend in backends {
            registry.upsert(backend);
        }
        registry
    }

    /// Group used when a request's group has no eligible backend.
    pub fn default_group(&self) -> &str {
        &self.default_group
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Backends of a routing group.
    pub fn list_by_group(&self, group: &str) -> Vec<Arc<Backend>> {
        self.snapshot.load().group(group).to_vec()
    }

    /// Return a list of all backends.
    pub fn all(&self) -> Vec<Arc<Backend>> {
        self.snapshot.load().backends().to_vec()
    }

    /// Look up a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Backend>> {
        self.snapshot.load().get(name).cloned()
    }

    /// Register a backend, replacing any backend with the same name.
    ///
    /// Health and load of an existing record are kept when the new record
    /// still has the defaults, so re-registering a cluster does not reset
    /// what the health monitor learned about it.
    pub fn upsert(&self, backend: Backend) {
        tracing::info!(
            backend = %backend.name,
            group = %backend.routing_group,
            url = %backend.proxy_to,
            active = backend.active,
            "Registering backend"
        );
        self.snapshot.rcu(|current| {
            let mut next: Vec<Arc<Backend>> = Vec::with_capacity(current.backends.len() + 1);
            let mut record = backend.clone();
            for existing in current.backends() {
                if existing.name == record.name {
                    if record.health == HealthState::Unknown {
                        record.health = existing.health;
                    }
                    if record.load == 0 {
                        record.load = existing.load;
                    }
                } else {
                    next.push(existing.clone());
                }
            }
            next.push(Arc::new(record));
            RegistrySnapshot::build(current.generation + 1, next)
        });
    }

    /// Remove a backend. Returns false if it was not registered.
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.modify(name, |_| None);
        if removed {
            tracing::info!(backend = %name, "Backend removed");
        }
        removed
    }

    /// Record the outcome of a health probe or a failed dispatch.
    pub fn mark_health(&self, name: &str, healthy: bool) -> bool {
        self.set_health(name, HealthState::from_healthy(healthy))
    }

    /// Set the health state of a backend.
    pub fn set_health(&self, name: &str, health: HealthState) -> bool {
        if let Some(b) = self.get(name) {
            if b.health != health {
                tracing::info!(backend = %name, from = ?b.health, to = ?health, "Backend health changed");
            }
        }
        self.update_field(name, |b| b.health = health)
    }

    /// Activate or deactivate a backend.
    pub fn set_active(&self, name: &str, active: bool) -> bool {
        tracing::info!(backend = %name, active, "Setting backend activation");
        self.update_field(name, |b| b.active = active)
    }

    /// Update the load metric of a backend.
    pub fn update_load(&self, name: &str, load: u64) -> bool {
        self.update_field(name, |b| b.load = load)
    }

    /// Apply `f` to the named record. No new snapshot is installed when
    /// `f` leaves the record unchanged.
    fn update_field<F>(&self, name: &str, f: F) -> bool
    where
        F: Fn(&mut Backend),
    {
        let Some(existing) = self.get(name) else {
            return false;
        };
        let mut probe = Backend::clone(&existing);
        f(&mut probe);
        if probe == *existing {
            return true;
        }
        self.modify(name, |current| {
            let mut record = current.clone();
            f(&mut record);
            Some(record)
        })
    }

    /// Replace (or drop, when `f` returns None) the named record in a new
    /// snapshot. Returns false if the backend is not registered.
    fn modify<F>(&self, name: &str, f: F) -> bool
    where
        F: Fn(&Backend) -> Option<Backend>,
    {
        let mut found = false;
        self.snapshot.rcu(|current| {
            found = false;
            let mut next = Vec::with_capacity(current.backends.len());
            for existing in current.backends() {
                if existing.name == name {
                    found = true;
                    if let Some(updated) = f(existing) {
                        next.push(Arc::new(updated));
                    }
                } else {
                    next.push(existing.clone());
                }
            }
            let generation = if found {
                current.generation + 1
            } else {
                current.generation
            };
            RegistrySnapshot::build(generation, next)
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn backend(name: &str, group: &str) -> Backend {
        Backend::new(name, Url::parse("http://localhost:8080").unwrap(), group)
    }

    #[test]
    fn groups_backends_by_routing_group() {
        let registry = BackendRegistry::with_backends(
            "adhoc",
            vec![
                backend("trino2", "adhoc"),
                backend("trino1", "adhoc"),
                backend("trino3", "scheduled"),
            ],
        );

        let adhoc: Vec<_> = registry
            .list_by_group("adhoc")
            .iter()
            .map(|b| b.name.clone())
            .collect();
        assert_eq!(adhoc, vec!["trino1", "trino2"]);
        assert_eq!(registry.list_by_group("scheduled").len(), 1);
        assert!(registry.list_by_group("etl").is_empty());
    }

    #[test]
    fn upsert_moves_backend_between_groups() {
        let registry = BackendRegistry::with_backends("adhoc", vec![backend("trino1", "adhoc")]);
        registry.upsert(backend("trino1", "scheduled"));

        assert!(registry.list_by_group("adhoc").is_empty());
        assert_eq!(registry.list_by_group("scheduled").len(), 1);
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn upsert_keeps_learned_health() {
        let registry = BackendRegistry::with_backends("adhoc", vec![backend("trino1", "adhoc")]);
        registry.mark_health("trino1", false);
        registry.upsert(backend("trino1", "adhoc"));

        assert_eq!(registry.get("trino1").unwrap().health, HealthState::Unhealthy);
    }

    #[test]
    fn health_activation_and_load_updates() {
        let registry = BackendRegistry::with_backends("adhoc", vec![backend("trino1", "adhoc")]);
        let before = registry.snapshot();

        assert!(registry.mark_health("trino1", false));
        assert!(registry.set_active("trino1", false));
        assert!(registry.update_load("trino1", 7));
        assert!(!registry.mark_health("missing", true));

        let b = registry.get("trino1").unwrap();
        assert_eq!(b.health, HealthState::Unhealthy);
        assert!(!b.active);
        assert_eq!(b.load, 7);

        // Old snapshots are untouched.
        let old = before.get("trino1").unwrap();
        assert_eq!(old.health, HealthState::Unknown);
        assert!(old.active);
        assert!(registry.snapshot().generation() > before.generation());
    }

    #[test]
    fn unchanged_update_keeps_generation() {
        let registry = BackendRegistry::with_backends("adhoc", vec![backend("trino1", "adhoc")]);
        let generation = registry.snapshot().generation();
        assert!(registry.update_load("trino1", 0));
        assert_eq!(registry.snapshot().generation(), generation);
    }

    #[test]
    fn remove_backend() {
        let registry = BackendRegistry::with_backends("adhoc", vec![backend("trino1", "adhoc")]);
        assert!(registry.remove("trino1"));
        assert!(!registry.remove("trino1"));
        assert!(registry.get("trino1").is_none());
        assert_eq!(registry.snapshot().groups().count(), 0);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let registry = Arc::new(BackendRegistry::new("adhoc"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        registry.upsert(backend(&format!("trino-{}-{}", t, i), "adhoc"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.all().len(), 200);
    }
}
