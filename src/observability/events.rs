//! Routing decision events.
//!
//! The dispatcher reports every routing decision to a [`RoutingObserver`]
//! handed to it at construction. [`MetricsObserver`] logs the decision and
//! feeds the metrics facade; tests plug in their own observer.

use std::fmt::Debug;
use std::time::Duration;

use crate::observability::metrics;

/// One routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEvent {
    pub request_id: String,
    /// Resolved routing group; `None` when the affinity store decided.
    pub group: Option<String>,
    pub backend: String,
    /// True when the backend came from the affinity store.
    pub affinity_hit: bool,
    pub query_id: Option<String>,
    pub status: u16,
    pub elapsed: Duration,
}

/// Receives routing decisions.
pub trait RoutingObserver: Send + Sync + Debug {
    fn routing_decision(&self, event: &RoutingEvent);
}

/// Logs routing decisions and records them as metrics.
#[derive(Debug, Clone)]
pub struct MetricsObserver {
    gateway: String,
}

impl MetricsObserver {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
        }
    }
}

impl RoutingObserver for MetricsObserver {
    fn routing_decision(&self, event: &RoutingEvent) {
        let group = event.group.as_deref().unwrap_or("-");
        tracing::info!(
            gateway = %self.gateway,
            request_id = %event.request_id,
            group = %group,
            backend = %event.backend,
            affinity = event.affinity_hit,
            query_id = ?event.query_id,
            status = event.status,
            elapsed_ms = event.elapsed.as_millis() as u64,
            "Routed request"
        );
        metrics::record_routing_decision(group, &event.backend, event.affinity_hit, event.elapsed);
    }
}
