//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend
//! - Update backend health in the registry through the hysteresis tracker
//! - Update backend load from the probe's `runningQueries`

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::state::HealthTracker;
use crate::load_balancer::{Backend, BackendRegistry};
use crate::observability::metrics;

/// Outcome of probing one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub healthy: bool,
    pub running_queries: Option<u64>,
}

pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    config: HealthCheckConfig,
    client: reqwest::Client,
    tracker: HealthTracker,
}

impl HealthMonitor {
    pub fn new(registry: Arc<BackendRegistry>, config: HealthCheckConfig, client: reqwest::Client) -> Self {
        let tracker = HealthTracker::new(config.healthy_threshold, config.unhealthy_threshold);
        Self {
            registry,
            config,
            client,
            tracker,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every registered backend once.
    pub async fn check_all(&mut self) {
        let snapshot = self.registry.snapshot();
        self.tracker
            .retain(snapshot.backends().iter().map(|b| b.name.as_str()));

        for backend in snapshot.backends() {
            let probe = self.probe(backend).await;

            if let Some(load) = probe.running_queries {
                self.registry.update_load(&backend.name, load);
            }

            let current = self
                .registry
                .get(&backend.name)
                .map(|b| b.health)
                .unwrap_or(backend.health);
            if let Some(next) = self.tracker.observe(&backend.name, current, probe.healthy) {
                self.registry.set_health(&backend.name, next);
            }
            metrics::record_backend_health(&backend.name, probe.healthy);
        }
    }

    async fn probe(&self, backend: &Backend) -> ProbeResult {
        let url = backend.url_for(&self.config.path, None);
        let request = self
            .client
            .get(url)
            .header("user-agent", "trino-gateway-health-check")
            .timeout(Duration::from_secs(self.config.timeout_secs));

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(backend = %backend.name, "Health check failed: timeout");
                return ProbeResult::failed();
            }
            Err(e) => {
                tracing::warn!(backend = %backend.name, error = %e, "Health check failed: connection error");
                return ProbeResult::failed();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(backend = %backend.name, status = %response.status(), "Health check failed: non-success status");
            return ProbeResult::failed();
        }

        let running_queries = match response.bytes().await {
            Ok(body) => running_queries(&body),
            Err(e) => {
                tracing::debug!(backend = %backend.name, error = %e, "Health check body unreadable");
                None
            }
        };

        ProbeResult {
            healthy: true,
            running_queries,
        }
    }
}

impl ProbeResult {
    fn failed() -> Self {
        Self {
            healthy: false,
            running_queries: None,
        }
    }
}

/// `runningQueries` from a JSON probe body, if present.
fn running_queries(body: &[u8]) -> Option<u64> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("runningQueries")?
        .as_u64()
}
