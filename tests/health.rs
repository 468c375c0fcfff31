//! Active health monitor against live and dead backends.

use std::sync::Arc;

use trino_gateway::config::{HealthCheckConfig, TimeoutConfig};
use trino_gateway::health::HealthMonitor;
use trino_gateway::http::build_backend_client;
use trino_gateway::load_balancer::{Backend, BackendRegistry, HealthState};
use url::Url;

mod common;

use common::{closed_port, start_loaded_backend};

fn monitor(registry: Arc<BackendRegistry>, unhealthy_threshold: u32) -> HealthMonitor {
    let config = HealthCheckConfig {
        timeout_secs: 2,
        unhealthy_threshold,
        healthy_threshold: 2,
        ..HealthCheckConfig::default()
    };
    let client = build_backend_client(&TimeoutConfig::default(), None).unwrap();
    HealthMonitor::new(registry, config, client)
}

#[tokio::test]
async fn probe_updates_health_and_load() {
    let live = start_loaded_backend("trino-live", 7).await;
    let dead = closed_port().await;
    let registry = Arc::new(BackendRegistry::with_backends(
        "adhoc",
        vec![
            Backend::new("trino-live", Url::parse(&live.url()).unwrap(), "adhoc"),
            Backend::new("trino-dead", Url::parse(&format!("http://{}", dead)).unwrap(), "adhoc"),
        ],
    ));

    let mut monitor = monitor(registry.clone(), 3);
    monitor.check_all().await;

    let live = registry.get("trino-live").unwrap();
    assert_eq!(live.health, HealthState::Healthy);
    assert_eq!(live.load, 7);
    assert_eq!(registry.get("trino-dead").unwrap().health, HealthState::Unhealthy);
}

#[tokio::test]
async fn recovery_needs_consecutive_successes() {
    let live = start_loaded_backend("trino-1", 0).await;
    let registry = Arc::new(BackendRegistry::with_backends(
        "adhoc",
        vec![Backend::new("trino-1", Url::parse(&live.url()).unwrap(), "adhoc")],
    ));
    // As if a dispatch had failed against it.
    registry.mark_health("trino-1", false);

    let mut monitor = monitor(registry.clone(), 3);
    monitor.check_all().await;
    assert_eq!(registry.get("trino-1").unwrap().health, HealthState::Unhealthy);
    monitor.check_all().await;
    assert_eq!(registry.get("trino-1").unwrap().health, HealthState::Healthy);
}

#[tokio::test]
async fn monitor_stops_on_shutdown() {
    let registry = Arc::new(BackendRegistry::new("adhoc"));
    let shutdown = trino_gateway::Shutdown::new();
    let handle = tokio::spawn(monitor(registry, 3).run(shutdown.subscribe()));
    shutdown.trigger();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
