//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use trino_gateway::affinity::QueryAffinityTracker;
use trino_gateway::config::{BackendConfig, GatewayConfig};
use trino_gateway::load_balancer::BackendRegistry;
use trino_gateway::observability::RoutingObserver;
use trino_gateway::http::Collaborators;
use trino_gateway::{GatewayServer, Shutdown};

/// Header the mock backends stamp on every response.
pub const SERVED_BY: &str = "x-backend";
const SERVED_BY_HEADER: HeaderName = HeaderName::from_static(SERVED_BY);

#[derive(Clone)]
struct MockState {
    name: &'static str,
    query_id: &'static str,
    running_queries: u64,
    delay: Duration,
    hits: Arc<AtomicUsize>,
}

/// A mock Trino coordinator listening on an ephemeral port.
pub struct MockBackend {
    pub name: &'static str,
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Statement and poll requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn config(&self, group: &str) -> BackendConfig {
        backend_config(self.name, &self.url(), group)
    }
}

/// Start a mock coordinator answering every submission with `query_id`.
pub async fn start_trino_backend(name: &'static str, query_id: &'static str) -> MockBackend {
    start_backend(name, query_id, 0, Duration::ZERO).await
}

/// Start a mock coordinator that waits `delay` before answering.
pub async fn start_slow_backend(name: &'static str, delay: Duration) -> MockBackend {
    start_backend(name, "slowQuery", 0, delay).await
}

/// Start a mock coordinator reporting `running_queries` on `/v1/info`.
pub async fn start_loaded_backend(name: &'static str, running_queries: u64) -> MockBackend {
    start_backend(name, "loadedQuery", running_queries, Duration::ZERO).await
}

async fn start_backend(
    name: &'static str,
    query_id: &'static str,
    running_queries: u64,
    delay: Duration,
) -> MockBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = MockState {
        name,
        query_id,
        running_queries,
        delay,
        hits: hits.clone(),
    };

    let app = Router::new()
        .route("/v1/statement", post(submit))
        .route("/v1/statement/{*rest}", get(poll).delete(poll))
        .route("/v1/info", get(info))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend { name, addr, hits }
}

async fn submit(State(state): State<MockState>, headers: HeaderMap) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.delay).await;
    let client_cert = headers
        .get("x-forwarded-client-cert")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (
        [(SERVED_BY, state.name)],
        Json(json!({
            "id": state.query_id,
            "clientCert": client_cert,
            "nextUri": format!("/v1/statement/queued/{}/y0d7d/1", state.query_id),
            "stats": { "state": "QUEUED" }
        })),
    )
}

async fn poll(State(state): State<MockState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.delay).await;
    (
        [(SERVED_BY, state.name)],
        Json(json!({ "id": state.query_id, "stats": { "state": "RUNNING" } })),
    )
}

async fn info(State(state): State<MockState>) -> impl IntoResponse {
    Json(json!({ "starting": false, "runningQueries": state.running_queries }))
}

/// Start a mock coordinator answering submissions with exactly `body`.
pub async fn start_literal_backend(name: &'static str, body: &'static str) -> MockBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/v1/statement",
        post(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                (
                    [(header::CONTENT_TYPE, "application/json"), (SERVED_BY_HEADER, name)],
                    body,
                )
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend { name, addr, hits }
}

/// Address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn backend_config(name: &str, url: &str, group: &str) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        proxy_to: url.to_string(),
        external_url: None,
        routing_group: Some(group.to_string()),
        active: true,
    }
}

/// Gateway config with active health checks off, so tests control health.
pub fn gateway_config(backends: Vec<BackendConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.backends = backends;
    config.health_check.enabled = false;
    config.timeouts.request_secs = 5;
    config
}

/// A running gateway on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub registry: Arc<BackendRegistry>,
    pub affinity: Arc<QueryAffinityTracker>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> TestGateway {
    launch(GatewayServer::new(config).unwrap()).await
}

pub async fn start_gateway_with_observer(
    config: GatewayConfig,
    observer: Arc<dyn RoutingObserver>,
) -> TestGateway {
    launch(GatewayServer::with_observer(config, observer).unwrap()).await
}

pub async fn start_gateway_with_collaborators(
    config: GatewayConfig,
    collaborators: Collaborators,
) -> TestGateway {
    launch(GatewayServer::with_collaborators(config, collaborators).unwrap()).await
}

async fn launch(server: GatewayServer) -> TestGateway {
    let registry = server.registry().clone();
    let affinity = server.affinity().clone();
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestGateway {
        addr,
        registry,
        affinity,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(20))
        .build()
        .unwrap()
}

/// `id` field of a JSON response body.
pub async fn query_id(response: reqwest::Response) -> String {
    let body: serde_json::Value = response.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}
