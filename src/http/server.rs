//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the gateway's subsystems from configuration
//! - Create the Axum Router: proxy catch-all plus the admin API
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve plain HTTP on a listener, or HTTPS via rustls with optional
//!   client certificate verification
//! - Run facts providers on each request before routing
//! - Spawn the health monitor alongside the server

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::affinity::QueryAffinityTracker;
use crate::config::GatewayConfig;
use crate::health::HealthMonitor;
use crate::http::dispatcher::{build_backend_client, Dispatcher};
use crate::http::request::{request_id, MakeGatewayRequestId, RequestContext};
use crate::lifecycle::signalled;
use crate::load_balancer::{Backend, BackendRegistry};
use crate::net::tls::{ClientIdentityAcceptor, Keystore, TlsConnection, TlsError};
use crate::observability::{metrics, MetricsObserver, RoutingObserver};
use crate::routing::{resolver_from_config, ConnectionFacts, FactsProvider};

/// Time in-flight requests get to finish once shutdown starts on the TLS
/// listener.
const TLS_DRAIN_SECS: u64 = 30;

/// Errors raised while assembling the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("backend {name} has an invalid proxy_to: {source}")]
    InvalidBackend {
        name: String,
        #[source]
        source: url::ParseError,
    },

    #[error("forward_keystore requires request_router.keystore_path")]
    MissingKeystore,

    #[error(transparent)]
    Keystore(#[from] TlsError),

    #[error("failed to build backend client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<BackendRegistry>,
    pub facts: Arc<Vec<Arc<dyn FactsProvider>>>,
    pub max_body_bytes: usize,
    pub admin_api_key: Option<String>,
}

/// Pluggable parts of the request path.
#[derive(Debug, Clone)]
pub struct Collaborators {
    /// Receives every routing decision.
    pub observer: Arc<dyn RoutingObserver>,
    /// Fill request attributes before routing, in order.
    pub facts: Vec<Arc<dyn FactsProvider>>,
}

impl Collaborators {
    /// Logs-and-metrics observer and the connection facts.
    pub fn for_config(config: &GatewayConfig) -> Self {
        Self {
            observer: Arc::new(MetricsObserver::new(config.request_router.name.clone())),
            facts: vec![Arc::new(ConnectionFacts)],
        }
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    registry: Arc<BackendRegistry>,
    affinity: Arc<QueryAffinityTracker>,
    client: reqwest::Client,
}

impl GatewayServer {
    /// Create a server that reports routing decisions as logs and metrics.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let collaborators = Collaborators::for_config(&config);
        Self::with_collaborators(config, collaborators)
    }

    /// Create a server that reports routing decisions to `observer`.
    pub fn with_observer(
        config: GatewayConfig,
        observer: Arc<dyn RoutingObserver>,
    ) -> Result<Self, ServerError> {
        let collaborators = Collaborators {
            observer,
            ..Collaborators::for_config(&config)
        };
        Self::with_collaborators(config, collaborators)
    }

    /// Create a server with the given observer and facts providers.
    pub fn with_collaborators(
        config: GatewayConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ServerError> {
        let backends = config
            .backends
            .iter()
            .map(|c| {
                Backend::from_config(c, &config.routing.default_group).map_err(|source| ServerError::InvalidBackend {
                    name: c.name.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let registry = Arc::new(BackendRegistry::with_backends(
            config.routing.default_group.clone(),
            backends,
        ));

        let resolver = resolver_from_config(&config.routing);
        let affinity = Arc::new(QueryAffinityTracker::new(config.request_router.history_size));

        let router_config = &config.request_router;
        let identity = if router_config.forward_keystore {
            let path = router_config
                .keystore_path
                .as_deref()
                .ok_or(ServerError::MissingKeystore)?;
            let keystore = Keystore::load(Path::new(path), router_config.keystore_pass.as_deref())?;
            Some(keystore.client_identity()?)
        } else {
            None
        };
        let client = build_backend_client(&config.timeouts, identity)?;

        let dispatcher = Dispatcher::new(
            registry.clone(),
            resolver,
            affinity.clone(),
            client.clone(),
            collaborators.observer,
        )
        .with_request_timeout(Duration::from_secs(config.timeouts.request_secs))
        .with_forwarded_identity(router_config.forward_keystore);

        let state = AppState {
            dispatcher: Arc::new(dispatcher),
            registry: registry.clone(),
            facts: Arc::new(collaborators.facts),
            max_body_bytes: config.limits.max_body_bytes,
            admin_api_key: config.admin.api_key.clone(),
        };

        tracing::info!(
            gateway = %config.request_router.name,
            backends = config.backends.len(),
            default_group = %config.routing.default_group,
            rules_engine = config.routing.rules_engine_enabled,
            history_size = config.request_router.history_size,
            "Gateway initialised"
        );

        let router = Self::build_router(&config, state);
        Ok(Self {
            router,
            config,
            registry,
            affinity,
            client,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler));
        if config.admin.enabled {
            router = router.nest("/gateway/backend", setup_admin_router(state.clone()));
        }

        // A request may be forwarded twice, each bounded by request_secs.
        let overall = Duration::from_secs(config.timeouts.request_secs.saturating_mul(2) + 5);

        router.with_state(state).layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeGatewayRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(overall)),
        )
    }

    /// Run the server, accepting plain HTTP connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        self.spawn_health_monitor(shutdown.resubscribe());

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signalled(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS. Requests carry a [`TlsConnection`] with the
    /// client's verified identity, if any.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        self.spawn_health_monitor(shutdown.resubscribe());

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            signalled(shutdown).await;
            drain.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
        });

        axum_server::bind(addr)
            .acceptor(ClientIdentityAcceptor::new(tls))
            .handle(handle)
            .serve(self.router.into_make_service_with_connect_info::<SocketAddr>())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    fn spawn_health_monitor(&self, shutdown: broadcast::Receiver<()>) {
        if !self.config.health_check.enabled {
            return;
        }
        let monitor = HealthMonitor::new(
            self.registry.clone(),
            self.config.health_check.clone(),
            self.client.clone(),
        );
        tokio::spawn(monitor.run(shutdown));
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn affinity(&self) -> &Arc<QueryAffinityTracker> {
        &self.affinity
    }
}

/// Main proxy handler.
/// Buffers the body, builds the routing facts and hands off to the dispatcher.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let request_id = request_id(request.headers());
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = request
        .extensions()
        .get::<TlsConnection>()
        .and_then(|tls| tls.client_identity.clone());

    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let mut attributes = HashMap::new();
    for provider in state.facts.iter() {
        provider.collect(&parts, &mut attributes);
    }

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %parts.uri.path(),
        "Proxying request"
    );

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to buffer request body");
            metrics::record_request(&method, 413, "none", start);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut ctx = RequestContext::new(
        parts.method,
        parts.uri.path(),
        parts.uri.query().map(str::to_string),
        parts.headers,
    )
    .with_body(body);
    ctx.attributes = attributes;
    if let Some(addr) = client_addr {
        ctx = ctx.with_client_addr(addr);
    }

    match state.dispatcher.dispatch(&request_id, &ctx, identity.as_ref()).await {
        Ok(routed) => {
            metrics::record_request(&method, routed.response.status().as_u16(), &routed.backend, start);
            routed.response
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Dispatch failed");
            metrics::record_request(&method, e.status().as_u16(), "none", start);
            e.into_response()
        }
    }
}
