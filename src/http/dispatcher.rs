//! Request dispatch.
//!
//! # Responsibilities
//! - Pin follow-up requests of a query to the backend that owns it
//! - Resolve the routing group and select a backend for new work
//! - Forward the request with a deadline, retrying once on transport failure
//! - Record affinity for queries a backend accepted
//! - Report every routing decision to the observer
//!
//! # Data Flow
//! ```text
//! RequestContext
//!     → affinity lookup (query id) ──hit──────────────┐
//!     → resolver (group) → selector (backend)         │
//!     → forward ─transport failure─→ mark unhealthy   │
//!               → re-select once, forward again       │
//!     ← response ←────────────────────────────────────┘
//!     → affinity write (2xx only) → RoutingEvent
//! ```
//!
//! # Design Decisions
//! - The only suspension points are the outbound call and reading a
//!   statement submission's response; no lock is held across either
//! - Affinity wins over health: a query only exists on its backend, so a
//!   pinned request is never re-routed
//! - Responses stream through except statement submissions, which are
//!   buffered so the new query id can be read

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::affinity::QueryAffinityTracker;
use crate::config::TimeoutConfig;
use crate::http::request::{ClientIdentity, RequestContext};
use crate::http::response::{outbound_headers, relay, relay_buffered};
use crate::load_balancer::{Backend, BackendRegistry, BackendSelector, SelectError};
use crate::observability::{metrics, RoutingEvent, RoutingObserver};
use crate::routing::RoutingGroupResolver;

/// Where a dispatch currently stands.
///
/// `New → GroupResolved → BackendSelected → Forwarded → Completed`, with
/// `Failed` reachable from every non-terminal phase. Affinity hits go from
/// `New` straight to `BackendSelected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    New,
    GroupResolved,
    BackendSelected,
    Forwarded,
    Completed,
    Failed,
}

impl DispatchPhase {
    pub fn can_advance_to(self, next: DispatchPhase) -> bool {
        use DispatchPhase::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (New, GroupResolved | BackendSelected) => true,
            (GroupResolved, BackendSelected) => true,
            // A retry selects again after a failed forward.
            (BackendSelected, Forwarded) | (Forwarded, BackendSelected) => true,
            (Forwarded, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchPhase::Completed | DispatchPhase::Failed)
    }
}

/// Why a dispatch failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    NoHealthyBackend(#[from] SelectError),

    #[error("backend {backend} unreachable: {reason}")]
    BackendUnreachable {
        backend: String,
        reason: String,
        timed_out: bool,
    },

    #[error("failed to read response from backend {backend}: {reason}")]
    UpstreamBody { backend: String, reason: String },
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoHealthyBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::BackendUnreachable { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::BackendUnreachable { .. } | DispatchError::UpstreamBody { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// A response and the backend that produced it.
#[derive(Debug)]
pub struct Routed {
    pub backend: String,
    pub affinity_hit: bool,
    pub response: Response,
}

/// A forward that got no response.
#[derive(Debug)]
struct ForwardFailure {
    reason: String,
    timed_out: bool,
}

impl ForwardFailure {
    fn into_error(self, backend: &str) -> DispatchError {
        DispatchError::BackendUnreachable {
            backend: backend.to_string(),
            reason: self.reason,
            timed_out: self.timed_out,
        }
    }
}

/// Body of a statement submission response; only the id matters here.
#[derive(Deserialize)]
struct SubmittedQuery {
    id: String,
}

/// HTTP client used for all backend traffic.
///
/// Redirects are passed back to the client untouched. With an identity the
/// gateway authenticates itself to backends using its keystore.
pub fn build_backend_client(
    timeouts: &TimeoutConfig,
    identity: Option<reqwest::Identity>,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy();
    if let Some(identity) = identity {
        builder = builder.use_rustls_tls().identity(identity);
    }
    builder.build()
}

/// Routes requests to backends.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    selector: BackendSelector,
    resolver: Arc<dyn RoutingGroupResolver>,
    affinity: Arc<QueryAffinityTracker>,
    client: reqwest::Client,
    observer: Arc<dyn RoutingObserver>,
    request_timeout: Duration,
    forward_identity: bool,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<BackendRegistry>,
        resolver: Arc<dyn RoutingGroupResolver>,
        affinity: Arc<QueryAffinityTracker>,
        client: reqwest::Client,
        observer: Arc<dyn RoutingObserver>,
    ) -> Self {
        Self {
            selector: BackendSelector::new(registry.clone()),
            registry,
            resolver,
            affinity,
            client,
            observer,
            request_timeout: Duration::from_secs(TimeoutConfig::default().request_secs),
            forward_identity: false,
        }
    }

    /// Deadline for a single forward, body included.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Forward verified client identities to backends.
    pub fn with_forwarded_identity(mut self, enabled: bool) -> Self {
        self.forward_identity = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn affinity(&self) -> &Arc<QueryAffinityTracker> {
        &self.affinity
    }

    /// Route one request and return the backend's response.
    pub async fn dispatch(
        &self,
        request_id: &str,
        ctx: &RequestContext,
        identity: Option<&ClientIdentity>,
    ) -> Result<Routed, DispatchError> {
        let start = Instant::now();
        let mut phase = DispatchPhase::New;
        let identity = if self.forward_identity { identity } else { None };

        if let Some(backend) = self.pinned_backend(ctx) {
            advance(request_id, &mut phase, DispatchPhase::BackendSelected);
            tracing::debug!(
                request_id = %request_id,
                query_id = ?ctx.query_id,
                backend = %backend.name,
                "Routing by query affinity"
            );
            return match self.forward(&backend, ctx, identity).await {
                Ok(upstream) => {
                    advance(request_id, &mut phase, DispatchPhase::Forwarded);
                    let routed = self
                        .complete(request_id, ctx, &backend, None, true, upstream, start)
                        .await;
                    finish(request_id, &mut phase, &routed);
                    routed
                }
                Err(failure) => {
                    self.mark_unreachable(request_id, &backend, &failure);
                    advance(request_id, &mut phase, DispatchPhase::Failed);
                    let err = failure.into_error(&backend.name);
                    self.report_failure(request_id, ctx, &backend, None, true, &err, start);
                    Err(err)
                }
            };
        }

        let resolved = self.resolver.resolve_group(ctx);
        let group = resolved.unwrap_or_else(|| self.registry.default_group().to_string());
        advance(request_id, &mut phase, DispatchPhase::GroupResolved);

        let first = match self.selector.select(&group) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::warn!(request_id = %request_id, group = %group, error = %e, "No backend available");
                advance(request_id, &mut phase, DispatchPhase::Failed);
                return Err(e.into());
            }
        };
        advance(request_id, &mut phase, DispatchPhase::BackendSelected);

        let failure = match self.forward(&first, ctx, identity).await {
            Ok(upstream) => {
                advance(request_id, &mut phase, DispatchPhase::Forwarded);
                let routed = self
                    .complete(request_id, ctx, &first, Some(group), false, upstream, start)
                    .await;
                finish(request_id, &mut phase, &routed);
                return routed;
            }
            Err(failure) => failure,
        };
        self.mark_unreachable(request_id, &first, &failure);

        // The retry stays in the group of the backend that failed.
        let retry = match self
            .selector
            .select_in_group_excluding(&first.routing_group, &[first.name.as_str()])
        {
            Ok(backend) => backend,
            Err(_) => {
                advance(request_id, &mut phase, DispatchPhase::Failed);
                let err = failure.into_error(&first.name);
                self.report_failure(request_id, ctx, &first, Some(group), false, &err, start);
                return Err(err);
            }
        };
        advance(request_id, &mut phase, DispatchPhase::Forwarded);
        advance(request_id, &mut phase, DispatchPhase::BackendSelected);
        tracing::info!(
            request_id = %request_id,
            failed = %first.name,
            backend = %retry.name,
            "Retrying on another backend"
        );

        match self.forward(&retry, ctx, identity).await {
            Ok(upstream) => {
                advance(request_id, &mut phase, DispatchPhase::Forwarded);
                let routed = self
                    .complete(request_id, ctx, &retry, Some(group), false, upstream, start)
                    .await;
                finish(request_id, &mut phase, &routed);
                routed
            }
            Err(failure) => {
                self.mark_unreachable(request_id, &retry, &failure);
                advance(request_id, &mut phase, DispatchPhase::Failed);
                let err = failure.into_error(&retry.name);
                self.report_failure(request_id, ctx, &retry, Some(group), false, &err, start);
                Err(err)
            }
        }
    }

    /// Backend recorded for the request's query, if it is still registered.
    fn pinned_backend(&self, ctx: &RequestContext) -> Option<Arc<Backend>> {
        let query_id = ctx.query_id.as_deref()?;
        let entry = self.affinity.get(query_id)?;
        match self.registry.get(&entry.backend) {
            Some(backend) => Some(backend),
            None => {
                tracing::debug!(
                    query_id = %query_id,
                    backend = %entry.backend,
                    "Affinity backend no longer registered"
                );
                self.affinity.remove(query_id);
                None
            }
        }
    }

    async fn forward(
        &self,
        backend: &Backend,
        ctx: &RequestContext,
        identity: Option<&ClientIdentity>,
    ) -> Result<reqwest::Response, ForwardFailure> {
        let url = backend.url_for(&ctx.path, ctx.query.as_deref());
        let request = self
            .client
            .request(ctx.method.clone(), url)
            .headers(outbound_headers(&ctx.headers, identity))
            .body(ctx.body.clone())
            .timeout(self.request_timeout);

        match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ForwardFailure {
                timed_out: e.is_timeout(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ForwardFailure {
                reason: format!("no response within {:?}", self.request_timeout),
                timed_out: true,
            }),
        }
    }

    fn mark_unreachable(&self, request_id: &str, backend: &Backend, failure: &ForwardFailure) {
        tracing::warn!(
            request_id = %request_id,
            backend = %backend.name,
            timed_out = failure.timed_out,
            error = %failure.reason,
            "Backend unreachable, marking unhealthy"
        );
        self.registry.mark_health(&backend.name, false);
        metrics::record_failover(&backend.name);
        metrics::record_backend_health(&backend.name, false);
    }

    /// Report a dispatch that chose `backend` but got no usable response.
    #[allow(clippy::too_many_arguments)]
    fn report_failure(
        &self,
        request_id: &str,
        ctx: &RequestContext,
        backend: &Backend,
        group: Option<String>,
        affinity_hit: bool,
        err: &DispatchError,
        start: Instant,
    ) {
        self.observer.routing_decision(&RoutingEvent {
            request_id: request_id.to_string(),
            group,
            backend: backend.name.clone(),
            affinity_hit,
            query_id: ctx.query_id.clone(),
            status: err.status().as_u16(),
            elapsed: start.elapsed(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete(
        &self,
        request_id: &str,
        ctx: &RequestContext,
        backend: &Backend,
        group: Option<String>,
        affinity_hit: bool,
        upstream: reqwest::Response,
        start: Instant,
    ) -> Result<Routed, DispatchError> {
        let status = upstream.status();
        let mut query_id = ctx.query_id.clone();

        let response = if ctx.is_statement_submission() && status.is_success() {
            let headers = upstream.headers().clone();
            let body = match upstream.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    let err = DispatchError::UpstreamBody {
                        backend: backend.name.clone(),
                        reason: e.to_string(),
                    };
                    self.report_failure(request_id, ctx, backend, group, affinity_hit, &err, start);
                    return Err(err);
                }
            };
            match serde_json::from_slice::<SubmittedQuery>(&body) {
                Ok(submitted) if !submitted.id.is_empty() => query_id = Some(submitted.id),
                Ok(_) | Err(_) => {
                    tracing::debug!(request_id = %request_id, backend = %backend.name, "Submission response carries no query id")
                }
            }
            relay_buffered(status, &headers, body)
        } else {
            relay(upstream)
        };

        if !affinity_hit && status.is_success() {
            if let Some(id) = &query_id {
                self.affinity.put(id.clone(), backend.name.clone());
                metrics::record_affinity_size(self.affinity.len());
            }
        }

        self.observer.routing_decision(&RoutingEvent {
            request_id: request_id.to_string(),
            group,
            backend: backend.name.clone(),
            affinity_hit,
            query_id,
            status: status.as_u16(),
            elapsed: start.elapsed(),
        });

        Ok(Routed {
            backend: backend.name.clone(),
            affinity_hit,
            response,
        })
    }
}

fn advance(request_id: &str, phase: &mut DispatchPhase, next: DispatchPhase) {
    debug_assert!(phase.can_advance_to(next), "{:?} -> {:?}", phase, next);
    tracing::trace!(request_id = %request_id, from = ?phase, to = ?next, "Dispatch phase");
    *phase = next;
}

fn finish(request_id: &str, phase: &mut DispatchPhase, result: &Result<Routed, DispatchError>) {
    let next = if result.is_ok() {
        DispatchPhase::Completed
    } else {
        DispatchPhase::Failed
    };
    advance(request_id, phase, next);
}
