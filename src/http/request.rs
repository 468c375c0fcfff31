//! Request facts and query id extraction.
//!
//! # Responsibilities
//! - Capture the facts routing decisions are made on (`RequestContext`)
//! - Recognise paths that carry a query id
//! - Carry a TLS client identity placed on the request by the TLS layer
//!
//! # Design Decisions
//! - Facts are a typed struct, built once per request and borrowed by the
//!   resolver; nothing is shared between requests
//! - The body is buffered before routing so rules can inspect it and the
//!   request can be replayed against a second backend

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, Request};
use std::collections::HashMap;
use std::net::SocketAddr;
use tower_http::request_id::{MakeRequestId, RequestId};

/// Header carrying the routing group of a request.
pub const ROUTING_GROUP_HEADER: &str = "X-Trino-Routing-Group";

/// Header used to forward a verified client identity to backends.
pub const FORWARDED_CLIENT_CERT_HEADER: &str = "X-Forwarded-Client-Cert";

/// Header carrying the request id, set on entry and echoed on the response.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Path prefixes whose next segment is a query id.
const QUERY_ID_PREFIXES: &[&str] = &[
    "/v1/statement/queued/",
    "/v1/statement/executing/",
    "/v1/statement/",
    "/v1/query/",
    "/ui/api/query/",
];

/// Verified TLS client identity in `X-Forwarded-Client-Cert` form, taken
/// from the certificate the client presented to the HTTPS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

/// Assigns a UUID v4 request id to requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeGatewayRequestId;

impl MakeRequestId for MakeGatewayRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Request id of a request, or `"unknown"` before the id layer ran.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// The facts routing decisions observe.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_addr: Option<SocketAddr>,
    /// Facts injected by collaborators (e.g. a connection-state probe).
    pub attributes: HashMap<String, String>,
    /// Query id carried by the path, if any.
    pub query_id: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>, query: Option<String>, headers: HeaderMap) -> Self {
        let path = path.into();
        let query_id = extract_query_id(&path, query.as_deref());
        Self {
            method,
            path,
            query,
            headers,
            body: Bytes::new(),
            client_addr: None,
            attributes: HashMap::new(),
            query_id,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = Some(addr);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Header value by (case-insensitive) name. `Err` if the value is not
    /// valid UTF-8.
    pub fn header(&self, name: &str) -> Result<Option<&str>, &'static str> {
        match self.headers.get(name) {
            Some(value) => value.to_str().map(Some).map_err(|_| "non-UTF-8 header value"),
            None => Ok(None),
        }
    }

    /// True for a new statement submission.
    pub fn is_statement_submission(&self) -> bool {
        self.method == Method::POST && self.path.trim_end_matches('/') == "/v1/statement"
    }
}

/// Extract the query id from a query status, polling or cancel path.
pub fn extract_query_id(path: &str, query: Option<&str>) -> Option<String> {
    if path == "/ui/query.html" {
        return query
            .map(|q| q.split('&').next().unwrap_or(q))
            .filter(|id| is_query_id(id))
            .map(str::to_string);
    }

    let rest = QUERY_ID_PREFIXES
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))?;
    let id = rest.split('/').next()?;
    if is_query_id(id) {
        Some(id.to_string())
    } else {
        None
    }
}

fn is_query_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
