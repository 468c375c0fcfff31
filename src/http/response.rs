//! Header filtering and response relaying.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Turn a backend response into a client response, streamed or buffered
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Statement submissions are buffered so the query id can be read

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;

use crate::http::request::{ClientIdentity, FORWARDED_CLIENT_CERT_HEADER};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

/// Headers to send to a backend.
///
/// `Host` and `Content-Length` are recomputed by the client. An inbound
/// `X-Forwarded-Client-Cert` is never trusted; it is only set from a
/// verified identity when forwarding is enabled.
pub fn outbound_headers(inbound: &HeaderMap, identity: Option<&ClientIdentity>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 1);
    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name.as_str().eq_ignore_ascii_case(FORWARDED_CLIENT_CERT_HEADER)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Some(ClientIdentity(subject)) = identity {
        match HeaderValue::from_str(subject) {
            Ok(value) => {
                headers.insert(FORWARDED_CLIENT_CERT_HEADER, value);
            }
            Err(_) => tracing::warn!("Client identity is not a valid header value, not forwarding it"),
        }
    }
    headers
}

fn response_builder(status: StatusCode, upstream: &HeaderMap) -> axum::http::response::Builder {
    let mut builder = Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }
    builder
}

/// Relay a backend response, streaming its body.
pub fn relay(upstream: reqwest::Response) -> Response {
    let builder = response_builder(upstream.status(), upstream.headers());
    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Relay a backend response whose body was already read.
pub fn relay_buffered(status: StatusCode, upstream: &HeaderMap, body: Bytes) -> Response {
    let mut builder = response_builder(status, upstream);
    if let Some(headers) = builder.headers_mut() {
        headers.remove(header::CONTENT_LENGTH);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
