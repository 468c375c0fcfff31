//! Request attributes supplied by collaborators.
//!
//! Facts providers run once per request, before routing, and fill
//! `RequestContext::attributes`. Rules read them with `attribute_equals`.

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::fmt::Debug;
use std::net::SocketAddr;

use crate::net::TlsConnection;

/// `"true"` when the request arrived over TLS.
pub const CONNECTION_SECURE: &str = "connection.secure";

/// `"true"` when the client presented a verified certificate.
pub const CONNECTION_CLIENT_CERT: &str = "connection.client_certificate";

/// IP address of the peer.
pub const CONNECTION_CLIENT_IP: &str = "connection.client_ip";

/// Adds facts about a request to its routing attributes.
pub trait FactsProvider: Send + Sync + Debug {
    fn collect(&self, request: &Parts, attributes: &mut HashMap<String, String>);
}

/// Facts about the connection a request arrived on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionFacts;

impl FactsProvider for ConnectionFacts {
    fn collect(&self, request: &Parts, attributes: &mut HashMap<String, String>) {
        let tls = request.extensions.get::<TlsConnection>();
        let client_cert = tls.is_some_and(|t| t.client_identity.is_some());
        attributes.insert(CONNECTION_SECURE.to_string(), tls.is_some().to_string());
        attributes.insert(CONNECTION_CLIENT_CERT.to_string(), client_cert.to_string());
        if let Some(ConnectInfo(addr)) = request.extensions.get::<ConnectInfo<SocketAddr>>() {
            attributes.insert(CONNECTION_CLIENT_IP.to_string(), addr.ip().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::ClientIdentity;
    use axum::http::Request;

    fn collect(request: Request<()>) -> HashMap<String, String> {
        let (parts, _) = request.into_parts();
        let mut attributes = HashMap::new();
        ConnectionFacts.collect(&parts, &mut attributes);
        attributes
    }

    #[test]
    fn plain_connection() {
        let mut request = Request::new(());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 50000))));
        let facts = collect(request);
        assert_eq!(facts[CONNECTION_SECURE], "false");
        assert_eq!(facts[CONNECTION_CLIENT_CERT], "false");
        assert_eq!(facts[CONNECTION_CLIENT_IP], "10.1.2.3");
    }

    #[test]
    fn tls_connection_with_client_certificate() {
        let mut request = Request::new(());
        request.extensions_mut().insert(TlsConnection {
            client_identity: Some(ClientIdentity("Hash=ab".into())),
        });
        let facts = collect(request);
        assert_eq!(facts[CONNECTION_SECURE], "true");
        assert_eq!(facts[CONNECTION_CLIENT_CERT], "true");
        assert!(!facts.contains_key(CONNECTION_CLIENT_IP));
    }

    #[test]
    fn tls_connection_without_client_certificate() {
        let mut request = Request::new(());
        request.extensions_mut().insert(TlsConnection::default());
        let facts = collect(request);
        assert_eq!(facts[CONNECTION_SECURE], "true");
        assert_eq!(facts[CONNECTION_CLIENT_CERT], "false");
    }
}
