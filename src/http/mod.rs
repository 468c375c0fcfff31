//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, body buffering)
//!     → request.rs (RequestContext, query id extraction)
//!     → dispatcher.rs (affinity → resolver → selector → forward)
//!     → response.rs (strip hop-by-hop headers, relay body)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{build_backend_client, DispatchError, DispatchPhase, Dispatcher, Routed};
pub use request::{extract_query_id, ClientIdentity, RequestContext, ROUTING_GROUP_HEADER, X_REQUEST_ID};
pub use server::{AppState, Collaborators, GatewayServer, ServerError};
