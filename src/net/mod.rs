//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Keystore (tls.rs): one PEM bundle, certificate chain + private key
//!     → server certificate of the HTTPS listener (ssl = true)
//!     → client identity presented to backends (forward_keystore = true)
//!
//! Client CA (optional): verifies client certificates on the listener
//!     → ClientIdentityAcceptor → TlsConnection extension on each request
//! ```
//!
//! # Design Decisions
//! - TLS is optional; plain HTTP listeners come from tokio directly
//! - rustls with an explicitly installed crypto provider

pub mod tls;

pub use tls::{
    certificate_identity, install_crypto_provider, ClientIdentityAcceptor, Keystore, TlsConnection,
    TlsError,
};
