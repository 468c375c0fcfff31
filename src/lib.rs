//! Trino Gateway Library
//!
//! Routes Trino client traffic across a fleet of backend clusters: new
//! queries go to the least-loaded healthy cluster of their routing group,
//! follow-up requests of a query go back to the cluster that owns it.

pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod health;
pub mod load_balancer;
pub mod affinity;
pub mod lifecycle;
pub mod observability;
pub mod admin;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
