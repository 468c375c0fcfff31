//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → broadcast → listener stops accepting, drains in-flight
//!                         → health monitor exits its loop
//! ```
//!
//! # Design Decisions
//! - One broadcast channel, every long-running task subscribes
//! - Shutdown is idempotent; repeated signals do nothing further

pub mod shutdown;
pub mod signals;

pub use shutdown::{signalled, Shutdown};
pub use signals::{spawn_signal_handler, wait_for_signal};
