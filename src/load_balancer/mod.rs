//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Routing group resolved
//!     → registry.rs (immutable snapshot of backends per group)
//!     → selector.rs (active + healthy, lowest load, round-robin on ties)
//!     → fallback to default group when the group is empty
//!     → Return backend or NoHealthyBackend
//! ```
//!
//! # Design Decisions
//! - Registry writes swap whole snapshots; selection never locks
//! - Cursor per routing group, reduced modulo candidate count
//! - Unhealthy and inactive backends excluded from selection

pub mod backend;
pub mod registry;
pub mod selector;

pub use backend::{Backend, HealthState};
pub use registry::{BackendRegistry, RegistrySnapshot};
pub use selector::{BackendSelector, SelectError};
