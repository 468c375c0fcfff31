//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each registered backend
//!     → state.rs decides transitions
//!     → BackendRegistry::set_health / update_load
//!
//! Dispatcher:
//!     Transport failure
//!     → BackendRegistry::mark_health(false) directly
//!
//! State machine (state.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Probes and dispatch failures both write to the registry
//! - State transitions require consecutive successes/failures
//! - Health state is per-backend, not per-group

pub mod active;
pub mod state;

pub use active::{HealthMonitor, ProbeResult};
pub use state::HealthTracker;
