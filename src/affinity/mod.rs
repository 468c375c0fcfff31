//! Query affinity subsystem.
//!
//! # Data Flow
//! ```text
//! Follow-up request (/v1/statement/executing/{id}/...)
//!     → http::request (extract query id from path)
//!     → tracker.rs (query id → backend name)
//!     → Dispatcher forwards to the recorded backend
//!
//! New query accepted by a backend
//!     → Dispatcher records (query id → backend) after the backend answered
//! ```

pub mod tracker;

pub use tracker::{AffinityEntry, QueryAffinityTracker};
