//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Dispatcher produces:
//!     → events.rs (RoutingEvent to the injected RoutingObserver)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request ID flows through all subsystems
//! - Routing decisions go to an observer passed in at construction

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{MetricsObserver, RoutingEvent, RoutingObserver};
