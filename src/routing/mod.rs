//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request facts (method, path, headers, body, client)
//!     + facts.rs (attributes from facts providers, e.g. connection state)
//!     → resolver.rs (header or rules-engine strategy)
//!     → rules.rs (ordered conditions, first match wins)
//!     → Return: routing group or undetermined
//!
//! Rule Compilation (at startup):
//!     rules file (TOML)
//!     → Parse and check rules
//!     → Sort by priority (stable)
//!     → Freeze as immutable RuleSet
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - No regex in hot path (prefix/substring matching only)
//! - Deterministic: same input always resolves to the same group
//! - Fail open: a broken rule file falls back to the routing header

pub mod facts;
pub mod resolver;
pub mod rules;

pub use facts::{ConnectionFacts, FactsProvider};
pub use resolver::{resolver_from_config, HeaderResolver, RoutingGroupResolver, RulesEngineResolver};
pub use rules::{Condition, RoutingRule, RuleEvaluationError, RuleLoadError, RuleSet};
