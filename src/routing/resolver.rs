//! Routing group resolution.
//!
//! # Responsibilities
//! - Map a request to a routing group label, or `None` when undetermined
//! - Choose the header or rules-engine strategy from configuration
//!
//! # Design Decisions
//! - A rule file that cannot be loaded degrades the gateway to the header
//!   strategy for the rest of the process; logged once at startup
//! - An evaluation error only affects the request that caused it

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::config::RoutingConfig;
use crate::http::request::{RequestContext, ROUTING_GROUP_HEADER};
use crate::routing::rules::{RuleLoadError, RuleSet};

/// Finds the routing group of a request.
pub trait RoutingGroupResolver: Send + Sync + Debug {
    /// Routing group for the request, or `None` if it cannot be determined.
    fn resolve_group(&self, ctx: &RequestContext) -> Option<String>;
}

/// Uses the `X-Trino-Routing-Group` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderResolver;

impl RoutingGroupResolver for HeaderResolver {
    fn resolve_group(&self, ctx: &RequestContext) -> Option<String> {
        ctx.header(ROUTING_GROUP_HEADER)
            .ok()
            .flatten()
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
    }
}

/// Uses an ordered set of routing rules.
#[derive(Debug, Clone)]
pub struct RulesEngineResolver {
    rules: Arc<RuleSet>,
}

impl RulesEngineResolver {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    /// Load the rules from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        tracing::info!(path = %path.display(), "Reading routing rules");
        let rules = RuleSet::load(path)?;
        tracing::info!(path = %path.display(), rules = rules.len(), "Routing rules loaded");
        Ok(Self::new(rules))
    }
}

impl RoutingGroupResolver for RulesEngineResolver {
    fn resolve_group(&self, ctx: &RequestContext) -> Option<String> {
        match self.rules.evaluate(ctx) {
            Ok(group) => group.map(str::to_string),
            Err(e) => {
                tracing::warn!(error = %e, path = %ctx.path, "Routing rule evaluation failed");
                None
            }
        }
    }
}

/// Build the resolver selected by configuration.
///
/// Falls back to [`HeaderResolver`] when the rules engine is enabled but
/// its rule file cannot be loaded.
pub fn resolver_from_config(config: &RoutingConfig) -> Arc<dyn RoutingGroupResolver> {
    if !config.rules_engine_enabled {
        return Arc::new(HeaderResolver);
    }
    let Some(path) = config.rules_config_path.as_deref() else {
        tracing::error!("Rules engine enabled without rules_config_path, using routing group header");
        return Arc::new(HeaderResolver);
    };
    match RulesEngineResolver::load(Path::new(path)) {
        Ok(resolver) => Arc::new(resolver),
        Err(e) => {
            tracing::error!(
                path = %path,
                error = %e,
                "Error opening rules configuration file, using routing group header as default"
            );
            Arc::new(HeaderResolver)
        }
    }
}
