//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that feature flags have the settings they depend on
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Detect duplicate backend names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("request_router.port must be greater than 0")]
    InvalidPort,

    #[error("request_router.history_size must be greater than 0")]
    ZeroHistorySize,

    #[error("request_router.{0} requires request_router.keystore_path")]
    MissingKeystore(&'static str),

    #[error("request_router.client_ca_path requires request_router.ssl")]
    ClientCaWithoutSsl,

    #[error("routing.rules_engine_enabled requires routing.rules_config_path")]
    MissingRulesPath,

    #[error("routing.default_group must not be empty")]
    EmptyDefaultGroup,

    #[error("backend #{0} has an empty name")]
    EmptyBackendName(usize),

    #[error("backend '{0}' is defined more than once")]
    DuplicateBackend(String),

    #[error("backend '{name}' has invalid proxy_to '{url}'")]
    InvalidBackendUrl { name: String, url: String },

    #[error("{0} must be greater than 0")]
    ZeroValue(&'static str),
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let router = &config.request_router;

    if router.port == 0 {
        errors.push(ValidationError::InvalidPort);
    }
    if router.history_size == 0 {
        errors.push(ValidationError::ZeroHistorySize);
    }
    if router.ssl && router.keystore_path.is_none() {
        errors.push(ValidationError::MissingKeystore("ssl"));
    }
    if router.forward_keystore && router.keystore_path.is_none() {
        errors.push(ValidationError::MissingKeystore("forward_keystore"));
    }
    if router.client_ca_path.is_some() && !router.ssl {
        errors.push(ValidationError::ClientCaWithoutSsl);
    }
    if router.keystore_pass.is_some() && router.keystore_path.is_none() {
        errors.push(ValidationError::MissingKeystore("keystore_pass"));
    }

    if config.routing.rules_engine_enabled && config.routing.rules_config_path.is_none() {
        errors.push(ValidationError::MissingRulesPath);
    }
    if config.routing.default_group.trim().is_empty() {
        errors.push(ValidationError::EmptyDefaultGroup);
    }

    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        if backend.name.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendName(i));
            continue;
        }
        if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        let valid_url = Url::parse(&backend.proxy_to)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
            .unwrap_or(false);
        if !valid_url {
            errors.push(ValidationError::InvalidBackendUrl {
                name: backend.name.clone(),
                url: backend.proxy_to.clone(),
            });
        }
    }

    let ranges = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("health_check.interval_secs", config.health_check.interval_secs),
        ("health_check.timeout_secs", config.health_check.timeout_secs),
        ("health_check.unhealthy_threshold", config.health_check.unhealthy_threshold as u64),
        ("health_check.healthy_threshold", config.health_check.healthy_threshold as u64),
        ("limits.max_body_bytes", config.limits.max_body_bytes as u64),
    ];
    for (field, value) in ranges {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
