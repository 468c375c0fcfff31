//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend cluster
//! - Carry its routing group, activation flag, health and load
//!
//! Records are immutable values; the registry replaces a whole record when
//! any field changes, so readers never observe a half-applied update.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::BackendConfig;

/// Health State enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Not probed yet; takes traffic.
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn from_healthy(healthy: bool) -> Self {
        if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        }
    }
}

/// A single backend cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Cluster name, unique within the registry.
    pub name: String,
    /// Base URL requests are forwarded to.
    pub proxy_to: Url,
    /// URL shown to operators.
    #[serde(default)]
    pub external_url: Option<String>,
    /// Routing group the cluster belongs to.
    pub routing_group: String,
    /// Whether the cluster takes traffic.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Last known health.
    #[serde(default)]
    pub health: HealthState,
    /// Current load (running queries).
    #[serde(default)]
    pub load: u64,
}

fn default_active() -> bool {
    true
}

impl Backend {
    /// Create a new active backend with unknown health and no load.
    pub fn new(name: impl Into<String>, proxy_to: Url, routing_group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            proxy_to,
            external_url: None,
            routing_group: routing_group.into(),
            active: true,
            health: HealthState::Unknown,
            load: 0,
        }
    }

    /// Build a backend from its config entry. Entries without a routing
    /// group join `default_group`.
    pub fn from_config(config: &BackendConfig, default_group: &str) -> Result<Self, url::ParseError> {
        let proxy_to = Url::parse(&config.proxy_to)?;
        Ok(Self {
            name: config.name.clone(),
            proxy_to,
            external_url: config.external_url.clone(),
            routing_group: config
                .routing_group
                .clone()
                .unwrap_or_else(|| default_group.to_string()),
            active: config.active,
            health: HealthState::Unknown,
            load: 0,
        })
    }

    /// Return true if backend is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health != HealthState::Unhealthy
    }

    /// Active and healthy.
    pub fn is_eligible(&self) -> bool {
        self.active && self.is_healthy()
    }

    /// Absolute URL for a request path and optional query string.
    pub fn url_for(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.proxy_to.clone();
        let base = self.proxy_to.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, path));
        url.set_query(query);
        url
    }
}
