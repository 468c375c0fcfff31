//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener, TLS and affinity settings.
    pub request_router: RequestRouterConfig,

    /// Routing-group resolution settings.
    pub routing: RoutingConfig,

    /// Backends registered at startup.
    pub backends: Vec<BackendConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Request router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestRouterConfig {
    /// Local gateway port.
    pub port: u16,

    /// Gateway name, used as a label in logs and metrics.
    pub name: String,

    /// Serve HTTPS using `keystore_path`.
    pub ssl: bool,

    /// PEM bundle holding the certificate chain and the private key.
    pub keystore_path: Option<String>,

    /// PEM file of CA certificates trusted to sign client certificates.
    /// When set, the HTTPS listener asks clients for a certificate; clients
    /// without one are still served, just without an identity.
    pub client_ca_path: Option<String>,

    /// Password of an encrypted PKCS#8 key in the keystore.
    pub keystore_pass: Option<String>,

    /// Capacity of the query affinity store.
    pub history_size: usize,

    /// Present the keystore identity to backends and forward verified
    /// client identities.
    pub forward_keystore: bool,
}

impl Default for RequestRouterConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            name: "trino-gateway".to_string(),
            ssl: false,
            keystore_path: None,
            client_ca_path: None,
            keystore_pass: None,
            history_size: 2000,
            forward_keystore: false,
        }
    }
}

/// Routing-group resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Group used when no group can be determined for a request.
    pub default_group: String,

    /// Resolve groups with the rules engine instead of the header.
    pub rules_engine_enabled: bool,

    /// Path of the TOML rule file.
    pub rules_config_path: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_group: "adhoc".to_string(),
            rules_engine_enabled: false,
            rules_config_path: None,
        }
    }
}

/// Backend cluster registered from the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique cluster name.
    pub name: String,

    /// Base URL requests are forwarded to (e.g. "http://trino1:8080").
    #[serde(alias = "proxyTo")]
    pub proxy_to: String,

    /// URL shown to operators; defaults to `proxy_to`.
    #[serde(default, alias = "externalUrl")]
    pub external_url: Option<String>,

    /// Routing group this cluster serves; `routing.default_group` when unset.
    #[serde(default, alias = "routingGroup")]
    pub routing_group: Option<String>,

    /// Whether the cluster takes traffic.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on each backend.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/v1/info".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Total time allowed for one backend call in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest request body the gateway buffers, in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the `/gateway/backend` API.
    pub enabled: bool,

    /// Bearer token required by the admin API, if set.
    pub api_key: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.request_router.history_size, 2000);
        assert_eq!(config.routing.default_group, "adhoc");
        assert!(!config.request_router.forward_keystore);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn parses_router_and_backends() {
        let raw = r#"
            [request_router]
            port = 9080
            name = "gw-1"
            history_size = 10
            forward_keystore = true
            keystore_path = "/tmp/ks.pem"

            [[backends]]
            name = "trino1"
            proxy_to = "http://localhost:8081"

            [[backends]]
            name = "trino2"
            proxy_to = "http://localhost:8082"
            routing_group = "scheduled"
            active = false
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.request_router.port, 9080);
        assert_eq!(config.request_router.name, "gw-1");
        assert_eq!(config.request_router.history_size, 10);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].routing_group, None);
        assert!(config.backends[0].active);
        assert_eq!(config.backends[1].routing_group.as_deref(), Some("scheduled"));
        assert!(!config.backends[1].active);
    }
}
