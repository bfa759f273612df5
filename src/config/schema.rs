//! Configuration schema definitions.
//!
//! This module defines the on-disk configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files and
//! every field has a default so minimal files are accepted.

use serde::{Deserialize, Serialize};

/// Root of the TOML configuration file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// The single upstream every request is relayed to.
    pub upstream: UpstreamConfig,

    /// Root path redirect.
    pub redirect: RedirectConfig,

    /// Shutdown behaviour.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Optional TLS configuration. Plain HTTP/WS when absent.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent requests and WebSocket sessions.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
            max_connections: 100,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to, e.g. `https://example.com/`.
    pub target_base_url: String,

    /// Time allowed for the upstream to answer, in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target_base_url: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Root path redirect configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RedirectConfig {
    /// Answer `GET /` with a redirect instead of forwarding it.
    pub enabled: bool,

    /// Location sent with the redirect. Required when enabled.
    pub url: Option<String>,
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long in-flight work may run after shutdown starts, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
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
