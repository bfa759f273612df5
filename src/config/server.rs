//! Runtime configuration of a single proxy instance.

use std::time::Duration;

use url::Url;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{parse_redirect_url, parse_target_url, validate_config};
use crate::error::ProxyError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONN: usize = 100;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Validated, immutable server configuration.
///
/// Shared via `Arc` by every handler of one `ProxyServer`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    target_base_url: Url,
    timeout: Duration,
    max_conn: usize,
    redirect_url: Option<String>,
    redirects: bool,
    shutdown_grace: Duration,
}

impl ServerConfig {
    /// Start building a configuration for the given upstream.
    pub fn builder(target_base_url: impl Into<String>) -> ServerConfigBuilder {
        ServerConfigBuilder {
            target_base_url: target_base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            max_conn: DEFAULT_MAX_CONN,
            redirect_url: None,
            redirects: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Configuration with defaults for everything but the target.
    pub fn new(target_base_url: impl Into<String>) -> Result<Self, ProxyError> {
        Self::builder(target_base_url).build()
    }

    pub fn target_base_url(&self) -> &Url {
        &self.target_base_url
    }

    /// Deadline for one outbound operation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Size of the connection slot pool.
    pub fn max_conn(&self) -> usize {
        self.max_conn
    }

    /// Redirect location exactly as configured.
    pub fn redirect_url(&self) -> Option<&str> {
        self.redirect_url.as_deref()
    }

    pub fn redirects(&self) -> bool {
        self.redirects
    }

    /// How long `close` lets in-flight work finish before forcing it.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }
}

impl TryFrom<&ProxyConfig> for ServerConfig {
    type Error = ProxyError;

    fn try_from(config: &ProxyConfig) -> Result<Self, Self::Error> {
        validate_config(config).map_err(|errors| {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            ProxyError::Configuration(joined)
        })?;

        let mut builder = ServerConfig::builder(config.upstream.target_base_url.clone())
            .timeout(Duration::from_secs(config.upstream.timeout_secs))
            .max_conn(config.listener.max_connections)
            .redirects(config.redirect.enabled)
            .shutdown_grace(Duration::from_secs(config.lifecycle.shutdown_grace_secs));
        if let Some(url) = &config.redirect.url {
            builder = builder.redirect_url(url.clone());
        }
        builder.build()
    }
}

/// Builder for [`ServerConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    target_base_url: String,
    timeout: Duration,
    max_conn: usize,
    redirect_url: Option<String>,
    redirects: bool,
    shutdown_grace: Duration,
}

impl ServerConfigBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_conn(mut self, max_conn: usize) -> Self {
        self.max_conn = max_conn;
        self
    }

    pub fn redirect_url(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }

    pub fn redirects(mut self, enabled: bool) -> Self {
        self.redirects = enabled;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<ServerConfig, ProxyError> {
        let config_error = |e: crate::config::validation::ValidationError| {
            ProxyError::Configuration(e.to_string())
        };

        let target_base_url = parse_target_url(&self.target_base_url).map_err(config_error)?;
        // Validated as a URL, but sent as written.
        let redirect_url = parse_redirect_url(self.redirect_url.as_deref(), self.redirects)
            .map_err(config_error)?
            .and(self.redirect_url.map(|raw| raw.trim().to_string()));

        if self.timeout.is_zero() {
            return Err(ProxyError::Configuration("timeout must be greater than zero".into()));
        }
        if self.max_conn == 0 {
            return Err(ProxyError::Configuration(
                "max_conn must be greater than zero".into(),
            ));
        }

        Ok(ServerConfig {
            target_base_url,
            timeout: self.timeout,
            max_conn: self.max_conn,
            redirect_url,
            redirects: self.redirects,
            shutdown_grace: self.shutdown_grace,
        })
    }
}
