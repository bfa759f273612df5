//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate URLs and value ranges (timeouts > 0, slot pool > 0)
//! - Enforce the redirect invariant: enabled redirects need a location
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - The same field checks back `ServerConfig::builder`

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream target_base_url is required")]
    MissingTarget,

    #[error("invalid target_base_url {url:?}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("target_base_url must use http or https, got {0:?}")]
    UnsupportedScheme(String),

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("redirects are enabled but no redirect url is configured")]
    MissingRedirectUrl,

    #[error("invalid redirect url {url:?}: {reason}")]
    InvalidRedirectUrl { url: String, reason: String },
}

/// Parse and check the upstream base URL.
pub fn parse_target_url(raw: &str) -> Result<Url, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::MissingTarget);
    }

    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidTarget {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(ValidationError::InvalidTarget {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Parse the optional redirect location and enforce the redirect invariant.
pub fn parse_redirect_url(
    raw: Option<&str>,
    redirects: bool,
) -> Result<Option<Url>, ValidationError> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());

    match raw {
        None if redirects => Err(ValidationError::MissingRedirectUrl),
        None => Ok(None),
        Some(raw) => Url::parse(raw)
            .map(Some)
            .map_err(|e| ValidationError::InvalidRedirectUrl {
                url: raw.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Validate a file configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = parse_target_url(&config.upstream.target_base_url) {
        errors.push(e);
    }
    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if let Err(e) = parse_redirect_url(config.redirect.url.as_deref(), config.redirect.enabled) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
