//! Root path redirect.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::ServerConfig;
use crate::error::ProxyError;
use crate::http::response::with_cors;

/// Answer `/` with `302 Found` pointing at the configured redirect URL.
pub fn resolve(config: &ServerConfig) -> Result<Response, ProxyError> {
    let location = config
        .redirect_url()
        .ok_or_else(|| ProxyError::Configuration("redirect url is not configured".into()))?;
    let location = HeaderValue::from_str(location)
        .map_err(|e| ProxyError::Configuration(format!("invalid redirect url: {}", e)))?;

    tracing::debug!(location = ?location, "Redirecting root path");

    let response = (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
    Ok(with_cors(response))
}
