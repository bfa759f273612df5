//! Error taxonomy for the proxy.
//!
//! Startup errors (`Configuration`, `TlsConfiguration`, `Bind`) abort server
//! construction. Every other variant is scoped to one request or one WebSocket
//! session and is converted into a well-formed client response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::http::response::error_response;

/// Errors produced while building or running the proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Invalid server configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Certificate or private key could not be loaded.
    #[error("TLS configuration error: {0}")]
    TlsConfiguration(String),

    /// Listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Request path cannot be forwarded verbatim.
    #[error("invalid request path {0:?}")]
    InvalidRequestPath(String),

    /// Every connection slot is in use.
    #[error("connection limit of {0} exceeded")]
    ConnectionLimitExceeded(usize),

    /// Upstream refused the connection or could not be resolved.
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream did not answer within the configured timeout.
    #[error("upstream timed out after {0} ms")]
    UpstreamTimeout(u128),

    /// Upstream answered with something that is not a valid HTTP response.
    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    /// Upstream WebSocket handshake failed.
    #[error("websocket handshake failed: {0}")]
    WebSocketHandshakeFailure(String),
}

impl ProxyError {
    /// Status code returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ConnectionLimitExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamUnreachable(_)
            | ProxyError::MalformedUpstreamResponse(_)
            | ProxyError::WebSocketHandshakeFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Configuration(_)
            | ProxyError::TlsConfiguration(_)
            | ProxyError::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short reason phrase sent as the response body.
    fn client_message(&self) -> &'static str {
        match self {
            ProxyError::ConnectionLimitExceeded(_) => "Connection limit exceeded",
            ProxyError::InvalidRequestPath(_) => "Invalid request path",
            ProxyError::UpstreamUnreachable(_) => "Upstream unreachable",
            ProxyError::UpstreamTimeout(_) => "Upstream timed out",
            ProxyError::MalformedUpstreamResponse(_) => "Upstream request failed",
            ProxyError::WebSocketHandshakeFailure(_) => "WebSocket handshake with upstream failed",
            _ => "Internal proxy error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        error_response(self.status(), self.client_message())
    }
}
