//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path, headers)
//!     → classify() (evaluate rules in order)
//!     → Route::{Preflight, Redirect, WebSocket, Forward}
//! ```
//!
//! # Design Decisions
//! - Rules are fixed and checked in order; first match wins
//! - Preflight beats everything so OPTIONS never reaches the upstream
//! - The root redirect wins unconditionally over upstream content at "/"
//! - Path matching is exact and case-sensitive; header matching is not

pub mod redirect;

use axum::http::{header, HeaderMap, Method, Request};

use crate::config::ServerConfig;

/// Where a request is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// OPTIONS: answered locally with CORS headers.
    Preflight,
    /// Root path with redirects enabled.
    Redirect,
    /// `Upgrade: websocket`: bridged to the upstream socket.
    WebSocket,
    /// Everything else: relayed over HTTP.
    Forward,
}

impl Route {
    /// Label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Preflight => "preflight",
            Route::Redirect => "redirect",
            Route::WebSocket => "websocket",
            Route::Forward => "forward",
        }
    }
}

/// True when the `Upgrade` header asks for a WebSocket.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Decide how a request is handled.
pub fn classify<B>(request: &Request<B>, config: &ServerConfig) -> Route {
    if request.method() == Method::OPTIONS {
        Route::Preflight
    } else if request.uri().path() == "/" && config.redirects() {
        Route::Redirect
    } else if is_websocket_upgrade(request.headers()) {
        Route::WebSocket
    } else {
        Route::Forward
    }
}
