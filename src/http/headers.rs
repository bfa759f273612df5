//! Header sanitizing and CORS decoration.
//!
//! # Responsibilities
//! - Drop Host, Origin and inbound Access-Control-* before forwarding
//! - Strip hop-by-hop headers that belong to a single connection leg
//! - Inject the proxy's CORS policy into every response
//!
//! # Design Decisions
//! - `HeaderMap` is the header model: ordered, case-insensitive, keeps duplicates
//! - CORS policy is a fixed wildcard, independent of the request's Origin

use axum::http::header::{
    self, HeaderMap, HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS";
pub const ALLOW_HEADERS: &str = "*";

/// Headers scoped to one connection (RFC 9110 §7.6.1), plus legacy ones.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// WebSocket handshake headers regenerated for the upstream leg.
const WEBSOCKET_HANDSHAKE: [HeaderName; 4] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_ACCEPT,
];

fn is_access_control(name: &HeaderName) -> bool {
    // HeaderName is always lowercase.
    name.as_str().starts_with("access-control-")
}

/// Copy inbound headers minus Host, Origin and Access-Control-*.
///
/// Order and duplicates of the remaining headers are preserved.
pub fn prepare_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut prepared = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if name == header::HOST || name == header::ORIGIN || is_access_control(name) {
            continue;
        }
        prepared.append(name.clone(), value.clone());
    }
    prepared
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Remove the headers tungstenite generates itself for the upstream handshake.
pub fn strip_websocket_handshake(headers: &mut HeaderMap) {
    for name in WEBSOCKET_HANDSHAKE.iter() {
        headers.remove(name);
    }
}

/// Set the CORS headers, replacing any upstream values.
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(ALLOW_ORIGIN));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
}
