//! Response construction.
//!
//! # Responsibilities
//! - Relay upstream status and headers, adding CORS
//! - Answer preflight requests without contacting the upstream
//! - Produce CORS-decorated error responses
//!
//! # Design Decisions
//! - Streaming bodies are passed through untouched
//! - Connection-scoped upstream headers are dropped; the client leg has its own
//! - Every response leaving the proxy goes through `apply_cors`

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;

use crate::http::headers::{apply_cors, strip_hop_by_hop};

/// Build the client response from an upstream status, headers and body.
pub fn build_response(status: StatusCode, upstream_headers: &HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in upstream_headers {
        headers.append(name.clone(), value.clone());
    }
    strip_hop_by_hop(headers);
    apply_cors(headers);

    response
}

/// Answer an OPTIONS request: 204, CORS headers only, empty body.
pub fn preflight() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    apply_cors(response.headers_mut());
    response
}

/// Plain-text error response carrying the CORS headers.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    apply_cors(headers);

    response
}

/// Mark a response as CORS-decorated, keeping everything else.
pub fn with_cors(mut response: Response) -> Response {
    apply_cors(response.headers_mut());
    response
}
