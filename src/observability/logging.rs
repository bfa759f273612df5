//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binary
//! - Build the per-request span used by the HTTP trace layer
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Request IDs live in the span only; they are never forwarded upstream

use axum::body::Body;
use axum::http::Request;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Default filter directive for a log level.
pub fn default_filter(level: &str) -> String {
    format!("shadow_proxy={level},tower_http={level}")
}

/// Install the global subscriber. Call once from `main`.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Span for one inbound request, tagged with a fresh request ID.
pub fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        request_id = %Uuid::new_v4(),
        method = %request.method(),
        path = %request.uri().path(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_covers_crate_and_tower_http() {
        assert_eq!(default_filter("debug"), "shadow_proxy=debug,tower_http=debug");
    }
}
