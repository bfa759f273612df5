//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Rewrite the inbound request onto the target base URL
//! - Send it once, bounded by the configured timeout
//! - Stream the upstream body back while holding the connection slot
//!
//! # Design Decisions
//! - Exactly one attempt per request; failures map to 502/504
//! - The timeout covers the wait for response headers, not body streaming
//! - Upstream redirects are relayed, never followed

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::http::{Request, Uri};
use axum::response::Response;
use futures_util::Stream;
use url::Url;

use crate::config::ServerConfig;
use crate::error::ProxyError;
use crate::http::headers::{prepare_headers, strip_hop_by_hop};
use crate::http::response::build_response;
use crate::net::ConnectionPermit;

type UpstreamBody = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// True if a segment is `.` or `..`, literally or percent-encoded.
fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// Join the target base URL with the inbound path and query.
///
/// `Url` resolves dot segments, so paths containing them are rejected
/// rather than forwarded to a different upstream path.
pub fn upstream_url(base: &Url, uri: &Uri) -> Result<Url, ProxyError> {
    let path = uri.path();
    if has_dot_segment(path) {
        return Err(ProxyError::InvalidRequestPath(path.to_string()));
    }

    let mut url = base.clone();
    url.set_path(&format!("{}{}", base.path().trim_end_matches('/'), path));
    url.set_query(uri.query());
    url.set_fragment(None);
    Ok(url)
}

/// Relays plain HTTP requests to the upstream.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    config: Arc<ServerConfig>,
}

impl HttpForwarder {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::Configuration(format!("failed to build upstream client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Forward one request and stream the upstream response back.
    ///
    /// `slot` is released when the response body has been fully sent or dropped.
    pub async fn handle_request(
        &self,
        request: Request<Body>,
        slot: ConnectionPermit,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let url = upstream_url(self.config.target_base_url(), &parts.uri)?;

        let mut headers = prepare_headers(&parts.headers);
        strip_hop_by_hop(&mut headers);

        tracing::debug!(method = %parts.method, upstream = %url, "Forwarding request");

        let mut outbound = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        if !body.is_end_stream() {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let start = Instant::now();
        let upstream = match tokio::time::timeout(self.config.timeout(), outbound.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                let error = self.classify(e);
                tracing::warn!(upstream = %url, error = %error, "Upstream request failed");
                return Err(error);
            }
            Err(_) => {
                tracing::warn!(
                    upstream = %url,
                    timeout_ms = self.config.timeout().as_millis() as u64,
                    "Upstream request timed out"
                );
                return Err(ProxyError::UpstreamTimeout(self.config.timeout().as_millis()));
            }
        };

        let status = upstream.status();
        tracing::debug!(
            upstream = %url,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upstream responded"
        );

        let mut upstream = upstream;
        let headers = std::mem::take(upstream.headers_mut());
        let body = SlotHeldBody {
            inner: Box::pin(upstream.bytes_stream()),
            _slot: slot,
        };

        Ok(build_response(status, &headers, Body::from_stream(body)))
    }

    fn classify(&self, error: reqwest::Error) -> ProxyError {
        let detail = error_chain(&error);
        if error.is_timeout() {
            ProxyError::UpstreamTimeout(self.config.timeout().as_millis())
        } else if error.is_connect() {
            ProxyError::UpstreamUnreachable(detail)
        } else {
            ProxyError::MalformedUpstreamResponse(detail)
        }
    }
}

/// Render an error with its sources, outermost first.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Upstream body stream that owns the request's connection slot.
struct SlotHeldBody {
    inner: UpstreamBody,
    _slot: ConnectionPermit,
}

impl Stream for SlotHeldBody {
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
