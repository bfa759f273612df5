//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Create the Axum router with the dispatch handler
//! - Take a connection slot for every request
//! - Dispatch to preflight, redirect, WebSocket bridge or forwarder
//! - Bind plain or TLS listeners and run them in the background
//! - Scoped shutdown: drain, then force-close what is left
//!
//! # Design Decisions
//! - One `ProxyServer` owns all state; several can run in one process
//! - Saturation is answered with 503 before any routing work
//! - Errors are converted to responses here and never reach the listener

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use axum_server::Handle;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::ProxyError;
use crate::http::forward::HttpForwarder;
use crate::http::response::preflight;
use crate::http::websocket::WebSocketBridge;
use crate::lifecycle::Shutdown;
use crate::net::tls::{install_crypto_provider, load_tls_config};
use crate::net::{listener, ConnectionSlots, ConnectionTracker};
use crate::observability::{logging, metrics};
use crate::routing::{self, redirect, Route};

/// Time allowed after the grace period for forced closes to complete.
const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub slots: ConnectionSlots,
    pub forwarder: HttpForwarder,
    pub bridge: WebSocketBridge,
}

/// Single-target reverse proxy server.
pub struct ProxyServer {
    config: Arc<ServerConfig>,
    state: AppState,
    handle: Handle,
    shutdown: Shutdown,
    sessions: ConnectionTracker,
    task: Option<JoinHandle<io::Result<()>>>,
    local_addr: Option<SocketAddr>,
}

impl ProxyServer {
    /// Create a server for the given configuration. Nothing is bound yet.
    pub fn new(config: ServerConfig) -> Result<Self, ProxyError> {
        install_crypto_provider();

        let config = Arc::new(config);
        let shutdown = Shutdown::new();
        let sessions = ConnectionTracker::new();

        let state = AppState {
            config: config.clone(),
            slots: ConnectionSlots::new(config.max_conn()),
            forwarder: HttpForwarder::new(config.clone())?,
            bridge: WebSocketBridge::new(config.clone(), sessions.clone(), shutdown.clone()),
        };

        Ok(Self {
            config,
            state,
            handle: Handle::new(),
            shutdown,
            sessions,
            task: None,
            local_addr: None,
        })
    }

    /// Build the Axum router for this server.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind `host:port` and start serving in the background.
    ///
    /// TLS is used only when both certificate and key paths are given.
    /// Returns the bound address, which matters when `port` is 0.
    pub async fn start_server(
        &mut self,
        host: &str,
        port: u16,
        ssl_cert_path: Option<&Path>,
        ssl_key_path: Option<&Path>,
    ) -> Result<SocketAddr, ProxyError> {
        if self.task.is_some() {
            return Err(ProxyError::Configuration("server already started".into()));
        }

        let tls = match (ssl_cert_path, ssl_key_path) {
            (Some(cert), Some(key)) => Some(load_tls_config(cert, key).await?),
            (None, None) => None,
            _ => {
                tracing::warn!("Only one of certificate and key given, serving plain HTTP");
                None
            }
        };

        let listener = listener::bind(host, port)?;
        let addr = listener.local_addr().map_err(|source| ProxyError::Bind {
            addr: format!("{}:{}", host, port),
            source,
        })?;

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let handle = self.handle.clone();

        let task = match tls {
            Some(tls) => tokio::spawn(
                axum_server::from_tcp_rustls(listener, tls)
                    .handle(handle)
                    .serve(app),
            ),
            None => tokio::spawn(axum_server::from_tcp(listener).handle(handle).serve(app)),
        };

        tracing::info!(
            address = %addr,
            tls = ssl_cert_path.is_some() && ssl_key_path.is_some(),
            target = %self.config.target_base_url(),
            max_conn = self.config.max_conn(),
            timeout_ms = self.config.timeout().as_millis() as u64,
            redirects = self.config.redirects(),
            "Proxy server started"
        );

        self.task = Some(task);
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Address the server is listening on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Live WebSocket bridge sessions.
    pub fn active_sessions(&self) -> u64 {
        self.sessions.active_count()
    }

    /// Stop accepting and shut down within the configured grace period.
    ///
    /// In-flight requests and sessions get `shutdown_grace` to finish. After
    /// that, sessions receive a going-away close frame and remaining
    /// connections are dropped. Returns once the server task has ended.
    pub async fn close(&mut self) {
        let grace = self.config.shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace + FORCE_CLOSE_TIMEOUT;
        tracing::info!(
            grace_ms = grace.as_millis() as u64,
            sessions = self.sessions.active_count(),
            "Shutting down proxy server"
        );

        self.handle.graceful_shutdown(Some(grace));

        if tokio::time::timeout(grace, self.sessions.wait_for_drain())
            .await
            .is_err()
        {
            tracing::warn!(
                sessions = self.sessions.active_count(),
                "Grace period elapsed, force-closing sessions"
            );
        }

        self.shutdown.trigger();
        if tokio::time::timeout_at(deadline, self.sessions.wait_for_drain())
            .await
            .is_err()
        {
            tracing::warn!(
                sessions = self.sessions.active_count(),
                "Sessions did not close in time"
            );
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(result) => log_task_result(result),
                Err(_) => {
                    tracing::warn!("Server task did not stop in time, aborting");
                    self.handle.shutdown();
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        tracing::info!("Proxy server stopped");
    }

    /// Wait for the background server task to finish.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            log_task_result(task.await);
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.handle.shutdown();
            self.shutdown.trigger();
        }
    }
}

fn log_task_result(result: Result<io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Server task failed"),
        Err(e) => tracing::error!(error = %e, "Server task panicked"),
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", any(dispatch))
        .route("/", any(dispatch))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(logging::request_span))
}

/// Main proxy handler.
async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let slot = match state.slots.try_acquire() {
        Ok(slot) => slot,
        Err(e) => {
            tracing::warn!(peer = %peer, max_conn = state.slots.max_connections(), "Rejecting request");
            metrics::record_rejected();
            return e.into_response();
        }
    };

    let route = routing::classify(&request, &state.config);
    tracing::debug!(peer = %peer, route = route.as_str(), "Dispatching request");

    let result = match route {
        Route::Preflight => Ok(preflight()),
        Route::Redirect => redirect::resolve(&state.config),
        Route::WebSocket => state.bridge.handle_upgrade(request, slot).await,
        Route::Forward => state.forwarder.handle_request(request, slot).await,
    };

    let response = result.unwrap_or_else(IntoResponse::into_response);
    metrics::record_request(&method, response.status().as_u16(), route.as_str(), start);
    response
}
