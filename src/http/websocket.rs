//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Complete the upstream handshake before accepting the client upgrade
//! - Bidirectional frame forwarding between client and upstream
//! - Close both sockets exactly once, on close frame, error or shutdown
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Session States
//! ```text
//! Init → Connecting → Bridged → Closing → Closed
//!              └───────── handshake failure ─────────┘
//! ```
//!
//! # Design Decisions
//! - Upstream is dialed first; a failed dial becomes a 502, never a dangling 101
//! - Frame-level forwarding (no message buffering or inspection)
//! - Ping/pong is hop-by-hop: tungstenite answers pings on each leg, so
//!   control frames are never relayed and a ping gets exactly one pong
//! - One relay worker per direction, both joined under the session owner
//! - The first worker to see a terminal condition wins the Closing transition

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::http::{header, HeaderMap, Request, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self as tungstenite, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::ServerConfig;
use crate::error::ProxyError;
use crate::http::forward::upstream_url;
use crate::http::headers::{prepare_headers, strip_hop_by_hop, strip_websocket_handshake};
use crate::http::response::with_cors;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionPermit, ConnectionTracker, SessionGuard, SessionId};
use crate::observability::metrics;

/// Upper bound for the best-effort close handshake on each socket.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of one bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BridgeState {
    Init = 0,
    Connecting = 1,
    Bridged = 2,
    Closing = 3,
    Closed = 4,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BridgeState::Init,
            1 => BridgeState::Connecting,
            2 => BridgeState::Bridged,
            3 => BridgeState::Closing,
            _ => BridgeState::Closed,
        }
    }
}

/// Why a session left the Bridged state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A close frame was relayed.
    CloseFrame,
    /// A socket errored or ended without a close frame.
    SocketError,
    /// The server is shutting down.
    Shutdown,
}

/// Shared closing decision for the two relay workers of one session.
#[derive(Debug)]
pub struct CloseSignal {
    state: AtomicU8,
    reason: AtomicU8,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(BridgeState::Init as u8),
            reason: AtomicU8::new(0),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move `from → to`. Returns false if the session was not in `from`.
    pub fn advance(&self, from: BridgeState, to: BridgeState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Enter Closing. Only the first caller wins; it wakes every waiter.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        if !self.advance(BridgeState::Bridged, BridgeState::Closing) {
            return false;
        }
        self.reason.store(reason as u8 + 1, Ordering::SeqCst);
        self.notify.notify_waiters();
        true
    }

    pub fn reason(&self) -> Option<CloseReason> {
        match self.reason.load(Ordering::SeqCst) {
            1 => Some(CloseReason::CloseFrame),
            2 => Some(CloseReason::SocketError),
            3 => Some(CloseReason::Shutdown),
            _ => None,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.state() >= BridgeState::Closing
    }

    /// Resolve once the session has left Bridged.
    pub async fn closing(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closing() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame type that can be relayed to the other side of the bridge.
trait Frame: Sized + Send {
    type Peer: Frame<Peer = Self>;

    fn is_close(&self) -> bool;

    /// Convert for the peer socket. `None` for frames that stay on this leg.
    fn into_peer(self) -> Option<Self::Peer>;

    /// Close frame sent when the server forces the session down.
    fn going_away() -> Self;
}

impl Frame for ws::Message {
    type Peer = Message;

    fn is_close(&self) -> bool {
        matches!(self, ws::Message::Close(_))
    }

    fn into_peer(self) -> Option<Message> {
        match self {
            ws::Message::Text(text) => Some(Message::Text(text.as_str().into())),
            ws::Message::Binary(data) => Some(Message::Binary(data)),
            // Each leg answers its own pings.
            ws::Message::Ping(_) | ws::Message::Pong(_) => None,
            ws::Message::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
                code: CloseCode::from(f.code),
                reason: f.reason.as_str().into(),
            }))),
        }
    }

    fn going_away() -> Self {
        ws::Message::Close(Some(ws::CloseFrame {
            code: ws::close_code::AWAY,
            reason: "proxy shutting down".into(),
        }))
    }
}

impl Frame for Message {
    type Peer = ws::Message;

    fn is_close(&self) -> bool {
        self.is_close()
    }

    fn into_peer(self) -> Option<ws::Message> {
        match self {
            Message::Text(text) => Some(ws::Message::Text(text.as_str().into())),
            Message::Binary(data) => Some(ws::Message::Binary(data)),
            Message::Ping(_) | Message::Pong(_) => None,
            Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| ws::CloseFrame {
                code: u16::from(f.code),
                reason: f.reason.as_str().into(),
            }))),
            // Raw frames are only produced when writing.
            Message::Frame(_) => None,
        }
    }

    fn going_away() -> Self {
        Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "proxy shutting down".into(),
        }))
    }
}

/// Which way a relay worker moves frames.
#[derive(Debug, Clone, Copy)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client->upstream",
            Direction::UpstreamToClient => "upstream->client",
        }
    }
}

/// One client/upstream socket pair.
#[derive(Debug)]
pub struct BridgeSession {
    guard: SessionGuard,
    signal: Arc<CloseSignal>,
}

impl BridgeSession {
    pub fn new(guard: SessionGuard) -> Self {
        Self {
            guard,
            signal: Arc::new(CloseSignal::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.guard.id()
    }

    pub fn state(&self) -> BridgeState {
        self.signal.state()
    }

    /// Relay frames until either side closes, errors, or shutdown fires.
    pub async fn run(
        self,
        client: WebSocket,
        upstream: UpstreamSocket,
        mut shutdown: broadcast::Receiver<()>,
        shutdown_already: bool,
    ) {
        let id = self.id();
        if !self.signal.advance(BridgeState::Connecting, BridgeState::Bridged) {
            tracing::warn!(session_id = %id, state = ?self.state(), "Session not ready to bridge");
            return;
        }
        tracing::info!(session_id = %id, "WebSocket session bridged");
        metrics::session_opened();

        if shutdown_already {
            self.signal.begin_close(CloseReason::Shutdown);
        }

        let (client_tx, client_rx) = client.split();
        let (upstream_tx, upstream_rx) = upstream.split();

        let signal = &self.signal;
        let watch_shutdown = async {
            tokio::select! {
                _ = shutdown.recv() => {
                    if signal.begin_close(CloseReason::Shutdown) {
                        tracing::info!(session_id = %id, "Closing session for shutdown");
                    }
                }
                _ = signal.closing() => {}
            }
        };

        tokio::join!(
            relay(id, Direction::ClientToUpstream, client_rx, upstream_tx, signal),
            relay(id, Direction::UpstreamToClient, upstream_rx, client_tx, signal),
            watch_shutdown,
        );

        self.signal.advance(BridgeState::Closing, BridgeState::Closed);
        metrics::session_closed();
        tracing::info!(session_id = %id, reason = ?self.signal.reason(), "WebSocket session closed");
    }
}

/// Forward frames from `source` to `sink` until the session starts closing.
async fn relay<R, W, M, E>(
    id: SessionId,
    direction: Direction,
    mut source: R,
    mut sink: W,
    signal: &CloseSignal,
) where
    R: Stream<Item = Result<M, E>> + Unpin,
    M: Frame,
    E: Display,
    W: Sink<M::Peer> + Unpin,
    W::Error: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = signal.closing() => break,
            next = source.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::debug!(session_id = %id, direction = direction.as_str(), error = %e, "Socket read failed");
                signal.begin_close(CloseReason::SocketError);
                break;
            }
            None => {
                tracing::debug!(session_id = %id, direction = direction.as_str(), "Socket ended");
                signal.begin_close(CloseReason::SocketError);
                break;
            }
        };

        let is_close = frame.is_close();
        if let Some(peer_frame) = frame.into_peer() {
            let sent = tokio::select! {
                biased;
                _ = signal.closing() => break,
                sent = sink.send(peer_frame) => sent,
            };
            if let Err(e) = sent {
                tracing::debug!(session_id = %id, direction = direction.as_str(), error = %e, "Socket write failed");
                signal.begin_close(CloseReason::SocketError);
                break;
            }
        }

        if is_close {
            tracing::debug!(session_id = %id, direction = direction.as_str(), "Close frame relayed");
            signal.begin_close(CloseReason::CloseFrame);
            break;
        }
    }

    if signal.reason() == Some(CloseReason::Shutdown) {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(<M::Peer as Frame>::going_away())).await;
    }
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
}

/// Upgrades WebSocket requests and bridges them to the upstream.
#[derive(Debug, Clone)]
pub struct WebSocketBridge {
    config: Arc<ServerConfig>,
    sessions: ConnectionTracker,
    shutdown: Shutdown,
}

impl WebSocketBridge {
    pub fn new(config: Arc<ServerConfig>, sessions: ConnectionTracker, shutdown: Shutdown) -> Self {
        Self {
            config,
            sessions,
            shutdown,
        }
    }

    /// WebSocket URL of the upstream for an inbound URI.
    ///
    /// The scheme follows the target: `http` → `ws`, `https` → `wss`.
    pub fn upstream_ws_url(&self, uri: &Uri) -> Result<Url, ProxyError> {
        let mut url = upstream_url(self.config.target_base_url(), uri)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http/https and ws/wss are all special schemes, so this cannot fail.
        let _ = url.set_scheme(scheme);
        Ok(url)
    }

    /// Handle an inbound upgrade request.
    ///
    /// Returns the 101 response on success; the session runs after the
    /// client connection is upgraded and keeps `slot` until it ends.
    pub async fn handle_upgrade(
        &self,
        request: Request<Body>,
        slot: ConnectionPermit,
    ) -> Result<Response, ProxyError> {
        let (mut parts, _body) = request.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                tracing::debug!(reason = %rejection.body_text(), "Invalid WebSocket upgrade");
                return Ok(with_cors(rejection.into_response()));
            }
        };

        let url = self.upstream_ws_url(&parts.uri)?;

        let session = BridgeSession::new(self.sessions.track());
        let id = session.id();
        session.signal.advance(BridgeState::Init, BridgeState::Connecting);

        tracing::debug!(session_id = %id, upstream = %url, "Connecting upstream WebSocket");

        let (upstream, protocol) = match self.connect_upstream(&url, &parts.headers).await {
            Ok(connected) => connected,
            Err(e) => {
                session.signal.advance(BridgeState::Connecting, BridgeState::Closed);
                tracing::warn!(session_id = %id, upstream = %url, error = %e, "Upstream WebSocket handshake failed");
                return Err(e);
            }
        };

        let upgrade = match protocol {
            Some(protocol) => upgrade.protocols([protocol]),
            None => upgrade,
        };

        let shutdown_rx = self.shutdown.subscribe();
        let shutdown_already = self.shutdown.is_triggered();
        let response = upgrade
            .on_failed_upgrade(move |e| {
                tracing::warn!(session_id = %id, error = %e, "Client WebSocket upgrade failed");
            })
            .on_upgrade(move |client| async move {
                session.run(client, upstream, shutdown_rx, shutdown_already).await;
                drop(slot);
            });

        Ok(with_cors(response))
    }

    /// Dial the upstream and complete its handshake.
    ///
    /// Returns the socket and the subprotocol the upstream selected.
    async fn connect_upstream(
        &self,
        url: &Url,
        inbound: &HeaderMap,
    ) -> Result<(UpstreamSocket, Option<String>), ProxyError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ProxyError::WebSocketHandshakeFailure(e.to_string()))?;

        let mut headers = prepare_headers(inbound);
        strip_hop_by_hop(&mut headers);
        strip_websocket_handshake(&mut headers);
        request.headers_mut().extend(headers);

        let connect = tokio_tungstenite::connect_async(request);
        let (socket, response) = match tokio::time::timeout(self.config.timeout(), connect).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(tungstenite::Error::Http(response))) => {
                return Err(ProxyError::WebSocketHandshakeFailure(format!(
                    "upstream answered {}",
                    response.status()
                )));
            }
            Ok(Err(e)) => return Err(ProxyError::WebSocketHandshakeFailure(e.to_string())),
            Err(_) => {
                return Err(ProxyError::WebSocketHandshakeFailure(format!(
                    "no handshake within {} ms",
                    self.config.timeout().as_millis()
                )));
            }
        };

        let protocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok((socket, protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(target: &str) -> WebSocketBridge {
        let config = Arc::new(ServerConfig::new(target).unwrap());
        WebSocketBridge::new(config, ConnectionTracker::new(), Shutdown::new())
    }

    #[test]
    fn ws_scheme_follows_target() {
        let uri: Uri = "/chat?room=1".parse().unwrap();
        assert_eq!(
            bridge("http://127.0.0.1:3000").upstream_ws_url(&uri).unwrap().as_str(),
            "ws://127.0.0.1:3000/chat?room=1"
        );
        assert_eq!(
            bridge("https://example.com/base/").upstream_ws_url(&uri).unwrap().as_str(),
            "wss://example.com/base/chat?room=1"
        );
    }

    #[test]
    fn close_transition_happens_once() {
        let signal = CloseSignal::new();
        assert!(!signal.begin_close(CloseReason::CloseFrame), "not bridged yet");

        assert!(signal.advance(BridgeState::Init, BridgeState::Connecting));
        assert!(signal.advance(BridgeState::Connecting, BridgeState::Bridged));

        assert!(signal.begin_close(CloseReason::CloseFrame));
        assert!(!signal.begin_close(CloseReason::SocketError));
        assert!(!signal.begin_close(CloseReason::Shutdown));

        assert_eq!(signal.state(), BridgeState::Closing);
        assert_eq!(signal.reason(), Some(CloseReason::CloseFrame));
    }

    #[tokio::test]
    async fn closing_wakes_every_waiter() {
        let signal = Arc::new(CloseSignal::new());
        signal.advance(BridgeState::Init, BridgeState::Connecting);
        signal.advance(BridgeState::Connecting, BridgeState::Bridged);

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.closing().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.begin_close(CloseReason::SocketError);

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
        // Late waiters return immediately.
        signal.closing().await;
    }

    #[test]
    fn frames_convert_verbatim() {
        let text = ws::Message::Text("ping".into()).into_peer().unwrap();
        assert_eq!(text, Message::Text("ping".into()));

        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }));
        assert!(Frame::is_close(&close));
        match close.into_peer() {
            Some(ws::Message::Close(Some(frame))) => {
                assert_eq!(frame.code, 1000);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn control_frames_stay_on_their_leg() {
        assert!(ws::Message::Ping("x".into()).into_peer().is_none());
        assert!(ws::Message::Pong("x".into()).into_peer().is_none());
        assert!(Message::Ping("x".into()).into_peer().is_none());
        assert!(Message::Pong("x".into()).into_peer().is_none());
    }
}
