//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::Path,
    http::{HeaderMap, HeaderName, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use shadow_proxy::{ProxyServer, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// How long `/slow` on the mock upstream waits before answering.
pub const SLOW_DELAY: Duration = Duration::from_secs(2);

/// Chunks sent by `/stream`, and the pause before each one after the first.
pub const STREAM_CHUNKS: u32 = 4;
pub const STREAM_INTERVAL: Duration = Duration::from_millis(400);

/// CA that signed `fixtures/server.pem` (valid for `localhost` and `127.0.0.1`).
pub const TEST_CA_DER: &[u8] = include_bytes!("../fixtures/ca.der");

/// Start a mock HTTP upstream on an ephemeral port.
///
/// - `/slow`: answers "slow" after [`SLOW_DELAY`]
/// - `/delay/{ms}`: answers "done" after `ms` milliseconds
/// - `/stream`: [`STREAM_CHUNKS`] lines `chunk-N`, [`STREAM_INTERVAL`] apart
/// - `/status/{code}`: answers with that status
/// - anything else: body is `"{method} {uri}\n{request body}"`; every request
///   header comes back as `x-echo-{name}`
pub async fn start_echo_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/slow", get(slow))
        .route("/delay/{ms}", get(delay))
        .route("/stream", get(stream))
        .route("/status/{code}", any(status))
        .fallback(echo);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(format!(
        "{} {}\n{}",
        method,
        uri,
        String::from_utf8_lossy(&body)
    )));
    for (name, value) in &headers {
        let echoed = HeaderName::from_bytes(format!("x-echo-{}", name).as_bytes()).unwrap();
        response.headers_mut().append(echoed, value.clone());
    }
    response
}

async fn slow() -> &'static str {
    tokio::time::sleep(SLOW_DELAY).await;
    "slow"
}

async fn delay(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn stream() -> Body {
    let chunks = futures_util::stream::unfold(0u32, |i| async move {
        if i == STREAM_CHUNKS {
            return None;
        }
        if i > 0 {
            tokio::time::sleep(STREAM_INTERVAL).await;
        }
        Some((Ok::<_, std::io::Error>(Bytes::from(format!("chunk-{}\n", i))), i + 1))
    });
    Body::from_stream(chunks)
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    (StatusCode::from_u16(code).unwrap(), format!("status {}", code))
}

/// Start a WebSocket upstream that echoes every data frame back.
pub async fn start_ws_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    if message.is_text() || message.is_binary() {
                        if socket.send(message).await.is_err() {
                            break;
                        }
                    } else if message.is_close() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

/// Start a WebSocket upstream that reports every frame it receives.
///
/// Data frames are also echoed back.
pub async fn start_ws_recording_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<Message>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = socket.next().await {
                    let _ = tx.send(message.clone());
                    if message.is_text() || message.is_binary() {
                        let _ = socket.send(message).await;
                    }
                }
            });
        }
    });

    (addr, rx)
}

/// Start an upstream that answers every connection with bytes that are not HTTP.
pub async fn start_garbage_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(b"this is not http\r\n\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/// Start a TLS proxy for `config` using the test certificate.
pub async fn start_tls_proxy(config: ServerConfig) -> (ProxyServer, SocketAddr) {
    let mut server = ProxyServer::new(config).unwrap();
    let cert = fixture("server.pem");
    let key = fixture("server.key");
    let addr = server
        .start_server("127.0.0.1", 0, Some(&cert), Some(&key))
        .await
        .unwrap();
    (server, addr)
}

/// HTTPS client trusting the test CA.
pub fn tls_client() -> reqwest::Client {
    reqwest::Client::builder()
        .add_root_certificate(reqwest::Certificate::from_der(TEST_CA_DER).unwrap())
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// WebSocket connector trusting the test CA.
pub fn tls_connector() -> tokio_tungstenite::Connector {
    let mut roots = rustls::RootCertStore::empty();
    roots
        .add(rustls::pki_types::CertificateDer::from(TEST_CA_DER.to_vec()))
        .unwrap();
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tokio_tungstenite::Connector::Rustls(Arc::new(config))
}

/// Start a proxy for `config` on an ephemeral port.
pub async fn start_proxy(config: ServerConfig) -> (ProxyServer, SocketAddr) {
    let mut server = ProxyServer::new(config).unwrap();
    let addr = server.start_server("127.0.0.1", 0, None, None).await.unwrap();
    (server, addr)
}

/// HTTP client that neither follows redirects nor uses system proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}
