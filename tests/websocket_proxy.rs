//! WebSocket bridge tests against a live proxy and echo upstream.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use shadow_proxy::ServerConfig;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error, Message};

mod common;

#[tokio::test]
async fn echoes_through_bridge() {
    let upstream = common::start_ws_echo_upstream().await;
    let (mut server, proxy) =
        common::start_proxy(ServerConfig::new(format!("http://{}", upstream)).unwrap()).await;

    let (mut socket, response) = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy))
        .await
        .expect("Handshake through proxy failed");
    assert_eq!(response.status(), 101);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    socket.send(Message::text("ping")).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("No echo within 2s")
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::text("ping"));

    socket.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::binary(vec![1u8, 2, 3]));

    socket.close(None).await.unwrap();
    drop(socket);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.active_sessions(), 0);

    server.close().await;
}

#[tokio::test]
async fn unreachable_upstream_fails_handshake() {
    let config = ServerConfig::builder("http://127.0.0.1:1")
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let (mut server, proxy) = common::start_proxy(config).await;

    let start = Instant::now();
    let err = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy))
        .await
        .unwrap_err();

    match err {
        Error::Http(response) => {
            assert_eq!(response.status(), 502);
            assert_eq!(response.headers()["access-control-allow-origin"], "*");
        }
        other => panic!("expected HTTP error, got {:?}", other),
    }
    assert!(start.elapsed() < Duration::from_secs(3), "handshake failure must not hang");
    assert_eq!(server.active_sessions(), 0);

    server.close().await;
}

#[tokio::test]
async fn close_forces_sessions_down_after_grace() {
    let upstream = common::start_ws_echo_upstream().await;
    let config = ServerConfig::builder(format!("http://{}", upstream))
        .shutdown_grace(Duration::from_millis(300))
        .build()
        .unwrap();
    let (mut server, proxy) = common::start_proxy(config).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/live", proxy))
        .await
        .unwrap();
    socket.send(Message::text("hello")).await.unwrap();
    assert_eq!(socket.next().await.unwrap().unwrap(), Message::text("hello"));
    assert_eq!(server.active_sessions(), 1);

    let start = Instant::now();
    let closing = tokio::spawn(async move {
        server.close().await;
        server
    });

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("Session was not closed");
    match frame {
        Some(Ok(Message::Close(Some(close)))) => assert_eq!(close.code, CloseCode::Away),
        Some(Ok(Message::Close(None))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("unexpected frame: {:?}", other),
    }

    let server = closing.await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(server.active_sessions(), 0);
}

#[tokio::test]
async fn session_holds_a_connection_slot() {
    let upstream = common::start_ws_echo_upstream().await;
    let config = ServerConfig::builder(format!("http://{}", upstream))
        .max_conn(1)
        .build()
        .unwrap();
    let (mut server, proxy) = common::start_proxy(config).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy))
        .await
        .unwrap();

    let res = common::client()
        .get(format!("http://{}/other", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(res.headers()["access-control-allow-origin"], "*");

    match tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy)).await {
        Err(Error::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("expected 503, got {:?}", other.map(|(_, r)| r.status())),
    }

    socket.close(None).await.unwrap();
    drop(socket);
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The slot is free again once the session ends.
    let (mut again, _) = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy))
        .await
        .expect("slot was not released");
    again.close(None).await.unwrap();

    server.close().await;
}

#[tokio::test]
async fn client_close_frame_reaches_upstream() {
    let (upstream, mut received) = common::start_ws_recording_upstream().await;
    let (mut server, proxy) =
        common::start_proxy(ServerConfig::new(format!("http://{}", upstream)).unwrap()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy))
        .await
        .unwrap();
    socket
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        })))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), received.recv())
        .await
        .expect("upstream saw nothing")
        .unwrap();
    match frame {
        Message::Close(Some(close)) => {
            assert_eq!(close.code, CloseCode::Normal);
            assert_eq!(close.reason.as_str(), "bye");
        }
        other => panic!("expected close frame, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.active_sessions(), 0);

    server.close().await;
}

#[tokio::test]
async fn ping_gets_exactly_one_pong() {
    let (upstream, mut received) = common::start_ws_recording_upstream().await;
    let (mut server, proxy) =
        common::start_proxy(ServerConfig::new(format!("http://{}", upstream)).unwrap()).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/chat", proxy))
        .await
        .unwrap();

    socket.send(Message::Ping(b"x".to_vec().into())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("no pong")
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::Pong(b"x".to_vec().into()));

    // A second pong would arrive before this echo.
    socket.send(Message::text("after")).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("no echo")
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::text("after"));

    // The ping stayed on the client leg.
    assert_eq!(received.recv().await.unwrap(), Message::text("after"));

    socket.close(None).await.unwrap();
    server.close().await;
}
