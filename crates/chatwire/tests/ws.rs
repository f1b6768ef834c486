// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager tests over real WebSockets against an in-process axum
//! server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;

use chatwire::connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, Envelope, InboundEnvelope,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Echo,
    /// Close the first connection with code 4000 right after the welcome.
    DropFirst,
    /// Close every connection with code 1000 right after the welcome.
    CloseNormally,
}

struct MockChat {
    mode: Mode,
    connections: AtomicU32,
    protocols: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
    close_codes: Mutex<Vec<u16>>,
}

async fn ws_handler(
    State(chat): State<Arc<MockChat>>,
    headers: HeaderMap,
    axum::extract::RawQuery(query): axum::extract::RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(p) = headers.get("sec-websocket-protocol").and_then(|v| v.to_str().ok()) {
        chat.protocols.lock().push(p.to_owned());
    }
    if let Some(token) = query.as_deref().and_then(|q| q.strip_prefix("token=")) {
        chat.tokens.lock().push(token.to_owned());
    }
    ws.protocols(["chat.v1"]).on_upgrade(move |socket| serve(socket, chat))
}

async fn serve(mut socket: WebSocket, chat: Arc<MockChat>) {
    let n = chat.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let welcome = json!({ "type": "welcome", "payload": { "n": n } }).to_string();
    if socket.send(Message::Text(welcome.into())).await.is_err() {
        return;
    }
    let close_with = match chat.mode {
        Mode::DropFirst if n == 1 => Some(4000),
        Mode::CloseNormally => Some(1000),
        _ => None,
    };
    if let Some(code) = close_with {
        let frame = CloseFrame { code, reason: "bye".into() };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let reply = if value["type"] == "ping" {
                    json!({ "type": "pong" })
                } else {
                    json!({ "type": "echo", "payload": value["payload"], "id": value["id"] })
                };
                if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    chat.close_codes.lock().push(frame.code);
                }
                break;
            }
            _ => {}
        }
    }
}

async fn spawn_chat(mode: Mode) -> anyhow::Result<(SocketAddr, Arc<MockChat>)> {
    let chat = Arc::new(MockChat {
        mode,
        connections: AtomicU32::new(0),
        protocols: Mutex::new(Vec::new()),
        tokens: Mutex::new(Vec::new()),
        close_codes: Mutex::new(Vec::new()),
    });
    let app = Router::new().route("/ws", get(ws_handler)).with_state(Arc::clone(&chat));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok((addr, chat))
}

fn config(addr: &SocketAddr) -> ConnectionConfig {
    ConnectionConfig {
        reconnect_interval_ms: 20,
        max_reconnect_attempts: 3,
        heartbeat_enabled: false,
        ..ConnectionConfig::new(format!("ws://{addr}/ws"))
    }
}

/// Next inbound envelope of type `kind`, skipping others.
async fn next_of(
    inbound: &mut UnboundedReceiverStream<InboundEnvelope>,
    kind: &str,
) -> anyhow::Result<InboundEnvelope> {
    loop {
        let envelope = tokio::time::timeout(RECV_TIMEOUT, inbound.next())
            .await
            .map_err(|_| anyhow::anyhow!("timed out waiting for {kind}"))?
            .ok_or_else(|| anyhow::anyhow!("inbound stream ended"))?;
        if envelope.kind == kind {
            return Ok(envelope);
        }
    }
}

async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) -> anyhow::Result<()> {
    let mut watch = manager.watch_status();
    tokio::time::timeout(RECV_TIMEOUT, watch.wait_for(|s| s.state == state)).await??;
    Ok(())
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not met in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn reconnects_after_abnormal_close() -> anyhow::Result<()> {
    let (addr, chat) = spawn_chat(Mode::DropFirst).await?;
    let manager = ConnectionManager::websocket();
    let mut inbound = manager.subscribe();
    let mut transitions = manager.transitions();
    manager.connect(Some(config(&addr)))?;

    let first = next_of(&mut inbound, "welcome").await?;
    assert_eq!(first.payload["n"], 1);
    let second = next_of(&mut inbound, "welcome").await?;
    assert_eq!(second.payload["n"], 2);
    wait_for_state(&manager, ConnectionState::Connected).await?;

    let mut saw_reconnect = false;
    while let Ok(status) = transitions.try_recv() {
        if status.state == ConnectionState::Reconnecting {
            assert_eq!(status.attempt, 1);
            saw_reconnect = true;
        }
    }
    assert!(saw_reconnect);

    assert!(manager.send(Envelope::new("chat", json!({ "text": "hello" })).with_id("m1")));
    let echo = next_of(&mut inbound, "echo").await?;
    assert_eq!(echo.payload, json!({ "text": "hello" }));
    assert_eq!(echo.id.as_deref(), Some("m1"));
    assert_eq!(chat.connections.load(Ordering::SeqCst), 2);

    manager.disconnect();
    Ok(())
}

#[tokio::test]
async fn disconnect_closes_with_normal_code() -> anyhow::Result<()> {
    let (addr, chat) = spawn_chat(Mode::Echo).await?;
    let manager = ConnectionManager::websocket();
    let mut inbound = manager.subscribe();
    manager.connect(Some(config(&addr)))?;
    next_of(&mut inbound, "welcome").await?;

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    wait_until(|| !chat.close_codes.lock().is_empty()).await?;
    assert_eq!(chat.close_codes.lock().clone(), vec![1000]);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(chat.connections.load(Ordering::SeqCst), 1);
    assert!(!manager.send(Envelope::new("chat", Value::Null)));
    Ok(())
}

#[tokio::test]
async fn server_normal_close_does_not_reconnect() -> anyhow::Result<()> {
    let (addr, chat) = spawn_chat(Mode::CloseNormally).await?;
    let manager = ConnectionManager::websocket();
    manager.connect(Some(config(&addr)))?;

    wait_for_state(&manager, ConnectionState::Disconnected).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(chat.connections.load(Ordering::SeqCst), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn heartbeat_pings_reach_server() -> anyhow::Result<()> {
    let (addr, _chat) = spawn_chat(Mode::Echo).await?;
    let manager = ConnectionManager::websocket();
    let mut inbound = manager.subscribe();
    let cfg = ConnectionConfig { heartbeat_enabled: true, heartbeat_interval_ms: 30, ..config(&addr) };
    manager.connect(Some(cfg))?;

    next_of(&mut inbound, "pong").await?;
    assert!(manager.heartbeat_active());
    manager.disconnect();
    assert!(!manager.heartbeat_active());
    Ok(())
}

#[tokio::test]
async fn requests_sub_protocol() -> anyhow::Result<()> {
    let (addr, chat) = spawn_chat(Mode::Echo).await?;
    let manager = ConnectionManager::websocket();
    let mut inbound = manager.subscribe();
    let cfg = ConnectionConfig { protocols: vec!["chat.v1".to_owned()], ..config(&addr) };
    manager.connect(Some(cfg.with_token("tok-1")))?;

    next_of(&mut inbound, "welcome").await?;
    assert_eq!(chat.protocols.lock().clone(), vec!["chat.v1".to_owned()]);
    assert_eq!(chat.tokens.lock().clone(), vec!["tok-1".to_owned()]);
    manager.disconnect();
    Ok(())
}

#[tokio::test]
async fn unreachable_server_gives_up() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let manager = ConnectionManager::websocket();
    let cfg = ConnectionConfig { max_reconnect_attempts: 2, ..config(&addr) };
    manager.connect(Some(cfg))?;

    let mut watch = manager.watch_status();
    tokio::time::timeout(RECV_TIMEOUT, watch.wait_for(|s| s.state == ConnectionState::Errored && s.attempt == 2))
        .await??;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(manager.status().state, ConnectionState::Errored);
    assert_eq!(manager.status().attempt, 2);
    Ok(())
}
