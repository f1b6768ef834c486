// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chatwire: real-time chat client with a managed WebSocket connection and
//! transparently refreshed REST credentials.

pub mod auth;
pub mod config;
pub mod connection;
pub mod credential;
pub mod error;
pub mod router;
pub mod session;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::ApiClient;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus, Envelope};
use crate::credential::CredentialStore;
use crate::session::ChatSession;

/// Milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Install the ring crypto provider for rustls. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Run the client until Ctrl-C or until the connection ends for good.
pub async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let conn_config = config.connection_config()?;
    let store = Arc::new(match config.session_file {
        Some(ref path) => CredentialStore::open(path.clone()),
        None => CredentialStore::new(),
    });
    let api = ApiClient::new(&config.api_url, config.request_timeout(), Arc::clone(&store));

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        api.login(username, password)
            .await
            .map_err(|e| anyhow::anyhow!("login failed [{} {}]: {e}", e.code(), e.code().http_status()))?;
    } else if !store.is_authenticated() {
        warn!("no session, connecting unauthenticated");
    }

    let chat = ChatSession::new(api, ConnectionManager::websocket(), conn_config.clone());
    let shutdown = CancellationToken::new();

    let mut inbound = chat.connection().subscribe();
    let printer = tokio::spawn(async move {
        while let Some(envelope) = inbound.next().await {
            match serde_json::to_string(&envelope) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(err = %e, "failed to print envelope"),
            }
        }
    });
    let watcher = tokio::spawn(watch_transitions(
        chat.connection().transitions(),
        conn_config.max_reconnect_attempts,
        shutdown.clone(),
    ));

    chat.start()?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
            _ = shutdown.cancelled() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => send_line(&chat, &line),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(err = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
        }
    }

    let status = chat.connection().status();
    chat.stop();
    printer.abort();
    watcher.abort();

    if status.state == ConnectionState::Errored {
        anyhow::bail!("connection failed after {} reconnect attempts", status.attempt);
    }
    Ok(())
}

/// Send one stdin line if it parses as an envelope.
fn send_line(chat: &ChatSession, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Envelope>(line) {
        Ok(envelope) => {
            if !chat.connection().send(envelope) {
                warn!(state = %chat.connection().state(), "not connected, message dropped");
            }
        }
        Err(e) => warn!(err = %e, "input is not an envelope"),
    }
}

/// Log every state transition; cancel `shutdown` once the connection is done.
async fn watch_transitions(
    mut rx: broadcast::Receiver<ConnectionStatus>,
    max_attempts: u32,
    shutdown: CancellationToken,
) {
    loop {
        match rx.recv().await {
            Ok(status) => {
                info!(%status, "connection state");
                let terminal = match status.state {
                    ConnectionState::Disconnected => true,
                    ConnectionState::Errored => status.attempt >= max_attempts,
                    _ => false,
                };
                if terminal {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    shutdown.cancel();
}
