// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One chat session: credential store, REST client, real-time connection and
//! router, owned together and torn down together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::ApiClient;
use crate::connection::{ConnectionConfig, ConnectionError, ConnectionManager};
use crate::credential::{CredentialStore, SessionEvent};
use crate::router::MessageRouter;

pub struct ChatSession {
    api: ApiClient,
    connection: ConnectionManager,
    router: MessageRouter,
    config: ConnectionConfig,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(api: ApiClient, connection: ConnectionManager, config: ConnectionConfig) -> Self {
        Self {
            api,
            connection,
            router: MessageRouter::new(),
            config,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.api.store()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Connect, passing the current access token as the `token` query
    /// parameter. The first call also starts the router and the logout
    /// watcher; later calls only reconnect.
    ///
    /// The token is read once here and baked into the endpoint, so automatic
    /// reconnects keep presenting it. After a [`SessionEvent::Refreshed`],
    /// disconnect and call `start` again to connect with the new token.
    pub fn start(&self) -> Result<(), ConnectionError> {
        let config = match self.store().valid_access_token() {
            Some(token) => self.config.with_token(&token),
            None => self.config.clone(),
        };
        config.validate()?;

        if !self.started.swap(true, Ordering::SeqCst) {
            let router = self.router.clone();
            let inbound = self.connection.subscribe();
            tokio::spawn({
                let cancel = self.cancel.clone();
                async move { router.run(inbound, cancel).await }
            });
            tokio::spawn(watch_logout(
                self.store().subscribe(),
                self.connection.clone(),
                self.cancel.clone(),
            ));
        }
        self.connection.connect(Some(config))
    }

    /// Disconnect and stop the background tasks.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.connection.disconnect();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Disconnects the real-time connection whenever the session is logged out.
async fn watch_logout(
    mut events: broadcast::Receiver<SessionEvent>,
    connection: ConnectionManager,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(SessionEvent::LoggedOut { reason, return_to }) => {
                info!(?reason, return_to = return_to.as_deref().unwrap_or(""), "logged out, closing connection");
                connection.disconnect();
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "session events lagged"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
