// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential Store: the current session's token pair, expiry and session id.
//!
//! One store per logical session. Every write replaces the whole [`Session`]
//! so a reader can never observe an access token paired with the wrong
//! expiry. Writes broadcast a [`SessionEvent`] and update the
//! `authenticated` watch that route guards read.

pub mod persist;

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::epoch_ms;

/// Token pair and metadata for one authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    /// Absent only for sessions that can never be refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub session_id: String,
    /// Expiry as milliseconds since Unix epoch.
    pub expires_at_ms: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

impl Session {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Time left before expiry, zero once expired.
    pub fn expires_in(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms.saturating_sub(now_ms))
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// Explicit logout by the user.
    UserRequested,
    /// Refresh was impossible or rejected.
    SessionExpired,
}

/// Events broadcast by the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A new session was established.
    LoggedIn { session_id: String },
    /// The current session got a fresh token pair.
    Refreshed { session_id: String, expires_at_ms: u64 },
    /// The session was cleared. `return_to` is the location the user was
    /// trying to reach, for the post-login redirect.
    LoggedOut {
        reason: LogoutReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_to: Option<String>,
    },
}

/// Holder of the current session.
pub struct CredentialStore {
    session: RwLock<Option<Session>>,
    authenticated: watch::Sender<bool>,
    event_tx: broadcast::Sender<SessionEvent>,
    persist_path: Option<PathBuf>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Create an empty, in-memory store.
    pub fn new() -> Self {
        Self::with_session(None, None)
    }

    /// Open a store backed by a session file, loading any persisted session.
    ///
    /// An unreadable or corrupt file is logged and treated as logged out.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let session = match persist::load(&path) {
            Ok(Some(s)) => {
                info!(path = %path.display(), session_id = %s.session_id, "loaded persisted session");
                Some(s)
            }
            Ok(None) => {
                debug!(path = %path.display(), "no persisted session");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), err = %e, "ignoring unreadable session file");
                None
            }
        };
        Self::with_session(session, Some(path))
    }

    fn with_session(session: Option<Session>, persist_path: Option<PathBuf>) -> Self {
        let (authenticated, _) = watch::channel(session.is_some());
        let (event_tx, _) = broadcast::channel(64);
        Self { session: RwLock::new(session), authenticated, event_tx, persist_path }
    }

    /// Snapshot of the current session.
    pub fn get(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.session.read().as_ref().and_then(|s| s.refresh_token.clone())
    }

    /// Access token if present and not yet expired.
    pub fn valid_access_token(&self) -> Option<String> {
        let now = epoch_ms();
        self.session
            .read()
            .as_ref()
            .filter(|s| !s.is_expired_at(now))
            .map(|s| s.access_token.clone())
    }

    /// True when there is no session or its access token has expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.session.read().as_ref().map_or(true, |s| s.is_expired_at(now_ms))
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    /// Boolean feed for route guards.
    pub fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Replace the whole session.
    ///
    /// Emits `LoggedIn` when there was no session or the session id changed,
    /// `Refreshed` otherwise.
    pub fn set(&self, session: Session) {
        let mut current = self.session.write();
        let event = self.replace(&mut current, session);
        drop(current);
        self.publish(event);
    }

    /// Install a refreshed session only if the store still holds the session
    /// whose refresh token was `spent`. Returns false, leaving the store
    /// untouched, after a logout or a login that happened in the meantime.
    pub fn refresh_if(&self, spent: &str, session: Session) -> bool {
        let mut current = self.session.write();
        let still_current =
            current.as_ref().and_then(|c| c.refresh_token.as_deref()) == Some(spent);
        if !still_current {
            return false;
        }
        let event = self.replace(&mut current, session);
        drop(current);
        self.publish(event);
        true
    }

    fn replace(&self, current: &mut Option<Session>, session: Session) -> SessionEvent {
        let same_session = current.as_ref().is_some_and(|c| c.session_id == session.session_id);
        let event = if same_session {
            SessionEvent::Refreshed {
                session_id: session.session_id.clone(),
                expires_at_ms: session.expires_at_ms,
            }
        } else {
            SessionEvent::LoggedIn { session_id: session.session_id.clone() }
        };
        if let Some(ref path) = self.persist_path {
            save_logged(path, &session);
        }
        *current = Some(session);
        event
    }

    fn publish(&self, event: SessionEvent) {
        self.authenticated.send_replace(true);
        let _ = self.event_tx.send(event);
    }

    /// Clear the session. Returns false (and emits nothing) when already clear.
    pub fn clear(&self, reason: LogoutReason, return_to: Option<String>) -> bool {
        self.clear_where(|_| true, reason, return_to)
    }

    /// Clear the session only if it still carries the refresh token `spent`.
    pub fn clear_if(&self, spent: Option<&str>, reason: LogoutReason, return_to: Option<String>) -> bool {
        self.clear_where(|s| s.refresh_token.as_deref() == spent, reason, return_to)
    }

    fn clear_where(
        &self,
        matches: impl FnOnce(&Session) -> bool,
        reason: LogoutReason,
        return_to: Option<String>,
    ) -> bool {
        let previous = {
            let mut current = self.session.write();
            if !current.as_ref().is_some_and(matches) {
                return false;
            }
            let previous = current.take();
            if let Some(ref path) = self.persist_path {
                if let Err(e) = persist::remove(path) {
                    warn!(path = %path.display(), err = %e, "failed to remove session file");
                }
            }
            previous
        };
        let Some(previous) = previous else {
            return false;
        };
        info!(session_id = %previous.session_id, ?reason, "session cleared");
        self.authenticated.send_replace(false);
        let _ = self.event_tx.send(SessionEvent::LoggedOut { reason, return_to });
        true
    }
}

fn save_logged(path: &Path, session: &Session) {
    match persist::save(path, session) {
        Ok(()) => debug!(path = %path.display(), "persisted session"),
        Err(e) => warn!(path = %path.display(), err = %e, "failed to persist session"),
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
