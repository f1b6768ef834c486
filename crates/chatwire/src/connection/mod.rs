// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection Lifecycle Manager: one real-time connection with explicit
//! state, automatic reconnection and a heartbeat.

pub mod envelope;
pub mod manager;
pub mod policy;
pub mod transport;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::Uri;

pub use envelope::{Envelope, InboundEnvelope};
pub use manager::ConnectionManager;
pub use policy::{Backoff, Decision, ReconnectPolicy};
pub use transport::{Connector, TransportLink, WsConnector};

/// Lifecycle state of the connection. Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Errored,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State plus the reconnect attempt counter at the time of the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState, attempt: u32) -> Self {
        Self { state, attempt }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            ConnectionState::Reconnecting => write!(f, "{}({})", self.state, self.attempt),
            state => write!(f, "{state}"),
        }
    }
}

/// Invalid connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("heartbeat interval must be non-zero")]
    InvalidHeartbeat,
    #[error("no connection config")]
    MissingConfig,
}

/// Parameters for one connection. Replaced wholesale, never mutated while a
/// connection is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` URL.
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl ConnectionConfig {
    /// Config with default timings: 1s fixed reconnect delay, 5 attempts,
    /// 30s heartbeat.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            protocols: Vec::new(),
            reconnect_interval_ms: 1000,
            max_reconnect_attempts: 5,
            heartbeat_enabled: true,
            heartbeat_interval_ms: 30_000,
            backoff: Backoff::Fixed,
        }
    }

    pub fn validate(&self) -> Result<(), ConnectionError> {
        let invalid = |reason: &str| ConnectionError::InvalidEndpoint {
            endpoint: self.endpoint.clone(),
            reason: reason.to_owned(),
        };
        let uri = self.endpoint.parse::<Uri>().map_err(|e| invalid(&e.to_string()))?;
        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        if self.heartbeat_enabled && self.heartbeat_interval_ms == 0 {
            return Err(ConnectionError::InvalidHeartbeat);
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval(),
            max_attempts: self.max_reconnect_attempts,
            backoff: self.backoff,
        }
    }

    /// Copy of this config with `token` appended as a query parameter.
    pub fn with_token(&self, token: &str) -> Self {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        Self { endpoint: format!("{}{sep}token={token}", self.endpoint), ..self.clone() }
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
