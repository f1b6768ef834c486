// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::{Backoff, ConnectionConfig, ConnectionError};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the chatwire client.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "chatwire", version, about = "Real-time chat client")]
pub struct ClientConfig {
    /// WebSocket endpoint (ws:// or wss://).
    #[arg(long, env = "CHATWIRE_WS_URL")]
    pub endpoint: String,

    /// Base URL of the REST API.
    #[arg(long, env = "CHATWIRE_API_URL")]
    pub api_url: String,

    /// WebSocket sub-protocol to request. Repeatable.
    #[arg(long = "protocol")]
    pub protocols: Vec<String>,

    /// Delay between reconnect attempts in milliseconds.
    #[arg(long, default_value_t = 1000, env = "CHATWIRE_RECONNECT_INTERVAL_MS")]
    pub reconnect_interval_ms: u64,

    /// Reconnect attempts before giving up.
    #[arg(long, default_value_t = 5, env = "CHATWIRE_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Disable the heartbeat ping.
    #[arg(long)]
    pub no_heartbeat: bool,

    /// Heartbeat interval in milliseconds.
    #[arg(long, default_value_t = 30000, env = "CHATWIRE_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// Double the reconnect delay per attempt, capped at this many milliseconds.
    #[arg(long, env = "CHATWIRE_EXPONENTIAL_BACKOFF_MAX_MS")]
    pub exponential_backoff_max_ms: Option<u64>,

    /// Where to persist the session between runs.
    #[arg(long, env = "CHATWIRE_SESSION_FILE")]
    pub session_file: Option<PathBuf>,

    /// Log in with these credentials at startup.
    #[arg(long, env = "CHATWIRE_USERNAME", requires = "password")]
    pub username: Option<String>,

    #[arg(long, env = "CHATWIRE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// HTTP request timeout in milliseconds.
    #[arg(long, default_value_t = 10000, env = "CHATWIRE_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "CHATWIRE_LOG_FORMAT")]
    pub log_format: LogFormat,
}

impl ClientConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Build and validate the connection parameters.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConnectionError> {
        let config = ConnectionConfig {
            endpoint: self.endpoint.clone(),
            protocols: self.protocols.clone(),
            reconnect_interval_ms: self.reconnect_interval_ms,
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_enabled: !self.no_heartbeat,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            backoff: match self.exponential_backoff_max_ms {
                Some(max_ms) => Backoff::Exponential { max_ms },
                None => Backoff::Fixed,
            },
        };
        config.validate()?;
        Ok(config)
    }
}
