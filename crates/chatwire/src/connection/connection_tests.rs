// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    ws          = { "ws://localhost:8080/ws", true },
    wss         = { "wss://chat.example.com/socket", true },
    with_query  = { "wss://chat.example.com/socket?room=1", true },
    http        = { "http://chat.example.com/ws", false },
    no_scheme   = { "chat.example.com/ws", false },
    empty       = { "", false },
    garbage     = { "ws://exa mple.com", false },
    path_only   = { "/ws", false },
)]
fn endpoint_validation(endpoint: &str, ok: bool) {
    let result = ConnectionConfig::new(endpoint).validate();
    assert_eq!(result.is_ok(), ok, "{endpoint}: {result:?}");
}

#[test]
fn zero_heartbeat_rejected_only_when_enabled() {
    let mut config = ConnectionConfig::new("ws://localhost/ws");
    config.heartbeat_interval_ms = 0;
    assert_eq!(config.validate(), Err(ConnectionError::InvalidHeartbeat));
    config.heartbeat_enabled = false;
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn defaults() {
    let config = ConnectionConfig::new("ws://localhost/ws");
    assert_eq!(config.reconnect_interval(), Duration::from_secs(1));
    assert_eq!(config.max_reconnect_attempts, 5);
    assert!(config.heartbeat_enabled);
    assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    assert_eq!(config.backoff, Backoff::Fixed);
    assert_eq!(config.policy().max_attempts, 5);
}

#[yare::parameterized(
    bare  = { "ws://h/ws", "ws://h/ws?token=abc" },
    query = { "ws://h/ws?room=2", "ws://h/ws?room=2&token=abc" },
)]
fn token_query_parameter(endpoint: &str, expected: &str) {
    let config = ConnectionConfig::new(endpoint).with_token("abc");
    assert_eq!(config.endpoint, expected);
}

#[test]
fn status_display() {
    assert_eq!(ConnectionStatus::new(ConnectionState::Reconnecting, 3).to_string(), "reconnecting(3)");
    assert_eq!(ConnectionStatus::new(ConnectionState::Connected, 3).to_string(), "connected");
}

#[test]
fn config_json_shape() -> anyhow::Result<()> {
    let config: ConnectionConfig = serde_json::from_str(
        r#"{"endpoint":"ws://h/ws","reconnect_interval_ms":250,"max_reconnect_attempts":2,
            "heartbeat_enabled":false,"heartbeat_interval_ms":1000,
            "backoff":{"kind":"exponential","max_ms":8000}}"#,
    )?;
    assert_eq!(config.backoff, Backoff::Exponential { max_ms: 8000 });
    assert!(config.protocols.is_empty());
    assert_eq!(serde_json::to_value(ConnectionState::Errored)?, "errored");
    Ok(())
}
