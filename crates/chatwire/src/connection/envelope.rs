// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON message envelopes carried over the real-time connection.

use serde::{Deserialize, Serialize};

/// An outbound message. `timestamp` is stamped at send time when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self { kind: kind.into(), payload, id: None, timestamp: None }
    }

    /// Heartbeat frame: `{"type":"ping"}`.
    pub fn ping() -> Self {
        Self::new("ping", serde_json::Value::Null)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Fill in `timestamp` if the caller left it unset.
    pub fn stamped(mut self, now_ms: u64) -> Self {
        self.timestamp.get_or_insert(now_ms);
        self
    }
}

/// A message received from the server. Always carries a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: u64,
}

#[derive(Deserialize)]
struct RawInbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    timestamp: Option<u64>,
}

/// Parse one text frame. Frames without a server timestamp get `now_ms`.
pub fn parse_inbound(text: &str, now_ms: u64) -> Result<InboundEnvelope, serde_json::Error> {
    let raw: RawInbound = serde_json::from_str(text)?;
    Ok(InboundEnvelope {
        kind: raw.kind,
        payload: raw.payload,
        id: raw.id,
        timestamp: raw.timestamp.unwrap_or(now_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_serializes_minimal() -> anyhow::Result<()> {
        let text = serde_json::to_string(&Envelope::ping())?;
        assert_eq!(text, r#"{"type":"ping"}"#);
        Ok(())
    }

    #[test]
    fn stamped_keeps_caller_timestamp() {
        let mut env = Envelope::new("chat", json!({"text": "hi"}));
        env.timestamp = Some(5);
        assert_eq!(env.stamped(99).timestamp, Some(5));
        assert_eq!(Envelope::ping().stamped(99).timestamp, Some(99));
    }

    #[test]
    fn outbound_wire_shape() -> anyhow::Result<()> {
        let env = Envelope::new("chat", json!({"text": "hi"})).with_id("m1").stamped(7);
        let value = serde_json::to_value(&env)?;
        assert_eq!(value, json!({"type": "chat", "payload": {"text": "hi"}, "id": "m1", "timestamp": 7}));
        Ok(())
    }

    #[test]
    fn inbound_defaults_timestamp() -> anyhow::Result<()> {
        let env = parse_inbound(r#"{"type":"chat","payload":{"text":"yo"}}"#, 42)?;
        assert_eq!(env.kind, "chat");
        assert_eq!(env.payload, json!({"text": "yo"}));
        assert_eq!(env.timestamp, 42);
        assert!(env.id.is_none());

        let env = parse_inbound(r#"{"type":"pong","timestamp":3}"#, 42)?;
        assert_eq!(env.timestamp, 3);
        assert!(env.payload.is_null());
        Ok(())
    }

    #[yare::parameterized(
        not_json     = { "hello" },
        missing_type = { r#"{"payload":1}"# },
        array        = { "[1,2]" },
        bad_type     = { r#"{"type":7}"# },
    )]
    fn inbound_rejects_malformed(text: &str) {
        assert!(parse_inbound(text, 0).is_err());
    }
}
