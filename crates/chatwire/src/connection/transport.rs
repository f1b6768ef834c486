// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam: a [`Connector`] opens a link made of an outbound frame
//! queue and an inbound event stream. [`WsConnector`] is the WebSocket
//! implementation; tests substitute an in-memory one.

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::ConnectionConfig;

/// WebSocket close code for an intentional shutdown.
pub const NORMAL_CLOSE: u16 = 1000;

/// Capacity of the outbound frame queue per link.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Something to write to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Something the transport reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Peer closed. `code` is `None` when the stream ended without a close frame.
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// An open connection.
pub struct TransportLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connect failed: {0}")]
pub struct TransportError(pub String);

/// Opens transport links.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, config: &ConnectionConfig) -> BoxFuture<'static, Result<TransportLink, TransportError>>;
}

/// tokio-tungstenite client connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, config: &ConnectionConfig) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        crate::install_crypto_provider();
        let endpoint = config.endpoint.clone();
        let protocols = config.protocols.join(", ");
        async move {
            let mut request =
                endpoint.as_str().into_client_request().map_err(|e| TransportError(e.to_string()))?;
            if !protocols.is_empty() {
                let value = HeaderValue::from_str(&protocols).map_err(|e| TransportError(e.to_string()))?;
                request.headers_mut().insert("Sec-WebSocket-Protocol", value);
            }
            let (stream, _) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| TransportError(e.to_string()))?;
            let (mut sink, mut source) = stream.split();

            let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(OUTBOUND_CAPACITY);

            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    let (msg, last) = match frame {
                        Frame::Text(text) => (Message::Text(text.into()), false),
                        Frame::Close { code, reason } => (
                            Message::Close(Some(CloseFrame { code: CloseCode::from(code), reason: reason.into() })),
                            true,
                        ),
                    };
                    if let Err(e) = sink.send(msg).await {
                        debug!(err = %e, "ws write failed");
                        break;
                    }
                    if last {
                        break;
                    }
                }
            });

            tokio::spawn(async move {
                let end = loop {
                    match source.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(TransportEvent::Text(text.to_string())).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break match frame {
                                Some(f) => TransportEvent::Closed {
                                    code: Some(u16::from(f.code)),
                                    reason: f.reason.to_string(),
                                },
                                None => TransportEvent::Closed { code: None, reason: String::new() },
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break TransportEvent::Error(e.to_string()),
                        None => break TransportEvent::Closed { code: None, reason: "stream ended".to_owned() },
                    }
                };
                let _ = in_tx.send(end).await;
            });

            Ok(TransportLink { outbound: out_tx, inbound: in_rx })
        }
        .boxed()
    }
}
