// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The connection state machine.
//!
//! Every explicit `connect` or `disconnect` bumps a generation counter; the
//! background task for one connection carries the generation it was started
//! with and every state change it makes is checked against the current one.
//! A stale task can therefore never move the state after a newer request.
//! All state changes go through `Inner::transition`, which is also the only
//! place the heartbeat is stopped.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::envelope::{parse_inbound, Envelope, InboundEnvelope};
use super::policy::Decision;
use super::transport::{Connector, Frame, TransportEvent, TransportLink, NORMAL_CLOSE};
use super::{ConnectionConfig, ConnectionError, ConnectionState, ConnectionStatus};
use crate::epoch_ms;

/// How long a disconnect waits to hand the close frame to the transport.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to one managed connection. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    status_tx: watch::Sender<ConnectionStatus>,
    transitions: broadcast::Sender<ConnectionStatus>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<InboundEnvelope>>>,
    control: Mutex<Control>,
}

struct Control {
    config: Option<ConnectionConfig>,
    generation: u64,
    attempts: u32,
    state: ConnectionState,
    outbound: Option<mpsc::Sender<Frame>>,
    task: Option<CancellationToken>,
    heartbeat: Option<CancellationToken>,
}

/// How a link ended.
enum LinkEnd {
    /// Explicit disconnect.
    Cancelled,
    /// A newer connect superseded this one.
    Stale,
    /// Peer closed with the normal code.
    Normal,
    Abnormal(String),
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let initial = ConnectionStatus::new(ConnectionState::Disconnected, 0);
        let (status_tx, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                connector,
                status_tx,
                transitions,
                subscribers: Mutex::new(Vec::new()),
                control: Mutex::new(Control {
                    config: None,
                    generation: 0,
                    attempts: 0,
                    state: ConnectionState::Disconnected,
                    outbound: None,
                    task: None,
                    heartbeat: None,
                }),
            }),
        }
    }

    /// Manager over the WebSocket transport.
    pub fn websocket() -> Self {
        Self::new(Arc::new(super::transport::WsConnector))
    }

    /// Open a connection with `config`, or with the last config when `None`.
    ///
    /// No-op while connected. Otherwise any running attempt is abandoned,
    /// the attempt counter resets and the state moves to `Connecting`.
    pub fn connect(&self, config: Option<ConnectionConfig>) -> Result<(), ConnectionError> {
        let mut ctl = self.inner.control.lock();
        if ctl.state == ConnectionState::Connected {
            debug!("connect ignored, already connected");
            return Ok(());
        }
        let config = match config {
            Some(config) => config,
            None => ctl.config.clone().ok_or(ConnectionError::MissingConfig)?,
        };
        config.validate()?;

        if let Some(task) = ctl.task.take() {
            task.cancel();
        }
        ctl.generation += 1;
        ctl.attempts = 0;
        ctl.config = Some(config.clone());
        let generation = ctl.generation;
        let cancel = CancellationToken::new();
        ctl.task = Some(cancel.clone());
        self.inner.transition(&mut ctl, ConnectionState::Connecting);
        drop(ctl);

        info!(endpoint = %config.endpoint, generation, "connecting");
        tokio::spawn(Arc::clone(&self.inner).run(config, generation, cancel));
        Ok(())
    }

    /// Close the connection with the normal close code and stop reconnecting.
    /// Idempotent.
    pub fn disconnect(&self) {
        let mut ctl = self.inner.control.lock();
        ctl.generation += 1;
        ctl.attempts = 0;
        let task = ctl.task.take();
        if ctl.state != ConnectionState::Disconnected {
            self.inner.transition(&mut ctl, ConnectionState::Disconnected);
        }
        drop(ctl);
        if let Some(task) = task {
            task.cancel();
            info!("disconnected");
        }
    }

    /// Queue `envelope` for sending, stamping its timestamp if unset.
    /// Returns `false` when not connected or the frame could not be queued.
    pub fn send(&self, envelope: Envelope) -> bool {
        let outbound = {
            let ctl = self.inner.control.lock();
            if ctl.state != ConnectionState::Connected {
                return false;
            }
            ctl.outbound.clone()
        };
        let Some(outbound) = outbound else {
            return false;
        };
        let envelope = envelope.stamped(epoch_ms());
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(kind = %envelope.kind, err = %e, "failed to encode envelope");
                return false;
            }
        };
        match outbound.try_send(Frame::Text(text)) {
            Ok(()) => true,
            Err(e) => {
                debug!(kind = %envelope.kind, err = %e, "send dropped");
                false
            }
        }
    }

    /// Stream of every inbound envelope received after this call.
    pub fn subscribe(&self) -> UnboundedReceiverStream<InboundEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        UnboundedReceiverStream::new(rx)
    }

    pub fn status(&self) -> ConnectionStatus {
        let ctl = self.inner.control.lock();
        ConnectionStatus::new(ctl.state, ctl.attempts)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.control.lock().state
    }

    /// Latest status; intermediate transitions may be skipped.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Every transition, in order.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.transitions.subscribe()
    }

    pub fn heartbeat_active(&self) -> bool {
        self.inner.control.lock().heartbeat.is_some()
    }

    pub fn config(&self) -> Option<ConnectionConfig> {
        self.inner.control.lock().config.clone()
    }
}

impl Inner {
    /// Apply a state change. Leaving `Connected` stops the heartbeat and
    /// detaches the outbound queue.
    fn transition(&self, ctl: &mut Control, state: ConnectionState) {
        if state != ConnectionState::Connected {
            if let Some(heartbeat) = ctl.heartbeat.take() {
                heartbeat.cancel();
            }
            ctl.outbound = None;
        }
        let prev = ctl.state;
        ctl.state = state;
        let status = ConnectionStatus::new(state, ctl.attempts);
        debug!(from = %prev, to = %status, "connection state");
        self.status_tx.send_replace(status);
        let _ = self.transitions.send(status);
    }

    /// Apply a state change only if `generation` is still current.
    fn transition_if(&self, generation: u64, state: ConnectionState) -> bool {
        let mut ctl = self.control.lock();
        if ctl.generation != generation {
            return false;
        }
        self.transition(&mut ctl, state);
        true
    }

    /// The one reconnect decision point. `None` when the generation is stale.
    fn next_attempt(&self, generation: u64, config: &ConnectionConfig) -> Option<Decision> {
        let mut ctl = self.control.lock();
        if ctl.generation != generation {
            return None;
        }
        let decision = config.policy().decide(ctl.attempts);
        match decision {
            Decision::Retry { attempt, .. } => {
                ctl.attempts = attempt;
                self.transition(&mut ctl, ConnectionState::Reconnecting);
            }
            Decision::GiveUp => {
                if ctl.state != ConnectionState::Errored {
                    self.transition(&mut ctl, ConnectionState::Errored);
                }
                ctl.task = None;
            }
        }
        Some(decision)
    }

    async fn run(self: Arc<Self>, config: ConnectionConfig, generation: u64, cancel: CancellationToken) {
        loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return,
                res = self.connector.connect(&config) => res,
            };
            match opened {
                Ok(link) => match self.drive(&config, generation, link, &cancel).await {
                    LinkEnd::Cancelled | LinkEnd::Stale => return,
                    LinkEnd::Normal => {
                        info!(endpoint = %config.endpoint, "server closed connection");
                        let mut ctl = self.control.lock();
                        if ctl.generation == generation {
                            ctl.task = None;
                            self.transition(&mut ctl, ConnectionState::Disconnected);
                        }
                        return;
                    }
                    LinkEnd::Abnormal(reason) => {
                        warn!(endpoint = %config.endpoint, %reason, "connection lost");
                    }
                },
                Err(e) => {
                    warn!(endpoint = %config.endpoint, err = %e, "connect failed");
                    if !self.transition_if(generation, ConnectionState::Errored) {
                        return;
                    }
                }
            }

            match self.next_attempt(generation, &config) {
                Some(Decision::Retry { attempt, delay }) => {
                    info!(attempt, max = config.max_reconnect_attempts, delay_ms = delay.as_millis() as u64, "reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if !self.transition_if(generation, ConnectionState::Connecting) {
                        return;
                    }
                }
                Some(Decision::GiveUp) => {
                    warn!(max = config.max_reconnect_attempts, "reconnect attempts exhausted");
                    return;
                }
                None => return,
            }
        }
    }

    /// Pump one open link until it ends.
    async fn drive(
        &self,
        config: &ConnectionConfig,
        generation: u64,
        link: TransportLink,
        cancel: &CancellationToken,
    ) -> LinkEnd {
        let TransportLink { outbound, mut inbound } = link;
        {
            let mut ctl = self.control.lock();
            if ctl.generation != generation {
                let _ = outbound.try_send(client_close());
                return LinkEnd::Stale;
            }
            ctl.outbound = Some(outbound.clone());
            self.transition(&mut ctl, ConnectionState::Connected);
            if config.heartbeat_enabled {
                let token = CancellationToken::new();
                ctl.heartbeat = Some(token.clone());
                tokio::spawn(heartbeat(outbound.clone(), config.heartbeat_interval(), token));
            }
        }
        info!(endpoint = %config.endpoint, "connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, outbound.send(client_close())).await;
                    return LinkEnd::Cancelled;
                }
                event = inbound.recv() => match event {
                    Some(TransportEvent::Text(text)) => self.dispatch(&text),
                    Some(TransportEvent::Closed { code: Some(NORMAL_CLOSE), .. }) => return LinkEnd::Normal,
                    Some(TransportEvent::Closed { code, reason }) => {
                        let code = code.map_or_else(|| "none".to_owned(), |c| c.to_string());
                        return LinkEnd::Abnormal(format!("closed with code {code}: {reason}"));
                    }
                    Some(TransportEvent::Error(e)) => return LinkEnd::Abnormal(e),
                    None => return LinkEnd::Abnormal("transport ended".to_owned()),
                }
            }
        }
    }

    /// Deliver one inbound text frame to every live subscriber.
    fn dispatch(&self, text: &str) {
        let envelope = match parse_inbound(text, epoch_ms()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(err = %e, len = text.len(), "dropping malformed frame");
                return;
            }
        };
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
    }
}

fn client_close() -> Frame {
    Frame::Close { code: NORMAL_CLOSE, reason: "client disconnect".to_owned() }
}

/// Sends a ping every `every` until cancelled or the link goes away.
async fn heartbeat(outbound: mpsc::Sender<Frame>, every: Duration, cancel: CancellationToken) {
    let mut timer = tokio::time::interval(every);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    timer.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {
                let ping = Envelope::ping().stamped(epoch_ms());
                let frame = match serde_json::to_string(&ping) {
                    Ok(text) => Frame::Text(text),
                    Err(_) => continue,
                };
                match outbound.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => debug!("heartbeat skipped, queue full"),
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
