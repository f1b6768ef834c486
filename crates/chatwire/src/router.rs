// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch of inbound envelopes to consumers by `type`.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::InboundEnvelope;

type Routes = HashMap<String, Vec<mpsc::UnboundedSender<InboundEnvelope>>>;

/// Routing table from envelope type to subscriber channels.
#[derive(Clone, Default)]
pub struct MessageRouter {
    routes: Arc<Mutex<Routes>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream of every envelope of type `kind` dispatched after this call.
    pub fn route(&self, kind: &str) -> UnboundedReceiverStream<InboundEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.lock().entry(kind.to_owned()).or_default().push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Deliver one envelope; returns how many subscribers received it.
    pub fn dispatch(&self, envelope: InboundEnvelope) -> usize {
        let mut routes = self.routes.lock();
        let Some(subscribers) = routes.get_mut(&envelope.kind) else {
            debug!(kind = %envelope.kind, "no route for envelope");
            return 0;
        };
        subscribers.retain(|tx| tx.send(envelope.clone()).is_ok());
        let delivered = subscribers.len();
        if delivered == 0 {
            routes.remove(&envelope.kind);
        }
        delivered
    }

    /// Number of envelope types with at least one subscriber.
    pub fn route_count(&self) -> usize {
        self.routes.lock().len()
    }

    /// Dispatch from `inbound` until it ends or `cancel` fires.
    pub async fn run<S>(&self, mut inbound: S, cancel: CancellationToken)
    where
        S: Stream<Item = InboundEnvelope> + Unpin,
    {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = inbound.next() => match next {
                    Some(envelope) => {
                        self.dispatch(envelope);
                    }
                    None => break,
                },
            }
        }
        debug!("router stopped");
    }
}
