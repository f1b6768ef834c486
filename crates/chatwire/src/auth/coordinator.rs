// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token Refresh Coordinator: single-flight refresh with FIFO replay.
//!
//! Every authenticated call goes through [`RefreshCoordinator::execute`].
//! When a call comes back unauthorized, the caller joins the one
//! [`RefreshFlight`] for this credential store, opening it if none is
//! running. The flight owns the queue of waiting callers, so "a refresh is
//! running" and "where late callers wait" are the same piece of state. When
//! the refresh settles, every queued caller is replayed with the new token
//! (or rejected) in the order it queued.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::refresh::{RefreshError, TokenRefresher};
use crate::auth::AuthEndpoints;
use crate::credential::{CredentialStore, LogoutReason};
use crate::epoch_ms;
use crate::error::ApiError;

/// Wraps authenticated calls with transparent token refresh.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    endpoints: AuthEndpoints,
    flight: Mutex<Option<RefreshFlight>>,
    next_flight_id: AtomicU64,
}

/// The single outstanding refresh and the callers waiting on it.
struct RefreshFlight {
    id: u64,
    started: Instant,
    queue: VecDeque<PendingRequest>,
}

/// One caller blocked on a refresh flight.
struct PendingRequest {
    endpoint: String,
    waiter: Box<dyn Waiter>,
}

/// Type-erased replay handle: the caller's request factory plus the channel
/// its result goes back on.
trait Waiter: Send {
    /// Invoke the factory with `token`; the returned future completes the call.
    fn replay(self: Box<Self>, token: String) -> BoxFuture<'static, ()>;
    fn reject(self: Box<Self>, err: ApiError);
}

struct Waiting<F, T> {
    factory: F,
    reply: oneshot::Sender<Result<T, ApiError>>,
}

impl<F, Fut, T> Waiter for Waiting<F, T>
where
    F: FnMut(Option<String>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    T: Send + 'static,
{
    fn replay(self: Box<Self>, token: String) -> BoxFuture<'static, ()> {
        let Waiting { mut factory, reply } = *self;
        let call = factory(Some(token));
        async move {
            let _ = reply.send(call.await);
        }
        .boxed()
    }

    fn reject(self: Box<Self>, err: ApiError) {
        let _ = self.reply.send(Err(err));
    }
}

/// What an unauthorized caller does next, decided under the flight lock.
enum Admission<F> {
    /// A refresh landed while this call was in flight; retry with that token.
    Retry(String, F),
    /// Joined the running flight.
    Queued,
    /// Opened a new flight.
    Lead(u64),
    /// Nothing to refresh with.
    NoRefreshToken,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        endpoints: AuthEndpoints,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                endpoints,
                flight: Mutex::new(None),
                next_flight_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.inner.endpoints
    }

    /// Whether a refresh flight is currently open.
    pub fn is_refreshing(&self) -> bool {
        self.inner.flight.lock().is_some()
    }

    /// Number of callers waiting on the open flight, including its opener.
    pub fn queued(&self) -> usize {
        self.inner.flight.lock().as_ref().map_or(0, |f| f.queue.len())
    }

    /// Run one authenticated call.
    ///
    /// `factory` receives the bearer token to attach (`None` when there is no
    /// unexpired token) and performs the call once per invocation. It is
    /// invoked at most twice: the first attempt, and one replay after a
    /// refresh. Calls to the login/refresh/logout endpoints never trigger a
    /// refresh.
    pub async fn execute<T, F, Fut>(&self, endpoint: &str, mut factory: F) -> Result<T, ApiError>
    where
        F: FnMut(Option<String>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        T: Send + 'static,
    {
        let used = self.inner.store.valid_access_token();
        match factory(used.clone()).await {
            Err(e) if e.is_unauthorized() && !self.inner.endpoints.is_auth_endpoint(endpoint) => {}
            other => return other,
        }

        let (reply, rx) = oneshot::channel();
        let admission = {
            let mut slot = self.inner.flight.lock();
            if let Some(flight) = slot.as_mut() {
                flight.queue.push_back(PendingRequest {
                    endpoint: endpoint.to_owned(),
                    waiter: Box::new(Waiting { factory, reply }),
                });
                debug!(endpoint, flight = flight.id, queued = flight.queue.len(), "queued behind refresh");
                Admission::Queued
            } else if let Some(current) =
                self.inner.store.valid_access_token().filter(|t| used.as_ref() != Some(t))
            {
                Admission::Retry(current, factory)
            } else if self.inner.store.refresh_token().is_none() {
                Admission::NoRefreshToken
            } else {
                let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let mut queue = VecDeque::new();
                queue.push_back(PendingRequest {
                    endpoint: endpoint.to_owned(),
                    waiter: Box::new(Waiting { factory, reply }),
                });
                *slot = Some(RefreshFlight { id, started: Instant::now(), queue });
                Admission::Lead(id)
            }
        };

        match admission {
            Admission::Retry(token, mut factory) => {
                debug!(endpoint, "token changed during call, replaying without refresh");
                return factory(Some(token)).await;
            }
            Admission::NoRefreshToken => {
                warn!(endpoint, "unauthorized with no refresh token, logging out");
                self.inner.store.clear(LogoutReason::SessionExpired, Some(endpoint.to_owned()));
                return Err(ApiError::SessionExpired);
            }
            Admission::Lead(id) => {
                debug!(endpoint, flight = id, "starting token refresh");
                let guard = FlightGuard { inner: Arc::clone(&self.inner), id, armed: true };
                tokio::spawn(guard.fly(endpoint.to_owned()));
            }
            Admission::Queued => {}
        }

        rx.await.unwrap_or(Err(ApiError::SessionExpired))
    }
}

impl Inner {
    /// Close flight `id`, returning its queue. Late arrivals after this point
    /// see no flight and use the store's current token.
    fn land(&self, id: u64) -> VecDeque<PendingRequest> {
        let mut slot = self.flight.lock();
        match slot.take() {
            Some(flight) if flight.id == id => {
                debug!(
                    flight = id,
                    waiters = flight.queue.len(),
                    elapsed_ms = flight.started.elapsed().as_millis() as u64,
                    "refresh flight landed"
                );
                flight.queue
            }
            other => {
                *slot = other;
                VecDeque::new()
            }
        }
    }
}

/// Runs one refresh flight. Rejects every waiter if dropped before landing
/// (task aborted or panicked).
struct FlightGuard {
    inner: Arc<Inner>,
    id: u64,
    armed: bool,
}

impl FlightGuard {
    async fn fly(mut self, return_to: String) {
        let inner = Arc::clone(&self.inner);
        let origin = inner.store.get();
        let spent = origin.as_ref().and_then(|s| s.refresh_token.clone());
        let outcome = match spent.clone() {
            Some(token) => inner.refresher.refresh(token).await,
            None => Err(RefreshError::NoRefreshToken),
        };

        let outcome = match (outcome, origin, spent.clone()) {
            (Ok(grant), Some(origin), Some(spent)) => {
                let session_id = grant.session_id.clone().unwrap_or(origin.session_id);
                let session = grant.into_session(session_id, epoch_ms());
                let token = session.access_token.clone();
                if inner.store.refresh_if(&spent, session) {
                    info!(flight = self.id, "access token refreshed");
                    Ok(token)
                } else {
                    warn!(flight = self.id, "session changed during refresh, grant discarded");
                    Err(ApiError::SessionExpired)
                }
            }
            (Ok(_), _, _) => Err(ApiError::SessionExpired),
            (Err(e), _, _) => {
                warn!(flight = self.id, err = %e, "token refresh failed, session expired");
                inner.store.clear_if(spent.as_deref(), LogoutReason::SessionExpired, Some(return_to));
                Err(ApiError::SessionExpired)
            }
        };

        self.armed = false;
        let queue = inner.land(self.id);
        match outcome {
            Ok(token) => {
                // Factories are invoked here in queue order; join_all then polls in order.
                let replays: Vec<_> = queue
                    .into_iter()
                    .map(|p| {
                        debug!(endpoint = %p.endpoint, "replaying request");
                        p.waiter.replay(token.clone())
                    })
                    .collect();
                join_all(replays).await;
            }
            Err(err) => {
                for p in queue {
                    debug!(endpoint = %p.endpoint, "rejecting queued request");
                    p.waiter.reject(err.clone());
                }
            }
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if self.armed {
            for p in self.inner.land(self.id) {
                p.waiter.reject(ApiError::SessionExpired);
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
