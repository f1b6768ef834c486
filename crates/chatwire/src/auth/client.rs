// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST client whose calls all go through the refresh coordinator.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::coordinator::RefreshCoordinator;
use crate::auth::refresh::{parse_token_response, HttpRefresher};
use crate::auth::AuthEndpoints;
use crate::credential::{CredentialStore, LogoutReason, Session};
use crate::epoch_ms;
use crate::error::ApiError;

/// HTTP client for the chat API.
pub struct ApiClient {
    base_url: String,
    http: Client,
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// Build a client that refreshes against `{base_url}/auth/refresh`.
    pub fn new(base_url: &str, timeout: Duration, store: Arc<CredentialStore>) -> Self {
        crate::install_crypto_provider();
        let http = Client::builder().timeout(timeout).build().unwrap_or_default();
        let base_url = base_url.trim_end_matches('/').to_owned();
        let endpoints = AuthEndpoints::default();
        let refresher = HttpRefresher::new(http.clone(), format!("{base_url}{}", endpoints.refresh));
        let coordinator = RefreshCoordinator::new(store, Arc::new(refresher), endpoints);
        Self { base_url, http, coordinator }
    }

    /// Build a client around an existing coordinator.
    pub fn with_coordinator(base_url: &str, http: Client, coordinator: RefreshCoordinator) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_owned(), http, coordinator }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        self.coordinator.store()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a JSON resource.
    pub async fn get_json<T>(&self, path: &str) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let body = self.send(Method::GET, path, None).await?;
        decode(&body)
    }

    /// POST JSON and decode the response body (`null` when empty).
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        let body = self.send(Method::POST, path, Some(value)).await?;
        decode(&body)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, None).await.map(|_| ())
    }

    /// Send one request through the coordinator and return the raw body.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<String, ApiError> {
        let factory = request_factory(self.http.clone(), method, self.url(path), body);
        self.coordinator.execute(path, factory).await
    }

    /// Log in and store the resulting session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let path = self.coordinator.endpoints().login.clone();
        let body = serde_json::json!({ "username": username, "password": password });
        let resp = self
            .http
            .post(self.url(&path))
            .json(&body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        let text = read_body(resp).await?;
        let grant = parse_token_response(&text).map_err(|e| ApiError::Decode(e.to_string()))?;
        let session_id =
            grant.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let session = grant.into_session(session_id, epoch_ms());
        self.store().set(session.clone());
        info!(session_id = %session.session_id, "logged in");
        Ok(session)
    }

    /// Log out. The server call is best effort; the local session is always
    /// cleared.
    pub async fn logout(&self) {
        let path = self.coordinator.endpoints().logout.clone();
        if self.store().is_authenticated() {
            if let Err(e) = self.send(Method::POST, &path, None).await {
                warn!(err = %e, "server logout failed");
            }
        }
        self.store().clear(LogoutReason::UserRequested, None);
    }
}

/// Factory for one request: each invocation sends it afresh with the given
/// bearer token.
fn request_factory(
    http: Client,
    method: Method,
    url: String,
    body: Option<serde_json::Value>,
) -> impl FnMut(Option<String>) -> BoxFuture<'static, Result<String, ApiError>> + Send + 'static {
    move |token| {
        let mut req = http.request(method.clone(), &url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        if let Some(ref body) = body {
            req = req.json(body);
        }
        async move {
            let resp = req.send().await.map_err(|e| ApiError::Transport(e.to_string()))?;
            read_body(resp).await
        }
        .boxed()
    }
}

/// Map a response to its body, or to the error its status implies.
async fn read_body(resp: reqwest::Response) -> Result<String, ApiError> {
    let status = resp.status();
    let text = resp.text().await.map_err(ApiError::from)?;
    if status.as_u16() == 401 {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        return Err(ApiError::Status { status: status.as_u16(), body: text });
    }
    Ok(text)
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}
