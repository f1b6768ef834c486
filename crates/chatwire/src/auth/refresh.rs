// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh endpoint client and token response parsing.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;

use crate::credential::Session;

/// Why a refresh did not produce a new token pair.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    NoRefreshToken,
    #[error("refresh rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("token response missing {0}")]
    Incomplete(&'static str),
    #[error("refresh transport: {0}")]
    Transport(String),
    #[error("refresh response: {0}")]
    Decode(String),
}

/// A validated token grant from the refresh or login endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in_secs: u64,
    pub token_type: String,
    /// Only the login endpoint is expected to set this.
    pub session_id: Option<String>,
}

impl TokenGrant {
    /// Build the session this grant describes, anchored at `now_ms`.
    pub fn into_session(self, session_id: String, now_ms: u64) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: Some(self.refresh_token),
            session_id,
            expires_at_ms: now_ms.saturating_add(self.expires_in_secs.saturating_mul(1000)),
            token_type: self.token_type,
        }
    }
}

/// Raw token response. All fields optional so a partial response can be
/// reported precisely instead of as a generic decode error.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Parse a token response body. Access token, refresh token, expiry and
/// token type are all required.
pub fn parse_token_response(body: &str) -> Result<TokenGrant, RefreshError> {
    let resp: TokenResponse =
        serde_json::from_str(body).map_err(|e| RefreshError::Decode(e.to_string()))?;
    let access_token =
        resp.access_token.filter(|t| !t.is_empty()).ok_or(RefreshError::Incomplete("access_token"))?;
    let refresh_token = resp
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or(RefreshError::Incomplete("refresh_token"))?;
    let expires_in_secs = resp.expires_in.ok_or(RefreshError::Incomplete("expires_in"))?;
    let token_type =
        resp.token_type.filter(|t| !t.is_empty()).ok_or(RefreshError::Incomplete("token_type"))?;
    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_in_secs,
        token_type,
        session_id: resp.session_id,
    })
}

/// Exchanges a refresh token for a new grant.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'static, Result<TokenGrant, RefreshError>>;
}

/// Refresher that POSTs `{"refresh_token": ...}` to the refresh endpoint.
pub struct HttpRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpRefresher {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

impl TokenRefresher for HttpRefresher {
    fn refresh(&self, refresh_token: String) -> BoxFuture<'static, Result<TokenGrant, RefreshError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        async move {
            let resp = client
                .post(&url)
                .json(&serde_json::json!({ "refresh_token": refresh_token }))
                .send()
                .await
                .map_err(|e| RefreshError::Transport(e.to_string()))?;

            let status = resp.status();
            let body = resp.text().await.map_err(|e| RefreshError::Transport(e.to_string()))?;
            if !status.is_success() {
                return Err(RefreshError::Rejected { status: status.as_u16(), body });
            }
            parse_token_response(&body)
        }
        .boxed()
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
