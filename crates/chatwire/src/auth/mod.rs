// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request pipeline: refresh coordination and the REST client.

pub mod client;
pub mod coordinator;
pub mod refresh;

pub use client::ApiClient;
pub use coordinator::RefreshCoordinator;
pub use refresh::{HttpRefresher, RefreshError, TokenGrant, TokenRefresher};

/// Paths of the endpoints that manage the session itself. An unauthorized
/// response from one of these never triggers a refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_owned(),
            refresh: "/auth/refresh".to_owned(),
            logout: "/auth/logout".to_owned(),
        }
    }
}

impl AuthEndpoints {
    /// Match on the path component, ignoring any query string.
    pub fn is_auth_endpoint(&self, endpoint: &str) -> bool {
        let path = endpoint.split(&['?', '#'][..]).next().unwrap_or(endpoint);
        [&self.login, &self.refresh, &self.logout].iter().any(|p| path.ends_with(p.as_str()))
    }
}
