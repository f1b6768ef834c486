// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable classification of client-side failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    SessionExpired,
    BadRequest,
    NotFound,
    UpstreamError,
    Transport,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::SessionExpired => 401,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::UpstreamError => 502,
            Self::Transport => 503,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Transport => "TRANSPORT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Classify an HTTP status returned by the API.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::NotFound,
            400..=499 => Self::BadRequest,
            _ => Self::UpstreamError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one authenticated API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The server rejected the bearer token (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,
    /// The session could not be refreshed; the user must log in again.
    #[error("session expired")]
    SessionExpired,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::SessionExpired => ErrorCode::SessionExpired,
            Self::Status { status, .. } => ErrorCode::from_http_status(*status),
            Self::Transport(_) => ErrorCode::Transport,
            Self::Decode(_) => ErrorCode::Internal,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(s) if s.as_u16() == 401 => Self::Unauthorized,
            Some(s) => Self::Status { status: s.as_u16(), body: e.to_string() },
            None if e.is_decode() => Self::Decode(e.to_string()),
            None => Self::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
