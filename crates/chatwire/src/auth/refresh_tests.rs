// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parses_complete_response() -> anyhow::Result<()> {
    let body = serde_json::json!({
        "access_token": "a2",
        "refresh_token": "r2",
        "expires_in": 3600,
        "token_type": "Bearer"
    })
    .to_string();
    let grant = parse_token_response(&body)?;
    assert_eq!(grant.access_token, "a2");
    assert_eq!(grant.refresh_token, "r2");
    assert_eq!(grant.expires_in_secs, 3600);
    assert!(grant.session_id.is_none());
    Ok(())
}

#[yare::parameterized(
    access_token  = { r#"{"refresh_token":"r","expires_in":1,"token_type":"Bearer"}"#, "access_token" },
    refresh_token = { r#"{"access_token":"a","expires_in":1,"token_type":"Bearer"}"#, "refresh_token" },
    expires_in    = { r#"{"access_token":"a","refresh_token":"r","token_type":"Bearer"}"#, "expires_in" },
    token_type    = { r#"{"access_token":"a","refresh_token":"r","expires_in":1}"#, "token_type" },
    empty_access  = { r#"{"access_token":"","refresh_token":"r","expires_in":1,"token_type":"Bearer"}"#, "access_token" },
)]
fn rejects_incomplete_response(body: &str, missing: &'static str) {
    assert_eq!(parse_token_response(body), Err(RefreshError::Incomplete(missing)));
}

#[test]
fn rejects_non_json_response() {
    assert!(matches!(parse_token_response("<html>"), Err(RefreshError::Decode(_))));
}

#[test]
fn grant_anchors_expiry_at_now() {
    let grant = TokenGrant {
        access_token: "a".to_owned(),
        refresh_token: "r".to_owned(),
        expires_in_secs: 60,
        token_type: "Bearer".to_owned(),
        session_id: None,
    };
    let session = grant.into_session("s1".to_owned(), 1_000);
    assert_eq!(session.expires_at_ms, 61_000);
    assert_eq!(session.refresh_token.as_deref(), Some("r"));
    assert_eq!(session.session_id, "s1");
}
