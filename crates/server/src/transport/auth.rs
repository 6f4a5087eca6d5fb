// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ErrorCode;
use crate::transport::state::AppState;
use crate::transport::ErrorResponse;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Whether the presented key passes. An empty key set disables auth.
pub fn key_is_valid(presented: Option<&str>, keys: &[String]) -> bool {
    if keys.is_empty() {
        return true;
    }
    match presented {
        Some(presented) => keys.iter().any(|key| constant_time_eq(presented, key)),
        None => false,
    }
}

/// Validate a Bearer token or `?token=` query parameter against the
/// configured keys.
pub fn validate_request(
    headers: &HeaderMap,
    query: Option<&str>,
    keys: &[String],
) -> Result<(), ErrorCode> {
    if keys.is_empty() {
        return Ok(());
    }

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if key_is_valid(bearer, keys) && bearer.is_some() {
        return Ok(());
    }

    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("token=") {
                if key_is_valid(Some(value), keys) {
                    return Ok(());
                }
            }
        }
    }

    Err(ErrorCode::AuthFailed)
}

/// Axum middleware enforcing API-key auth on HTTP routes.
///
/// Health checks and the WebSocket/SSE endpoints are exempt; those
/// validate inside their own handlers (the chat socket runs the
/// challenge/response handshake instead).
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/v1/health" || path == "/ws/chat" || path == "/ws/tools" || path == "/api/events"
    {
        return next.run(req).await;
    }

    let query = req.uri().query().map(str::to_owned);
    if let Err(code) =
        validate_request(req.headers(), query.as_deref(), &state.settings.api_keys)
    {
        let body = ErrorResponse::new(code, "unauthorized");
        return (
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
            axum::Json(body),
        )
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
