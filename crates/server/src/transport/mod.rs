// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API contract types and server wiring for HTTP, WebSocket, and SSE.

pub mod auth;
pub mod chat;
pub mod http;
pub mod sse;
pub mod state;
pub mod tools;

pub use state::AppState;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ErrorCode;

/// JSON error body shared by every HTTP adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            error: ErrorBody { code: code.as_str().to_owned(), message: message.to_owned() },
        }
    }
}

/// Build the full router over the shared application state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/sessions", get(http::list_sessions).post(http::create_session))
        .route("/api/v1/sessions/discover", post(http::discover_sessions))
        .route(
            "/api/v1/sessions/{id}",
            get(http::get_session).delete(http::delete_session),
        )
        .route("/api/v1/sessions/{id}/input", post(http::send_input))
        .route("/api/v1/sessions/{id}/interrupt", post(http::send_interrupt))
        .route("/api/v1/sessions/{id}/permission", post(http::send_permission))
        .route("/api/v1/sessions/{id}/buffer", get(http::session_buffer))
        .route("/api/v1/messages", get(http::list_messages))
        .route("/api/v1/messages/search", get(http::search_messages))
        .route("/api/v1/messages/read_all", post(http::mark_all_read))
        .route("/api/v1/messages/unread_counts", get(http::unread_counts))
        .route("/api/v1/messages/{id}/read", post(http::mark_message_read))
        .route("/api/v1/threads", get(http::list_threads))
        .route("/api/v1/agents", get(http::list_agents))
        .route("/api/v1/bead", post(http::exec_bead))
        .route("/api/events", get(sse::sse_handler))
        .route("/ws/chat", get(chat::chat_ws_handler))
        .route("/ws/tools", get(tools::tools_ws_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
