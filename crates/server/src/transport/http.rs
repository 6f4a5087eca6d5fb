// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin HTTP adapters over the core services.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::bead::ExecOptions;
use crate::error::ErrorCode;
use crate::lifecycle::CreateSessionRequest;
use crate::registry::{SessionMode, WorkspaceType};
use crate::store::{MessageQuery, Role};
use crate::transport::state::AppState;
use crate::transport::ErrorResponse;

fn error_response(code: ErrorCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ErrorResponse::new(code, message)),
    )
}

// -- Health -------------------------------------------------------------------

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "running",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "sessions": state.registry.len(),
        "chat_clients": state.chat.client_count(),
        "sse_clients": state.sse_clients.load(std::sync::atomic::Ordering::Relaxed),
        "connected_agents": state.gateway.connected_agents().len(),
    }))
}

// -- Sessions -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    pub name: String,
    pub project_path: PathBuf,
    #[serde(default)]
    pub mode: SessionMode,
    #[serde(default)]
    pub workspace_type: WorkspaceType,
    #[serde(default)]
    pub agent_args: Option<Vec<String>>,
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bridge.list_sessions())
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionBody>,
) -> impl IntoResponse {
    let request = CreateSessionRequest {
        name: body.name,
        project_path: body.project_path,
        mode: body.mode,
        workspace_type: body.workspace_type,
        agent_args: body.agent_args,
    };
    match state.bridge.create_session(request).await {
        Ok(session) => {
            (StatusCode::CREATED, Json(json!({ "sessionId": session.id }))).into_response()
        }
        Err(e) => error_response(e.code(), &e.to_string()).into_response(),
    }
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.bridge.get_session(&id) {
        Some(session) => Json(session).into_response(),
        None => error_response(ErrorCode::NotFound, "session not found").into_response(),
    }
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let removed = state.bridge.kill_session(&id).await;
    Json(json!({ "removed": removed }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverBody {
    #[serde(default)]
    pub prefix: Option<String>,
}

pub async fn discover_sessions(
    State(state): State<Arc<AppState>>,
    body: Option<Json<DiscoverBody>>,
) -> impl IntoResponse {
    let prefix = body.and_then(|Json(b)| b.prefix);
    let ids = state
        .bridge
        .lifecycle()
        .discover_sessions(prefix.as_deref())
        .await;
    Json(json!({ "sessionIds": ids }))
}

#[derive(Debug, Deserialize)]
pub struct InputBody {
    pub text: String,
}

pub async fn send_input(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> impl IntoResponse {
    if state.bridge.get_session(&id).is_none() {
        return error_response(ErrorCode::NotFound, "session not found").into_response();
    }
    let delivered = state.bridge.send_input(&id, &body.text).await;
    Json(json!({ "delivered": delivered })).into_response()
}

pub async fn send_interrupt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.bridge.get_session(&id).is_none() {
        return error_response(ErrorCode::NotFound, "session not found").into_response();
    }
    let delivered = state.bridge.send_interrupt(&id).await;
    Json(json!({ "delivered": delivered })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PermissionBody {
    pub approved: bool,
}

pub async fn send_permission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PermissionBody>,
) -> impl IntoResponse {
    if state.bridge.get_session(&id).is_none() {
        return error_response(ErrorCode::NotFound, "session not found").into_response();
    }
    let delivered = state.bridge.send_permission_response(&id, body.approved).await;
    Json(json!({ "delivered": delivered })).into_response()
}

pub async fn session_buffer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.bridge.get_session(&id).is_none() {
        return error_response(ErrorCode::NotFound, "session not found").into_response();
    }
    Json(json!({ "lines": state.bridge.output_tail(&id) })).into_response()
}

// -- Messages -----------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesParams {
    pub agent_id: Option<String>,
    pub thread_id: Option<String>,
    pub role: Option<Role>,
    pub limit: Option<usize>,
    pub before: Option<u64>,
    pub after: Option<u64>,
    /// Search text (only used by the search route).
    pub q: Option<String>,
}

impl MessagesParams {
    fn to_query(&self) -> MessageQuery {
        MessageQuery {
            agent_id: self.agent_id.clone(),
            thread_id: self.thread_id.clone(),
            role: self.role,
            limit: self.limit,
            before: self.before,
            after: self.after,
        }
    }
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MessagesParams>,
) -> impl IntoResponse {
    match state.store.get_messages(&params.to_query()) {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => error_response(ErrorCode::StoreError, &e.to_string()).into_response(),
    }
}

pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MessagesParams>,
) -> impl IntoResponse {
    let Some(ref text) = params.q else {
        return error_response(ErrorCode::BadRequest, "q is required").into_response();
    };
    match state.store.search_messages(text, &params.to_query()) {
        Ok(messages) => Json(json!({ "messages": messages })).into_response(),
        Err(e) => error_response(ErrorCode::StoreError, &e.to_string()).into_response(),
    }
}

pub async fn mark_message_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.mark_read(&id) {
        Ok(updated) => Json(json!({ "updated": updated })).into_response(),
        Err(e) => error_response(ErrorCode::StoreError, &e.to_string()).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAllBody {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ReadAllBody>>,
) -> impl IntoResponse {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    match state.store.mark_all_read(body.agent_id.as_deref(), body.session_id.as_deref()) {
        Ok(updated) => Json(json!({ "updated": updated })).into_response(),
        Err(e) => error_response(ErrorCode::StoreError, &e.to_string()).into_response(),
    }
}

pub async fn unread_counts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.get_unread_counts() {
        Ok(counts) => Json(json!({ "counts": counts })).into_response(),
        Err(e) => error_response(ErrorCode::StoreError, &e.to_string()).into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsParams {
    pub agent_id: Option<String>,
}

pub async fn list_threads(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThreadsParams>,
) -> impl IntoResponse {
    match state.store.get_threads(params.agent_id.as_deref()) {
        Ok(threads) => Json(json!({ "threads": threads })).into_response(),
        Err(e) => error_response(ErrorCode::StoreError, &e.to_string()).into_response(),
    }
}

// -- Agents -------------------------------------------------------------------

/// Connected agents, enriched with self-reported status where present.
pub async fn list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let agents: Vec<_> = state
        .gateway
        .connected_agents()
        .into_iter()
        .map(|agent| {
            let status = state.gateway.status_for(&agent.agent_id);
            json!({
                "agentId": agent.agent_id,
                "connectedAt": agent.connected_at,
                "status": status.as_ref().map(|s| s.status.clone()),
                "task": status.as_ref().and_then(|s| s.task.clone()),
                "updatedAt": status.map(|s| s.updated_at),
            })
        })
        .collect();
    Json(json!({ "agents": agents }))
}

// -- Bead passthrough ---------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeadBody {
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub parse_json: Option<bool>,
    #[serde(default)]
    pub stdin: Option<String>,
}

pub async fn exec_bead(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BeadBody>,
) -> impl IntoResponse {
    let opts = ExecOptions {
        cwd: body.cwd,
        timeout: body.timeout_ms.map(Duration::from_millis),
        parse_json: body.parse_json,
        stdin: body.stdin,
    };
    let result = state.bead.exec(&body.args, opts).await;
    Json(result)
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
