// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport for the agent tool-RPC.
//!
//! An agent connects to `/ws/tools?agent=<id>` and the server binds the
//! connection to that identity for its lifetime: a fresh transport
//! session id is minted at upgrade, registered with the gateway, and
//! every tool call on this socket resolves to it. Request/response frames
//! are JSON: `{"id": n, "tool": "...", "args": {...}}` in,
//! `{"id": n, "result": ...}` out.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::transport::auth::validate_request;
use crate::transport::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsQuery {
    pub agent: Option<String>,
    #[allow(dead_code)]
    pub token: Option<String>,
}

/// `GET /ws/tools` upgrade handler.
pub async fn tools_ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ToolsQuery>,
    headers: HeaderMap,
    uri: axum::http::Uri,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if validate_request(&headers, uri.query(), &state.settings.api_keys).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    let Some(agent_id) = query.agent.filter(|a| !a.is_empty()) else {
        return axum::http::Response::builder()
            .status(400)
            .body(axum::body::Body::from("agent query parameter is required"))
            .unwrap_or_default()
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_connection(state, socket, agent_id))
        .into_response()
}

async fn handle_connection(state: Arc<AppState>, socket: WebSocket, agent_id: String) {
    // Identity binds to the transport session, not to anything the agent
    // sends later.
    let transport_session_id = uuid::Uuid::new_v4().to_string();
    state.gateway.connect(&transport_session_id, &agent_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(m) => m,
            Err(_) => break,
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let request: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => {
                let reply = json!({ "id": null, "result": { "error": "invalid JSON" } });
                if send_json(&mut ws_tx, &reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let tool = request.get("tool").and_then(Value::as_str).unwrap_or("");
        let args = request.get("args").cloned().unwrap_or_else(|| json!({}));

        let result = state.gateway.handle_call(&transport_session_id, tool, &args).await;
        let reply = json!({ "id": id, "result": result });
        if send_json(&mut ws_tx, &reply).await.is_err() {
            break;
        }
    }

    // Transport-level close and explicit disconnect converge here; the
    // gateway makes the second call a no-op.
    state.gateway.disconnect(&transport_session_id);
}

async fn send_json<S>(tx: &mut S, value: &Value) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    tx.send(Message::Text(value.to_string().into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
