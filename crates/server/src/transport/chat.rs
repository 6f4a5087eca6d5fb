// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket chat server.
//!
//! Every connection starts unauthenticated: the server sends an
//! `auth_challenge` and the client has ten seconds to answer with
//! `auth_response` before the socket closes with code 4002. Application
//! traffic only ever reaches authenticated clients.
//!
//! Broadcast payloads are tagged with a monotonic `seq` assigned under the
//! hub lock and retained in a bounded replay buffer for `sync` gap
//! recovery. Outbound delivery never blocks on a slow peer: each client
//! has a bounded queue, and overflow drops the client.

#[path = "chat_msg.rs"]
mod msg;
pub use msg::*;

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::bus::{epoch_ms, EventBus};
use crate::error::ErrorCode;
use crate::ratelimit::TokenBucket;
use crate::replay::ReplayBuffer;
use crate::store::{MessageInput, Role};
use crate::transport::auth::key_is_valid;
use crate::transport::state::AppState;

/// Outbound queue depth per client; overflow closes the client.
const CLIENT_QUEUE: usize = 256;

struct HubInner {
    seq: u64,
    replay: ReplayBuffer,
    /// Authenticated clients only.
    clients: HashMap<String, mpsc::Sender<String>>,
}

/// Shared broadcast state for all chat connections.
pub struct ChatHub {
    inner: Mutex<HubInner>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                seq: 0,
                replay: ReplayBuffer::default(),
                clients: HashMap::new(),
            }),
        }
    }

    pub fn current_seq(&self) -> u64 {
        self.inner.lock().seq
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    fn register(&self, client_id: &str, tx: mpsc::Sender<String>) {
        self.inner.lock().clients.insert(client_id.to_owned(), tx);
    }

    fn unregister(&self, client_id: &str) {
        self.inner.lock().clients.remove(client_id);
    }

    /// Assign the next seq, build the payload with it, record it for
    /// replay, and fan it out to every authenticated client.
    ///
    /// Non-blocking: a client whose queue is full is dropped from the hub;
    /// its connection task notices the closed queue and shuts the socket.
    pub fn broadcast(&self, make: impl FnOnce(u64) -> Value) -> u64 {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        let seq = inner.seq;
        let payload = make(seq);
        inner.replay.push(seq, payload.clone(), epoch_ms());

        let text = payload.to_string();
        inner.clients.retain(|client_id, tx| match tx.try_send(text.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client = client_id, "chat client too slow, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        seq
    }

    /// Replay-buffer entries with `seq > last_seen` as sync payloads.
    pub fn missed_since(&self, last_seen: u64) -> Vec<MissedEntry> {
        self.inner
            .lock()
            .replay
            .since(last_seen)
            .into_iter()
            .map(|e| MissedEntry { seq: e.seq, payload: e.payload })
            .collect()
    }

    /// Forward agent-originated chat traffic from the bus to WS clients.
    pub fn spawn_bus_forwarder(self: &Arc<Self>, bus: &EventBus) {
        let hub = Arc::clone(self);
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.kind == "chat:message" => {
                        let p = &event.payload;
                        let frame = serde_json::json!({
                            "type": "chat_message",
                            "id": p.get("id").cloned().unwrap_or_default(),
                            "from": p.get("from").cloned().unwrap_or_default(),
                            "to": p.get("to").cloned().unwrap_or_default(),
                            "body": p.get("body").cloned().unwrap_or_default(),
                            "ts": p.get("ts").cloned().unwrap_or_default(),
                        });
                        hub.broadcast(|seq| {
                            let mut frame = frame.clone();
                            if let Some(obj) = frame.as_object_mut() {
                                obj.insert("seq".to_owned(), seq.into());
                            }
                            frame
                        });
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /ws/chat` upgrade handler.
pub async fn chat_ws_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    if send_frame(&mut ws_tx, &ServerMessage::AuthChallenge {}).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    let mut authed = false;
    let mut last_seq_seen: u64 = 0;
    let mut message_tokens = TokenBucket::per_minute(60);
    let mut typing_tokens = TokenBucket::per_minute(30);
    let auth_deadline = tokio::time::Instant::now() + state.settings.auth_timeout;

    loop {
        tokio::select! {
            // Broadcast traffic queued by the hub.
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Dropped by the hub (slow consumer).
                    None => break,
                }
            }

            _ = tokio::time::sleep_until(auth_deadline), if !authed => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_AUTH_TIMEOUT,
                        reason: "auth timeout".into(),
                    })))
                    .await;
                break;
            }

            inbound = ws_rx.next() => {
                let message = match inbound {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };

                let value: Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => {
                        let frame = chat_error(ErrorCode::BadRequest, Some("invalid JSON"));
                        if send_frame(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let outcome = handle_client_frame(
                    &state,
                    &client_id,
                    &tx,
                    &mut authed,
                    &mut last_seq_seen,
                    &mut message_tokens,
                    &mut typing_tokens,
                    &value,
                )
                .await;

                match outcome {
                    FrameOutcome::Reply(frame) => {
                        if send_frame(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                    FrameOutcome::AuthFailed => {
                        let frame = chat_error(ErrorCode::AuthFailed, Some("invalid api key"));
                        let _ = send_frame(&mut ws_tx, &frame).await;
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: CLOSE_AUTH_FAILED,
                                reason: "auth failed".into(),
                            })))
                            .await;
                        break;
                    }
                    FrameOutcome::Silent => {}
                }
            }
        }
    }

    state.chat.unregister(&client_id);
}

enum FrameOutcome {
    Reply(ServerMessage),
    Silent,
    AuthFailed,
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_frame(
    state: &Arc<AppState>,
    client_id: &str,
    tx: &mpsc::Sender<String>,
    authed: &mut bool,
    last_seq_seen: &mut u64,
    message_tokens: &mut TokenBucket,
    typing_tokens: &mut TokenBucket,
    value: &Value,
) -> FrameOutcome {
    let frame_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    if frame_type == "auth_response" {
        let api_key = serde_json::from_value::<AuthResponse>(value.clone())
            .ok()
            .and_then(|auth| auth.api_key);
        if key_is_valid(api_key.as_deref(), &state.settings.api_keys) {
            *authed = true;
            state.chat.register(client_id, tx.clone());
            return FrameOutcome::Reply(ServerMessage::Connected {
                session_id: client_id.to_owned(),
                seq: state.chat.current_seq(),
            });
        }
        return FrameOutcome::AuthFailed;
    }

    if !*authed {
        return FrameOutcome::Reply(chat_error(ErrorCode::AuthFailed, Some("not authenticated")));
    }

    match frame_type {
        "message" => {
            if !message_tokens.try_acquire() {
                return FrameOutcome::Reply(chat_error(ErrorCode::RateLimited, None));
            }
            let inbound: InboundMessage = match serde_json::from_value(value.clone()) {
                Ok(inbound) => inbound,
                Err(_) => {
                    return FrameOutcome::Reply(chat_error(
                        ErrorCode::BadRequest,
                        Some("message requires to and body"),
                    ));
                }
            };
            handle_chat_message(state, client_id, inbound).await
        }

        "typing" => {
            if !typing_tokens.try_acquire() {
                // Silently dropped: no error, no broadcast.
                return FrameOutcome::Silent;
            }
            let inbound: InboundTyping = match serde_json::from_value(value.clone()) {
                Ok(inbound) => inbound,
                Err(_) => return FrameOutcome::Silent,
            };
            let from = client_id.to_owned();
            state.chat.broadcast(move |seq| {
                serde_json::json!({
                    "type": "typing", "seq": seq, "from": from, "state": inbound.state,
                })
            });
            FrameOutcome::Silent
        }

        "ack" => {
            if let Ok(ack) = serde_json::from_value::<InboundAck>(value.clone()) {
                *last_seq_seen = (*last_seq_seen).max(ack.seq);
            }
            FrameOutcome::Silent
        }

        "sync" => match serde_json::from_value::<InboundSync>(value.clone()) {
            Ok(sync) => {
                let missed = state.chat.missed_since(sync.last_seq_seen);
                FrameOutcome::Reply(ServerMessage::SyncResponse { missed })
            }
            Err(_) => FrameOutcome::Reply(chat_error(
                ErrorCode::BadRequest,
                Some("sync requires lastSeqSeen"),
            )),
        },

        _ => FrameOutcome::Reply(chat_error(ErrorCode::UnknownType, Some(frame_type))),
    }
}

/// Persist, attempt agent delivery, broadcast, acknowledge — in that
/// order. Persistence is best-effort-logged; agent delivery failure never
/// suppresses the broadcast.
async fn handle_chat_message(
    state: &Arc<AppState>,
    client_id: &str,
    inbound: InboundMessage,
) -> FrameOutcome {
    let session = state
        .registry
        .find_by_name(&inbound.to)
        .into_iter()
        .next();

    let input = MessageInput {
        id: inbound.id.clone(),
        session_id: session.as_ref().map(|s| s.id.clone()),
        recipient: Some(inbound.to.clone()),
        role: Role::User,
        body: inbound.body.clone(),
        ..Default::default()
    };
    let message_id = match state.store.insert_message(input) {
        Ok(message) => message.id,
        Err(e) => {
            tracing::warn!(err = %e, "chat message persist failed");
            inbound.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
        }
    };

    // Route to the addressed agent's terminal if it has a live session.
    if let Some(session) = session {
        if !state.bridge.send_input(&session.id, &inbound.body).await {
            tracing::debug!(to = inbound.to, "agent delivery failed");
        }
    }

    let from = client_id.to_owned();
    let id = message_id.clone();
    let to = inbound.to.clone();
    let body = inbound.body.clone();
    state.chat.broadcast(move |seq| {
        serde_json::json!({
            "type": "chat_message",
            "seq": seq, "id": id, "from": from, "to": to, "body": body,
            "ts": epoch_ms(),
        })
    });

    FrameOutcome::Reply(ServerMessage::Delivered {
        client_id: client_id.to_owned(),
        message_id,
    })
}

async fn send_frame<S>(tx: &mut S, frame: &ServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "chat_tests.rs"]
mod tests;
