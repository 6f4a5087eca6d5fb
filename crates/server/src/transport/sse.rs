// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent-events gateway.
//!
//! Every bus event is emitted as an SSE frame carrying `id: <seq>`; a
//! reconnecting client presents `Last-Event-ID` and events at or below
//! that sequence are suppressed until the live stream overtakes it.

use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::{self, Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;

use crate::bus::{epoch_ms, BusEvent};
use crate::transport::auth::validate_request;
use crate::transport::state::AppState;
use crate::transport::ErrorResponse;

/// Translate an internal bus kind to its public SSE event name, with an
/// optional `action` field injected into the payload.
pub fn public_event_name(kind: &str) -> (String, Option<&'static str>) {
    match kind {
        "bead:created" => ("bead_update".to_owned(), Some("created")),
        "bead:updated" => ("bead_update".to_owned(), Some("updated")),
        "bead:closed" => ("bead_update".to_owned(), Some("closed")),
        "mail:received" => ("mail_received".to_owned(), None),
        "agent:status_changed" => ("agent_status".to_owned(), None),
        "power:state" => ("power_state".to_owned(), None),
        "mode:changed" => ("mode_changed".to_owned(), None),
        "stream:status" => ("stream_status".to_owned(), None),
        other => (other.replace(':', "_"), None),
    }
}

fn to_sse_event(event: &BusEvent) -> Event {
    let (name, action) = public_event_name(&event.kind);
    let mut payload = event.payload.clone();
    if let (Some(action), Some(obj)) = (action, payload.as_object_mut()) {
        obj.insert("action".to_owned(), action.into());
    }
    Event::default().id(event.seq.to_string()).event(name).data(payload.to_string())
}

/// Decrements the gateway's client count when the stream is dropped.
struct ClientGuard(Arc<AppState>);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.sse_clients.fetch_sub(1, Ordering::Relaxed);
    }
}

/// `GET /api/events` — long-lived event stream.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, impl IntoResponse> {
    if let Err(code) = validate_request(&headers, uri.query(), &state.settings.api_keys) {
        let status = axum::http::StatusCode::from_u16(code.http_status())
            .unwrap_or(axum::http::StatusCode::UNAUTHORIZED);
        return Err((status, axum::Json(ErrorResponse::new(code, "unauthorized"))));
    }

    let last_seen: Option<u64> = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok());

    state.sse_clients.fetch_add(1, Ordering::Relaxed);
    let guard = ClientGuard(Arc::clone(&state));

    let connected = Event::default().event("connected").data(
        json!({ "seq": state.bus.current_seq(), "serverTime": epoch_ms() }).to_string(),
    );

    let rx = state.bus.subscribe();
    let live = BroadcastStream::new(rx).filter_map(move |result| {
        // The guard lives as long as the stream does.
        let _alive = &guard;
        let event = match result {
            Ok(event) => event,
            // Lagged subscribers skip ahead; the id gap is the client's
            // signal to resync via Last-Event-ID on reconnect.
            Err(_) => return futures_util::future::ready(None),
        };
        if let Some(last_seen) = last_seen {
            if event.seq <= last_seen {
                return futures_util::future::ready(None);
            }
        }
        futures_util::future::ready(Some(Ok(to_sse_event(&event))))
    });

    let stream = stream::once(futures_util::future::ready(Ok(connected))).chain(live);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
