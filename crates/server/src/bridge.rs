// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session bridge: binds the mux adapter, throttle, parser, registry, and
//! event bus together per session.
//!
//! For every live session a tap task polls the pane for new output and
//! feeds lines through the throttle. A single consumer task drains
//! flushed batches, runs them through the per-session parser, and emits
//! `session:event` on the bus. The bridge also keeps a bounded tail of
//! raw lines per session so late-connecting viewers get a replay.

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bus::{epoch_ms, EventBus};
use crate::error::ErrorCode;
use crate::lifecycle::{CreateSessionRequest, LifecycleError, LifecycleManager};
use crate::mux::MuxAdapter;
use crate::parse::{OutputParser, ParsedEvent};
use crate::registry::{Session, SessionPatch, SessionRegistry, SessionStatus};
use crate::throttle::OutputThrottle;

/// Consecutive capture failures before a session is marked offline.
const MAX_CAPTURE_FAILURES: u32 = 3;

/// Minimum interval between persisted `last_activity` bumps.
const ACTIVITY_GRANULARITY_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub poll_interval: Duration,
    /// Scrollback lines requested from the pane on each capture.
    pub capture_lines: u32,
    /// Raw lines retained per session for viewer replay.
    pub buffer_lines: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            capture_lines: 200,
            buffer_lines: 300,
        }
    }
}

pub struct SessionBridge {
    mux: Arc<dyn MuxAdapter>,
    registry: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleManager>,
    throttle: Arc<OutputThrottle>,
    bus: Arc<EventBus>,
    settings: BridgeSettings,
    taps: Mutex<HashMap<String, CancellationToken>>,
    buffers: RwLock<HashMap<String, VecDeque<String>>>,
    /// Outstanding permission request per session, if any.
    pending_permission: Mutex<HashMap<String, String>>,
    last_activity_bump: Mutex<HashMap<String, u64>>,
    shutdown: CancellationToken,
}

impl SessionBridge {
    pub fn new(
        mux: Arc<dyn MuxAdapter>,
        registry: Arc<SessionRegistry>,
        lifecycle: Arc<LifecycleManager>,
        throttle: Arc<OutputThrottle>,
        bus: Arc<EventBus>,
        settings: BridgeSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            mux,
            registry,
            lifecycle,
            throttle,
            bus,
            settings,
            taps: Mutex::new(HashMap::new()),
            buffers: RwLock::new(HashMap::new()),
            pending_permission: Mutex::new(HashMap::new()),
            last_activity_bump: Mutex::new(HashMap::new()),
            shutdown: shutdown.clone(),
        }
    }

    /// Spawn the flush consumer and taps for every live session.
    pub fn start(self: &Arc<Self>) {
        self.spawn_flush_consumer();
        for session in self.registry.get_all() {
            if session.status != SessionStatus::Offline {
                self.install_tap(&session);
            }
        }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.registry.get_all()
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.registry.get(id)
    }

    /// Create a session via the lifecycle manager and start tapping it.
    pub async fn create_session(
        self: &Arc<Self>,
        req: CreateSessionRequest,
    ) -> Result<Session, LifecycleError> {
        let session = self.lifecycle.create_session(req).await?;
        self.install_tap(&session);
        Ok(session)
    }

    /// Tear down the tap and the session itself.
    pub async fn kill_session(&self, id: &str) -> bool {
        if let Some(token) = self.taps.lock().remove(id) {
            token.cancel();
        }
        self.throttle.remove(id);
        self.buffers.write().remove(id);
        self.pending_permission.lock().remove(id);
        self.lifecycle.kill_session(id).await
    }

    /// Attach a viewer client, optionally returning the buffered tail.
    pub fn connect_client(
        &self,
        session_id: &str,
        client_id: &str,
        replay: bool,
    ) -> Result<Option<Vec<String>>, ErrorCode> {
        if !self.registry.add_client(session_id, client_id) {
            return Err(ErrorCode::NotFound);
        }
        let buffer = if replay {
            Some(
                self.buffers
                    .read()
                    .get(session_id)
                    .map(|lines| lines.iter().cloned().collect())
                    .unwrap_or_default(),
            )
        } else {
            None
        };
        Ok(buffer)
    }

    pub fn disconnect_client(&self, session_id: &str, client_id: &str) {
        self.registry.remove_client(session_id, client_id);
    }

    /// The buffered tail of raw output lines for a session.
    pub fn output_tail(&self, session_id: &str) -> Vec<String> {
        self.buffers
            .read()
            .get(session_id)
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Send a line of input to the session's pane (with Enter).
    pub async fn send_input(&self, session_id: &str, text: &str) -> bool {
        let Some(session) = self.registry.get(session_id) else {
            return false;
        };
        match self.mux.send_keys(&session.mux_pane, text, true).await {
            Ok(()) => {
                self.bump_activity(session_id);
                true
            }
            Err(e) => {
                tracing::warn!(id = session_id, err = %e, "send_input failed");
                false
            }
        }
    }

    /// Deliver a Ctrl-C to the session's pane.
    pub async fn send_interrupt(&self, session_id: &str) -> bool {
        let Some(session) = self.registry.get(session_id) else {
            return false;
        };
        match self.mux.send_keys(&session.mux_pane, "\u{3}", false).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = session_id, err = %e, "send_interrupt failed");
                false
            }
        }
    }

    /// Answer an outstanding permission request. Returns false when none
    /// is pending for the session.
    pub async fn send_permission_response(&self, session_id: &str, approved: bool) -> bool {
        let pending = self.pending_permission.lock().remove(session_id);
        if pending.is_none() {
            return false;
        }
        let Some(session) = self.registry.get(session_id) else {
            return false;
        };
        let reply = if approved { "y" } else { "n" };
        let delivered = match self.mux.send_keys(&session.mux_pane, reply, true).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(id = session_id, err = %e, "permission reply failed");
                false
            }
        };
        if delivered {
            let status =
                if approved { SessionStatus::Working } else { SessionStatus::Idle };
            let _ = self
                .registry
                .update(session_id, SessionPatch { status: Some(status), ..Default::default() });
        }
        delivered
    }

    /// Whether a permission request is currently outstanding.
    pub fn pending_permission(&self, session_id: &str) -> Option<String> {
        self.pending_permission.lock().get(session_id).cloned()
    }

    pub fn stop(&self) {
        let mut taps = self.taps.lock();
        for (_, token) in taps.drain() {
            token.cancel();
        }
        drop(taps);
        self.throttle.shutdown();
    }

    // -- Output tap ------------------------------------------------------

    fn install_tap(self: &Arc<Self>, session: &Session) {
        let token = CancellationToken::new();
        {
            let mut taps = self.taps.lock();
            if let Some(old) = taps.insert(session.id.clone(), token.clone()) {
                old.cancel();
            }
        }

        let _ = self.registry.update(
            &session.id,
            SessionPatch { pipe_active: Some(true), ..Default::default() },
        );

        let bridge = Arc::clone(self);
        let session_id = session.id.clone();
        let pane = session.mux_pane.clone();
        tokio::spawn(async move {
            bridge.run_tap(session_id, pane, token).await;
        });
    }

    /// Poll the pane and feed new lines into the throttle. Transient
    /// capture failures are absorbed; persistent ones mark the session
    /// offline and end the tap.
    async fn run_tap(self: Arc<Self>, session_id: String, pane: String, token: CancellationToken) {
        let mut prev_lines: Vec<String> = Vec::new();
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }

            match self.mux.capture_pane(&pane, Some(self.settings.capture_lines)).await {
                Ok(capture) => {
                    failures = 0;
                    let next_lines = capture_lines(&capture);
                    for line in diff_new_lines(&prev_lines, &next_lines) {
                        self.throttle.push(&session_id, &line);
                    }
                    prev_lines = next_lines;
                }
                Err(e) => {
                    failures += 1;
                    tracing::debug!(id = session_id, err = %e, failures, "pane capture failed");
                    if failures >= MAX_CAPTURE_FAILURES {
                        tracing::warn!(id = session_id, "pane gone, marking session offline");
                        let patch = SessionPatch {
                            status: Some(SessionStatus::Offline),
                            ..Default::default()
                        };
                        let _ = self.registry.update(&session_id, patch);
                        break;
                    }
                }
            }
        }

        self.taps.lock().remove(&session_id);
        self.throttle.flush(&session_id);
        let _ = self.registry.update(
            &session_id,
            SessionPatch { pipe_active: Some(false), ..Default::default() },
        );
    }

    // -- Flush consumer --------------------------------------------------

    fn spawn_flush_consumer(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        let mut rx = self.throttle.subscribe();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut parsers: HashMap<String, OutputParser> = HashMap::new();
            loop {
                let batch = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    batch = rx.recv() => match batch {
                        Ok(batch) => batch,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "flush consumer lagged");
                            continue;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                };

                if bridge.registry.get(&batch.session_id).is_none() {
                    parsers.remove(&batch.session_id);
                    continue;
                }

                bridge.buffer_lines(&batch.session_id, &batch.lines);
                bridge.bump_activity(&batch.session_id);

                let parser = parsers.entry(batch.session_id.clone()).or_default();
                for line in &batch.lines {
                    for event in parser.parse_line(line) {
                        bridge.handle_parsed(&batch.session_id, event);
                    }
                }
            }
        });
    }

    fn buffer_lines(&self, session_id: &str, lines: &[String]) {
        let mut buffers = self.buffers.write();
        let buffer = buffers.entry(session_id.to_owned()).or_default();
        for line in lines {
            buffer.push_back(line.clone());
        }
        while buffer.len() > self.settings.buffer_lines {
            buffer.pop_front();
        }
    }

    fn handle_parsed(&self, session_id: &str, event: ParsedEvent) {
        match &event {
            ParsedEvent::Status { state } => {
                let status = match state.as_str() {
                    "working" | "thinking" => Some(SessionStatus::Working),
                    "idle" => Some(SessionStatus::Idle),
                    _ => None,
                };
                if let Some(status) = status {
                    let patch = SessionPatch { status: Some(status), ..Default::default() };
                    let _ = self.registry.update(session_id, patch);
                }
            }
            ParsedEvent::PermissionRequest { request_id, .. } => {
                self.pending_permission
                    .lock()
                    .insert(session_id.to_owned(), request_id.clone());
                let patch = SessionPatch {
                    status: Some(SessionStatus::WaitingPermission),
                    ..Default::default()
                };
                let _ = self.registry.update(session_id, patch);
            }
            _ => {}
        }

        self.bus.emit(
            "session:event",
            json!({ "sessionId": session_id, "event": event }),
        );
    }

    /// Persisted activity bumps are coarse; the registry rewrite per
    /// mutation makes per-line bumps too expensive.
    fn bump_activity(&self, session_id: &str) {
        let now = epoch_ms();
        let mut bumps = self.last_activity_bump.lock();
        let last = bumps.get(session_id).copied().unwrap_or(0);
        if now.saturating_sub(last) < ACTIVITY_GRANULARITY_MS {
            return;
        }
        bumps.insert(session_id.to_owned(), now);
        drop(bumps);
        let _ = self.registry.update(
            session_id,
            SessionPatch { last_activity: Some(now), ..Default::default() },
        );
    }
}

/// Split a capture into lines, dropping the trailing blank rows the
/// multiplexer pads the screen with.
fn capture_lines(capture: &str) -> Vec<String> {
    let mut lines: Vec<String> = capture.lines().map(str::to_owned).collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    lines
}

/// Lines present in `next` but not yet seen in `prev`.
///
/// Finds the longest suffix of `prev` that is a prefix of `next` (the
/// overlap that survives scrolling) and returns everything after it. A
/// full redraw with no overlap re-emits the whole capture.
fn diff_new_lines(prev: &[String], next: &[String]) -> Vec<String> {
    let max_overlap = prev.len().min(next.len());
    for k in (1..=max_overlap).rev() {
        if prev[prev.len() - k..] == next[..k] {
            return next[k..].to_vec();
        }
    }
    next.to_vec()
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
