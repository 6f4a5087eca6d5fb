// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state passed to all handlers via axum `State`.

use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::bead::BeadClient;
use crate::bridge::SessionBridge;
use crate::bus::EventBus;
use crate::gateway::ToolGateway;
use crate::registry::SessionRegistry;
use crate::store::MessageStore;
use crate::transport::chat::ChatHub;

/// Transport-relevant settings (a slice of the full config).
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Accepted API keys. Empty disables authentication.
    pub api_keys: Vec<String>,
    /// Deadline for the chat auth handshake.
    pub auth_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { api_keys: Vec::new(), auth_timeout: Duration::from_secs(10) }
    }
}

pub struct AppState {
    pub settings: ServerSettings,
    pub bus: Arc<EventBus>,
    pub registry: Arc<SessionRegistry>,
    pub bridge: Arc<SessionBridge>,
    pub store: Arc<MessageStore>,
    pub bead: Arc<BeadClient>,
    pub gateway: Arc<ToolGateway>,
    pub chat: Arc<ChatHub>,
    pub sse_clients: AtomicI32,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("auth", &!self.settings.api_keys.is_empty())
            .field("sessions", &self.registry.len())
            .finish()
    }
}
