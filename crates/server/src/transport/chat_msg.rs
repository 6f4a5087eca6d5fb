// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat WebSocket wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Close code for an expired auth handshake.
pub const CLOSE_AUTH_TIMEOUT: u16 = 4002;
/// Close code for a rejected key.
pub const CLOSE_AUTH_FAILED: u16 = 4003;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthChallenge {},
    Connected {
        session_id: String,
        seq: u64,
    },
    ChatMessage {
        seq: u64,
        id: String,
        from: String,
        to: String,
        body: String,
        ts: u64,
    },
    Typing {
        seq: u64,
        from: String,
        state: String,
    },
    Delivered {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
    },
    SyncResponse {
        missed: Vec<MissedEntry>,
    },
    Error {
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissedEntry {
    pub seq: u64,
    pub payload: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default, rename = "apiKey")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub to: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundTyping {
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundAck {
    pub seq: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundSync {
    #[serde(rename = "lastSeqSeen")]
    pub last_seq_seen: u64,
}

/// Build a chat error frame.
pub fn chat_error(code: ErrorCode, message: Option<&str>) -> ServerMessage {
    ServerMessage::Error {
        code: code.as_str().to_owned(),
        message: message.map(str::to_owned),
    }
}
