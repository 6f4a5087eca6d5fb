// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity-bound tool handlers for connected agents.
//!
//! Each tool-RPC transport session is associated with exactly one agent id
//! at session open; every tool call resolves the caller's identity from
//! the transport session, never from caller-supplied fields.

use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{epoch_ms, EventBus};
use crate::notify::Notifier;
use crate::store::{MessageInput, MessageQuery, MessageStore, Role};

/// An agent currently attached over the tool-RPC transport.
#[derive(Debug, Clone)]
pub struct ConnectedAgent {
    pub agent_id: String,
    pub transport_session_id: String,
    pub connected_at: u64,
}

/// Self-reported agent status, consulted by the agent-listing service for
/// agents that are still connected.
#[derive(Debug, Clone)]
pub struct AgentStatus {
    pub status: String,
    pub task: Option<String>,
    pub updated_at: u64,
}

pub struct ToolGateway {
    store: Arc<MessageStore>,
    bus: Arc<EventBus>,
    notifier: Arc<dyn Notifier>,
    /// Keyed by transport session id; `by_agent` is the reverse index.
    connected: RwLock<HashMap<String, ConnectedAgent>>,
    by_agent: RwLock<HashMap<String, String>>,
    status: RwLock<HashMap<String, AgentStatus>>,
}

impl ToolGateway {
    pub fn new(store: Arc<MessageStore>, bus: Arc<EventBus>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            bus,
            notifier,
            connected: RwLock::new(HashMap::new()),
            by_agent: RwLock::new(HashMap::new()),
            status: RwLock::new(HashMap::new()),
        }
    }

    /// Bind a transport session to an agent identity.
    pub fn connect(&self, transport_session_id: &str, agent_id: &str) {
        let agent = ConnectedAgent {
            agent_id: agent_id.to_owned(),
            transport_session_id: transport_session_id.to_owned(),
            connected_at: epoch_ms(),
        };
        self.connected.write().insert(transport_session_id.to_owned(), agent);
        self.by_agent.write().insert(agent_id.to_owned(), transport_session_id.to_owned());
        self.bus.emit("agent:connected", json!({ "agentId": agent_id }));
        tracing::info!(agent = agent_id, transport = transport_session_id, "agent connected");
    }

    /// Drop a transport session. Idempotent: the transport-close handler
    /// and an explicit disconnect converge here and the second call is a
    /// no-op.
    pub fn disconnect(&self, transport_session_id: &str) {
        let removed = self.connected.write().remove(transport_session_id);
        let Some(agent) = removed else {
            return;
        };
        // Only clear the reverse index if it still points at this session
        // (the agent may have reconnected with a new transport session).
        let mut by_agent = self.by_agent.write();
        if by_agent.get(&agent.agent_id).map(String::as_str) == Some(transport_session_id) {
            by_agent.remove(&agent.agent_id);
        }
        drop(by_agent);
        self.bus.emit("agent:disconnected", json!({ "agentId": agent.agent_id }));
        tracing::info!(agent = agent.agent_id, "agent disconnected");
    }

    pub fn connected_agents(&self) -> Vec<ConnectedAgent> {
        let mut agents: Vec<ConnectedAgent> = self.connected.read().values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub fn agent_for_session(&self, transport_session_id: &str) -> Option<String> {
        self.connected.read().get(transport_session_id).map(|a| a.agent_id.clone())
    }

    pub fn is_agent_connected(&self, agent_id: &str) -> bool {
        self.by_agent.read().contains_key(agent_id)
    }

    /// Status for an agent, ignoring stale entries from disconnected ones.
    pub fn status_for(&self, agent_id: &str) -> Option<AgentStatus> {
        if !self.is_agent_connected(agent_id) {
            return None;
        }
        self.status.read().get(agent_id).cloned()
    }

    /// Dispatch one tool call on behalf of a transport session.
    ///
    /// The response is always a single JSON value: the result, or
    /// `{"error": "..."}`.
    pub async fn handle_call(
        &self,
        transport_session_id: &str,
        tool: &str,
        args: &Value,
    ) -> Value {
        match tool {
            "send_message" => self.send_message(transport_session_id, args).await,
            "read_messages" => self.read_messages(args),
            "list_threads" => self.list_threads(args),
            "mark_read" => self.mark_read(args),
            "set_status" => self.set_status(transport_session_id, args),
            other => json!({ "error": format!("Unknown tool: {other}") }),
        }
    }

    async fn send_message(&self, transport_session_id: &str, args: &Value) -> Value {
        // Identity comes from the transport session; any identity field in
        // the arguments is ignored.
        let Some(agent_id) = self.agent_for_session(transport_session_id) else {
            return json!({ "error": "Unknown session" });
        };

        let to = args.get("to").and_then(Value::as_str).unwrap_or("user");
        let body = match args.get("body").and_then(Value::as_str) {
            Some(body) if !body.is_empty() => body,
            _ => return json!({ "error": "body is required" }),
        };
        let thread_id = args.get("threadId").and_then(Value::as_str).map(str::to_owned);
        let metadata = args.get("metadata").cloned().filter(|m| !m.is_null());

        let input = MessageInput {
            agent_id: Some(agent_id.clone()),
            recipient: Some(to.to_owned()),
            role: Role::Agent,
            body: body.to_owned(),
            metadata,
            thread_id,
            ..Default::default()
        };
        let message = match self.store.insert_message(input) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(agent = agent_id, err = %e, "message insert failed");
                return json!({ "error": format!("store error: {e}") });
            }
        };

        self.bus.emit(
            "chat:message",
            json!({
                "id": message.id,
                "from": agent_id,
                "to": to,
                "body": body,
                "threadId": message.thread_id,
                "ts": message.created_at,
            }),
        );
        self.bus.emit("mail:received", json!({ "id": message.id, "to": to }));

        if to == "user" {
            self.notifier.notify(&format!("Message from {agent_id}"), body).await;
        }

        json!({ "id": message.id, "deliveryStatus": message.delivery_status.as_str() })
    }

    fn read_messages(&self, args: &Value) -> Value {
        let query = MessageQuery {
            agent_id: args.get("agentId").and_then(Value::as_str).map(str::to_owned),
            thread_id: args.get("threadId").and_then(Value::as_str).map(str::to_owned),
            limit: args.get("limit").and_then(Value::as_u64).map(|n| n as usize),
            before: args.get("before").and_then(Value::as_u64),
            ..Default::default()
        };
        match self.store.get_messages(&query) {
            Ok(messages) => json!({ "messages": messages }),
            Err(e) => json!({ "error": format!("store error: {e}") }),
        }
    }

    fn list_threads(&self, args: &Value) -> Value {
        let agent_id = args.get("agentId").and_then(Value::as_str);
        match self.store.get_threads(agent_id) {
            Ok(threads) => json!({ "threads": threads }),
            Err(e) => json!({ "error": format!("store error: {e}") }),
        }
    }

    fn mark_read(&self, args: &Value) -> Value {
        let message_id = args.get("messageId").and_then(Value::as_str);
        let agent_id = args.get("agentId").and_then(Value::as_str);
        match (message_id, agent_id) {
            (Some(message_id), None) => match self.store.mark_read(message_id) {
                Ok(changed) => json!({ "updated": u64::from(changed) }),
                Err(e) => json!({ "error": format!("store error: {e}") }),
            },
            (None, Some(agent_id)) => match self.store.mark_all_read(Some(agent_id), None) {
                Ok(changed) => json!({ "updated": changed }),
                Err(e) => json!({ "error": format!("store error: {e}") }),
            },
            (Some(_), Some(_)) | (None, None) => {
                json!({ "error": "Either messageId or agentId is required" })
            }
        }
    }

    fn set_status(&self, transport_session_id: &str, args: &Value) -> Value {
        let Some(agent_id) = self.agent_for_session(transport_session_id) else {
            return json!({ "error": "Unknown session" });
        };
        let status = args.get("status").and_then(Value::as_str).unwrap_or("idle").to_owned();
        let task = args.get("task").and_then(Value::as_str).map(str::to_owned);

        self.status.write().insert(
            agent_id.clone(),
            AgentStatus { status: status.clone(), task: task.clone(), updated_at: epoch_ms() },
        );
        self.bus.emit(
            "agent:status_changed",
            json!({ "agentId": agent_id, "status": status, "task": task }),
        );
        json!({ "ok": true })
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
