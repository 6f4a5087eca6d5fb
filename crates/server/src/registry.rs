// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable session registry.
//!
//! Keys sessions by logical id. The registry is the sole writer of its
//! persistence file: every mutation updates the in-memory map, atomically
//! rewrites the JSON document (write-temp-then-rename), and emits
//! `session:updated` on the bus, in that order.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::bus::{epoch_ms, EventBus};

/// How the session was created, which drives mux-session naming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Standalone,
    Swarm,
    External,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceType {
    #[default]
    Primary,
    Worktree,
    Copy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Working,
    WaitingPermission,
    Offline,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::WaitingPermission => "waiting_permission",
            Self::Offline => "offline",
        }
    }
}

/// A registered agent session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub mux_session: String,
    pub mux_pane: String,
    pub project_path: PathBuf,
    pub mode: SessionMode,
    pub workspace_type: WorkspaceType,
    pub status: SessionStatus,
    /// Runtime-only: viewer clients currently attached to this session.
    #[serde(skip)]
    pub connected_clients: HashSet<String>,
    pub pipe_active: bool,
    pub created_at: u64,
    pub last_activity: u64,
}

/// Fields for registering a new session. Server-assigned fields (`id`,
/// `status`, timestamps) are filled in by [`SessionRegistry::create`].
#[derive(Debug, Clone)]
pub struct SessionDraft {
    pub name: String,
    pub mux_session: String,
    pub mux_pane: String,
    pub project_path: PathBuf,
    pub mode: SessionMode,
    pub workspace_type: WorkspaceType,
}

/// Partial update applied by [`SessionRegistry::update`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub mux_pane: Option<String>,
    pub pipe_active: Option<bool>,
    pub last_activity: Option<u64>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("mux session name already registered: {0}")]
    DuplicateMuxSession(String),
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("persist failed: {0}")]
    Persist(#[from] std::io::Error),
}

/// On-disk document shape.
#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedRegistry {
    sessions: Vec<Session>,
}

pub struct SessionRegistry {
    inner: parking_lot::RwLock<HashMap<String, Session>>,
    path: PathBuf,
    bus: Arc<EventBus>,
}

impl SessionRegistry {
    /// Load the registry from `path` (an absent file yields an empty
    /// registry). Entries are loaded as-is; liveness reconciliation is the
    /// lifecycle manager's job.
    pub fn load(path: PathBuf, bus: Arc<EventBus>) -> Self {
        let mut map = HashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<PersistedRegistry>(&contents) {
                Ok(doc) => {
                    for session in doc.sessions {
                        map.insert(session.id.clone(), session);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), err = %e, "registry file unreadable, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), err = %e, "registry file unreadable, starting empty");
            }
        }
        Self { inner: parking_lot::RwLock::new(map), path, bus }
    }

    /// Register a new session. Enforces mux-session uniqueness, assigns a
    /// fresh id, and initializes `status = idle`.
    pub fn create(&self, draft: SessionDraft) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();
        if inner.values().any(|s| s.mux_session == draft.mux_session) {
            return Err(RegistryError::DuplicateMuxSession(draft.mux_session));
        }

        let now = epoch_ms();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            name: draft.name,
            mux_session: draft.mux_session,
            mux_pane: draft.mux_pane,
            project_path: draft.project_path,
            mode: draft.mode,
            workspace_type: draft.workspace_type,
            status: SessionStatus::Idle,
            connected_clients: HashSet::new(),
            pipe_active: false,
            created_at: now,
            last_activity: now,
        };
        inner.insert(session.id.clone(), session.clone());
        self.persist_locked(&inner)?;
        drop(inner);

        self.bus.emit(
            "session:updated",
            json!({ "id": session.id, "fields": ["created"] }),
        );
        Ok(session)
    }

    /// Apply a partial update. Persists and emits `session:updated` with
    /// the changed field names.
    pub fn update(&self, id: &str, patch: SessionPatch) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();
        let session = inner.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_owned()))?;

        let mut fields = Vec::new();
        if let Some(status) = patch.status {
            if session.status != status {
                session.status = status;
                fields.push("status");
            }
        }
        if let Some(pane) = patch.mux_pane {
            session.mux_pane = pane;
            fields.push("mux_pane");
        }
        if let Some(pipe) = patch.pipe_active {
            session.pipe_active = pipe;
            fields.push("pipe_active");
        }
        if let Some(ts) = patch.last_activity {
            session.last_activity = ts;
            fields.push("last_activity");
        }

        let snapshot = session.clone();
        if !fields.is_empty() {
            self.persist_locked(&inner)?;
        }
        drop(inner);

        if !fields.is_empty() {
            self.bus.emit(
                "session:updated",
                json!({ "id": id, "fields": fields }),
            );
        }
        Ok(snapshot)
    }

    /// Remove a session. Returns whether an entry was removed.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.remove(id).is_some();
        if removed {
            if let Err(e) = self.persist_locked(&inner) {
                tracing::warn!(id, err = %e, "registry persist failed after delete");
            }
        }
        drop(inner);
        if removed {
            self.bus.emit("session:updated", json!({ "id": id, "fields": ["deleted"] }));
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.inner.read().get(id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Vec<Session> {
        self.inner.read().values().filter(|s| s.name == name).cloned().collect()
    }

    pub fn find_by_mux_name(&self, mux_session: &str) -> Option<Session> {
        self.inner.read().values().find(|s| s.mux_session == mux_session).cloned()
    }

    pub fn get_all(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.inner.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Attach a viewer client to a session (runtime state, not persisted).
    pub fn add_client(&self, id: &str, client_id: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.get_mut(id) {
            Some(session) => {
                session.connected_clients.insert(client_id.to_owned());
                true
            }
            None => false,
        }
    }

    /// Detach a viewer client. Safe to call for unknown sessions/clients.
    pub fn remove_client(&self, id: &str, client_id: &str) {
        if let Some(session) = self.inner.write().get_mut(id) {
            session.connected_clients.remove(client_id);
        }
    }

    /// Rewrite the persistence file atomically while holding the map lock,
    /// so files land on disk in mutation order.
    fn persist_locked(&self, map: &HashMap<String, Session>) -> Result<(), std::io::Error> {
        let mut sessions: Vec<&Session> = map.values().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let doc = json!({ "sessions": sessions });

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, &doc).map_err(std::io::Error::other)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
