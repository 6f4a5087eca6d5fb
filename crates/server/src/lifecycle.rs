// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle: create/kill/probe/discover atop the mux adapter and
//! the registry, with a hard concurrency cap.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::error::ErrorCode;
use crate::mux::{MuxAdapter, MuxError};
use crate::registry::{
    RegistryError, Session, SessionDraft, SessionMode, SessionPatch, SessionRegistry,
    SessionStatus, WorkspaceType,
};

/// Prefix for mux sessions owned by this server.
pub const MUX_NAME_PREFIX: &str = "adj-";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Session limit reached")]
    LimitReached,
    #[error("already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Mux(#[from] MuxError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LifecycleError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LimitReached => ErrorCode::SessionLimitReached,
            Self::AlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            Self::Mux(_) => ErrorCode::MuxFailure,
            Self::Registry(RegistryError::DuplicateMuxSession(_)) => {
                ErrorCode::SessionAlreadyExists
            }
            Self::Registry(RegistryError::NotFound(_)) => ErrorCode::NotFound,
            Self::Registry(RegistryError::Persist(_)) => ErrorCode::Internal,
        }
    }
}

/// Settings the lifecycle manager needs (a slice of the full config).
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Hard cap on concurrently registered sessions.
    pub max_sessions: usize,
    /// The agent CLI binary launched inside each new session.
    pub agent_command: String,
    /// Default arguments for the agent CLI. Includes the permissions-skip
    /// flag unless the caller overrides the argument list per session.
    pub agent_args: Vec<String>,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            agent_command: "claude".to_owned(),
            agent_args: vec!["--dangerously-skip-permissions".to_owned()],
        }
    }
}

/// Request to create a new session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub name: String,
    pub project_path: PathBuf,
    pub mode: SessionMode,
    pub workspace_type: WorkspaceType,
    /// Overrides the default agent CLI arguments when present.
    pub agent_args: Option<Vec<String>>,
}

pub struct LifecycleManager {
    mux: Arc<dyn MuxAdapter>,
    registry: Arc<SessionRegistry>,
    settings: LifecycleSettings,
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '-' })
        .collect()
}

/// Compute the mux-session name for a session mode and display name.
pub fn mux_session_name(mode: SessionMode, name: &str) -> String {
    match mode {
        SessionMode::Standalone => format!("{MUX_NAME_PREFIX}{}", sanitize(name)),
        SessionMode::Swarm => format!("{MUX_NAME_PREFIX}swarm-{}", sanitize(name)),
        SessionMode::External => sanitize(name),
    }
}

impl LifecycleManager {
    pub fn new(
        mux: Arc<dyn MuxAdapter>,
        registry: Arc<SessionRegistry>,
        settings: LifecycleSettings,
    ) -> Self {
        Self { mux, registry, settings }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Create a new agent session: spawn the mux session at the project
    /// path, resolve its pane, launch the agent CLI in it, and register it.
    ///
    /// Any failure after the spawn kills the mux session again; the
    /// registry is only mutated on full success.
    pub async fn create_session(
        &self,
        req: CreateSessionRequest,
    ) -> Result<Session, LifecycleError> {
        if self.registry.len() >= self.settings.max_sessions {
            return Err(LifecycleError::LimitReached);
        }

        let mux_name = mux_session_name(req.mode, &req.name);
        if self.mux.has_session(&mux_name).await? {
            return Err(LifecycleError::AlreadyExists(mux_name));
        }

        self.mux.new_session(&mux_name, &req.project_path, None).await?;

        // From here on, clean up the spawned session on any failure.
        let session = match self.finish_create(&req, &mux_name).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(kill_err) = self.mux.kill_session(&mux_name).await {
                    tracing::warn!(mux = mux_name, err = %kill_err, "cleanup kill failed");
                }
                return Err(e);
            }
        };

        tracing::info!(
            id = session.id,
            mux = session.mux_session,
            pane = session.mux_pane,
            "session created"
        );
        Ok(session)
    }

    async fn finish_create(
        &self,
        req: &CreateSessionRequest,
        mux_name: &str,
    ) -> Result<Session, LifecycleError> {
        let pane = self.mux.list_panes(mux_name).await?;

        let args = req.agent_args.as_ref().unwrap_or(&self.settings.agent_args);
        let invocation = if args.is_empty() {
            self.settings.agent_command.clone()
        } else {
            format!("{} {}", self.settings.agent_command, args.join(" "))
        };
        self.mux.send_keys(&pane, &invocation, true).await?;

        let session = self.registry.create(SessionDraft {
            name: req.name.clone(),
            mux_session: mux_name.to_owned(),
            mux_pane: pane,
            project_path: req.project_path.clone(),
            mode: req.mode,
            workspace_type: req.workspace_type,
        })?;
        Ok(session)
    }

    /// Best-effort teardown: kill the mux session (the pane may already be
    /// gone), then drop the registry entry. Returns whether an entry was
    /// removed.
    pub async fn kill_session(&self, id: &str) -> bool {
        let Some(session) = self.registry.get(id) else {
            return false;
        };
        if let Err(e) = self.mux.kill_session(&session.mux_session).await {
            tracing::debug!(id, mux = session.mux_session, err = %e, "kill_session mux kill failed");
        }
        self.registry.delete(id)
    }

    pub async fn is_alive(&self, id: &str) -> bool {
        let Some(session) = self.registry.get(id) else {
            return false;
        };
        self.mux.has_session(&session.mux_session).await.unwrap_or(false)
    }

    /// Register mux sessions that exist but are unknown to the registry.
    ///
    /// A missing mux daemon is not an error; it just means nothing to
    /// discover. A session whose pane cannot be resolved is registered
    /// anyway with the session name as a best-effort pane target.
    pub async fn discover_sessions(&self, prefix: Option<&str>) -> Vec<String> {
        let names = match self.mux.list_sessions().await {
            Ok(names) => names,
            Err(e) => {
                tracing::debug!(err = %e, "mux daemon unavailable, nothing to discover");
                return Vec::new();
            }
        };

        let mut registered = Vec::new();
        for name in names {
            if let Some(prefix) = prefix {
                if !name.starts_with(prefix) {
                    continue;
                }
            }
            if self.registry.find_by_mux_name(&name).is_some() {
                continue;
            }
            if self.registry.len() >= self.settings.max_sessions {
                tracing::warn!(mux = name, "session limit reached, skipping discovery");
                break;
            }

            let pane = match self.mux.list_panes(&name).await {
                Ok(pane) => pane,
                Err(e) => {
                    tracing::debug!(mux = name, err = %e, "pane unresolved, registering by name");
                    name.clone()
                }
            };

            match self.registry.create(SessionDraft {
                name: name.clone(),
                mux_session: name.clone(),
                mux_pane: pane,
                project_path: PathBuf::from("."),
                mode: SessionMode::External,
                workspace_type: WorkspaceType::Primary,
            }) {
                Ok(session) => registered.push(session.id),
                Err(e) => {
                    tracing::warn!(mux = name, err = %e, "discovery registration failed");
                }
            }
        }
        registered
    }

    /// Startup reconciliation: mark registry entries whose mux session no
    /// longer exists as offline (they are retained; discovery may
    /// re-attach them or a client may delete them).
    pub async fn recover(&self) {
        for session in self.registry.get_all() {
            let alive = self.mux.has_session(&session.mux_session).await.unwrap_or(false);
            if !alive && session.status != SessionStatus::Offline {
                let patch =
                    SessionPatch { status: Some(SessionStatus::Offline), ..Default::default() };
                if let Err(e) = self.registry.update(&session.id, patch) {
                    tracing::warn!(id = session.id, err = %e, "offline marking failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
