// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal-multiplexer adapters.

mod fake;
mod tmux;

pub use fake::{FakeMux, MuxCall};
pub use tmux::TmuxMux;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default per-call deadline for multiplexer commands.
pub const MUX_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from multiplexer operations.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("mux session not found: {0}")]
    NotFound(String),
    #[error("mux spawn failed: {0}")]
    SpawnFailed(String),
    #[error("mux command failed: {0}")]
    CommandFailed(String),
    #[error("mux command timed out after {0:?}")]
    Timeout(Duration),
}

/// Adapter over an external terminal multiplexer daemon.
///
/// All calls are bounded in time and do not retry; callers translate
/// failures into structured errors. `send_keys` preserves the exact byte
/// sequence it is given, including embedded newlines and control bytes.
#[async_trait]
pub trait MuxAdapter: Send + Sync + 'static {
    async fn has_session(&self, name: &str) -> Result<bool, MuxError>;

    /// Create a detached session at `cwd`, optionally running an initial
    /// command. Returns the multiplexer session name.
    async fn new_session(
        &self,
        name: &str,
        cwd: &Path,
        initial_command: Option<&str>,
    ) -> Result<String, MuxError>;

    async fn kill_session(&self, name: &str) -> Result<(), MuxError>;

    async fn list_sessions(&self) -> Result<Vec<String>, MuxError>;

    /// Resolve the first pane of a session to an addressable pane target.
    async fn list_panes(&self, name: &str) -> Result<String, MuxError>;

    /// Capture the visible contents (plus `lines` of scrollback when given)
    /// of a pane as text.
    async fn capture_pane(&self, pane: &str, lines: Option<u32>) -> Result<String, MuxError>;

    /// Send literal text to a pane, optionally followed by Enter.
    async fn send_keys(&self, pane: &str, text: &str, enter: bool) -> Result<(), MuxError>;
}
