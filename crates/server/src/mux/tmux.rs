// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tmux adapter: shells out to the `tmux` binary for every operation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use super::{MuxAdapter, MuxError, MUX_TIMEOUT};

/// Multiplexer adapter backed by the system `tmux` binary.
pub struct TmuxMux {
    /// When set, every invocation targets an isolated tmux server via
    /// `-S <path>` instead of the user's default socket.
    socket: Option<PathBuf>,
    timeout: Duration,
}

impl TmuxMux {
    pub fn new() -> Self {
        Self { socket: None, timeout: MUX_TIMEOUT }
    }

    pub fn with_socket(socket: PathBuf) -> Self {
        Self { socket: Some(socket), timeout: MUX_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn tmux_cmd(&self) -> Command {
        let mut cmd = Command::new("tmux");
        if let Some(ref s) = self.socket {
            cmd.arg("-S").arg(s);
        }
        cmd
    }

    /// Run a tmux command, bounding it with the adapter deadline.
    async fn run(&self, cmd: Command, description: &str) -> Result<Output, MuxError> {
        run_with_timeout(cmd, self.timeout, description).await
    }
}

impl Default for TmuxMux {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a subprocess command with a timeout.
///
/// The child process is killed automatically if the deadline elapses (via
/// the tokio `Child` drop implementation).
async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    description: &str,
) -> Result<Output, MuxError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(io_err)) => Err(MuxError::CommandFailed(format!("{description}: {io_err}"))),
        Err(_elapsed) => Err(MuxError::Timeout(timeout)),
    }
}

#[async_trait]
impl MuxAdapter for TmuxMux {
    async fn has_session(&self, name: &str) -> Result<bool, MuxError> {
        let mut cmd = self.tmux_cmd();
        cmd.args(["has-session", "-t", name]);
        let output = self.run(cmd, "tmux has-session").await?;
        Ok(output.status.success())
    }

    async fn new_session(
        &self,
        name: &str,
        cwd: &Path,
        initial_command: Option<&str>,
    ) -> Result<String, MuxError> {
        if !cwd.exists() {
            return Err(MuxError::SpawnFailed(format!(
                "working directory does not exist: {}",
                cwd.display()
            )));
        }

        let mut cmd = self.tmux_cmd();
        cmd.arg("new-session").arg("-d").arg("-s").arg(name).arg("-c").arg(cwd);
        if let Some(initial) = initial_command {
            cmd.arg(initial);
        }

        let output = self.run(cmd, "tmux new-session").await.map_err(|e| match e {
            MuxError::CommandFailed(msg) => MuxError::SpawnFailed(msg),
            other => other,
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(session = name, stderr = %stderr, "tmux spawn failed");
            return Err(MuxError::SpawnFailed(stderr.trim().to_owned()));
        }

        // Stderr may carry non-fatal warnings even on success.
        if !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(session = name, stderr = %stderr, "tmux spawn stderr (non-fatal)");
        }

        Ok(name.to_owned())
    }

    async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        let mut cmd = self.tmux_cmd();
        cmd.args(["kill-session", "-t", name]);
        let output = self.run(cmd, "tmux kill-session").await?;
        if !output.status.success() {
            return Err(MuxError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, MuxError> {
        let mut cmd = self.tmux_cmd();
        cmd.args(["list-sessions", "-F", "#{session_name}"]);
        let output = self.run(cmd, "tmux list-sessions").await?;
        if !output.status.success() {
            // tmux exits non-zero when no server is running.
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MuxError::CommandFailed(stderr.trim().to_owned()));
        }
        let names = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_owned)
            .filter(|l| !l.is_empty())
            .collect();
        Ok(names)
    }

    async fn list_panes(&self, name: &str) -> Result<String, MuxError> {
        let mut cmd = self.tmux_cmd();
        cmd.args(["list-panes", "-t", name, "-F", "#{pane_id}"]);
        let output = self.run(cmd, "tmux list-panes").await?;
        if !output.status.success() {
            return Err(MuxError::NotFound(name.to_owned()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next() {
            Some(pane) if !pane.is_empty() => Ok(pane.to_owned()),
            _ => Err(MuxError::CommandFailed(format!("no panes in session {name}"))),
        }
    }

    async fn capture_pane(&self, pane: &str, lines: Option<u32>) -> Result<String, MuxError> {
        let mut cmd = self.tmux_cmd();
        cmd.args(["capture-pane", "-p", "-t", pane]);
        if let Some(n) = lines {
            cmd.arg("-S").arg(format!("-{n}"));
        }
        let output = self.run(cmd, "tmux capture-pane").await?;
        if !output.status.success() {
            return Err(MuxError::NotFound(pane.to_owned()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn send_keys(&self, pane: &str, text: &str, enter: bool) -> Result<(), MuxError> {
        // -l = literal mode (no key name interpretation)
        // -- = end of options (handles text starting with -)
        let mut cmd = self.tmux_cmd();
        cmd.args(["send-keys", "-t", pane, "-l", "--", text]);
        let output = self.run(cmd, "tmux send-keys").await?;
        if !output.status.success() {
            return Err(MuxError::NotFound(pane.to_owned()));
        }

        if enter {
            let mut cmd = self.tmux_cmd();
            cmd.args(["send-keys", "-t", pane, "Enter"]);
            let output = self.run(cmd, "tmux send-keys Enter").await?;
            if !output.status.success() {
                return Err(MuxError::NotFound(pane.to_owned()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tmux_tests.rs"]
mod tests;
