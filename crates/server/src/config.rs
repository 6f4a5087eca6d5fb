// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Backend control plane for terminal-based coding agents.
#[derive(Debug, Clone, Parser)]
#[command(name = "attache", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "ATTACHE_PORT", default_value = "9700")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "ATTACHE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Accepted API keys (repeatable, or comma-separated via env).
    /// No keys disables authentication.
    #[arg(long = "api-key", env = "ATTACHE_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// State directory (registry file, message database, session logs).
    #[arg(long, env = "ATTACHE_STATE_DIR", default_value = ".attache")]
    pub state_dir: PathBuf,

    /// Hard cap on concurrently registered sessions.
    #[arg(long, env = "ATTACHE_MAX_SESSIONS", default_value = "10")]
    pub max_sessions: usize,

    /// Agent CLI binary launched inside each session.
    #[arg(long, env = "ATTACHE_AGENT_COMMAND", default_value = "claude")]
    pub agent_command: String,

    /// Extra arguments for the agent CLI (replaces the default
    /// permissions-skip flag when given).
    #[arg(
        long = "agent-arg",
        env = "ATTACHE_AGENT_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true
    )]
    pub agent_args: Vec<String>,

    /// Output throttle flush interval in milliseconds.
    #[arg(long, env = "ATTACHE_FLUSH_INTERVAL_MS", default_value = "100")]
    pub flush_interval_ms: u64,

    /// Output throttle batch cap.
    #[arg(long, env = "ATTACHE_MAX_BATCH", default_value = "128")]
    pub max_batch: usize,

    /// Persist per-session output tail logs under the state directory.
    #[arg(long, env = "ATTACHE_PERSIST_LOGS")]
    pub persist_logs: bool,

    /// Pane poll interval in milliseconds.
    #[arg(long, env = "ATTACHE_POLL_INTERVAL_MS", default_value = "500")]
    pub poll_interval_ms: u64,

    /// Task-graph CLI binary.
    #[arg(long, env = "ATTACHE_BEAD_BINARY", default_value = "bd")]
    pub bead_binary: String,

    /// Task-graph CLI timeout in milliseconds.
    #[arg(long, env = "ATTACHE_BEAD_TIMEOUT_MS", default_value = "15000")]
    pub bead_timeout_ms: u64,

    /// Chat auth handshake deadline in milliseconds.
    #[arg(long, env = "ATTACHE_AUTH_TIMEOUT_MS", default_value = "10000")]
    pub auth_timeout_ms: u64,

    /// Webhook URL for push notifications on user-addressed messages.
    #[arg(long, env = "ATTACHE_PUSH_WEBHOOK")]
    pub push_webhook: Option<String>,

    /// Use an isolated tmux server socket instead of the default.
    #[arg(long, env = "ATTACHE_TMUX_SOCKET")]
    pub tmux_socket: Option<PathBuf>,

    /// Mux-session prefix filter for startup discovery.
    #[arg(long, env = "ATTACHE_DISCOVER_PREFIX")]
    pub discover_prefix: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "ATTACHE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "ATTACHE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_sessions == 0 {
            anyhow::bail!("--max-sessions must be at least 1");
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be 'json' or 'text'");
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("sessions.json")
    }

    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("messages.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bead_timeout(&self) -> Duration {
        Duration::from_millis(self.bead_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Agent CLI arguments, defaulting to the permissions-skip flag.
    pub fn effective_agent_args(&self) -> Vec<String> {
        if self.agent_args.is_empty() {
            vec!["--dangerously-skip-permissions".to_owned()]
        } else {
            self.agent_args.clone()
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
