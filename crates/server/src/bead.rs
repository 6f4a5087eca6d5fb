// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialized invoker for the external task-graph CLI (`bd`).
//!
//! A capacity-1 semaphore serializes every invocation; waiters are served
//! in FIFO order. Failures are surfaced as structured errors and never
//! leak the permit, so a crashed or timed-out call cannot block the next.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;

/// Default per-invocation deadline.
pub const BEAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Crash signatures the CLI's runtime prints on stderr when it dies.
fn panic_signature() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let compiled = regex::Regex::new(
            r"panic:|goroutine \d+ \[running\]|runtime error:|SIGSEGV",
        )
        .unwrap();
        compiled
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ExecResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub stdout: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecError>,
}

impl ExecResult {
    fn failure(code: &str, message: String, exit_code: i32) -> Self {
        Self {
            success: false,
            data: None,
            stdout: String::new(),
            exit_code,
            error: Some(ExecError { code: code.to_owned(), message }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Parse stdout as JSON on success (default true).
    pub parse_json: Option<bool>,
    pub stdin: Option<String>,
}

pub struct BeadClient {
    binary: String,
    default_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl BeadClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            default_timeout: BEAD_TIMEOUT,
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run the CLI with the given arguments.
    ///
    /// Holds the process-wide permit for the duration of the call; the
    /// permit is released on every exit path (success, non-zero exit,
    /// spawn failure, timeout).
    pub async fn exec(&self, args: &[String], opts: ExecOptions) -> ExecResult {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ExecResult::failure(
                    "SPAWN_ERROR",
                    "command client is shut down".to_owned(),
                    -1,
                );
            }
        };

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let parse_json = opts.parse_json.unwrap_or(true);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args)
            .stdin(if opts.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = opts.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecResult::failure("SPAWN_ERROR", e.to_string(), -1);
            }
        };

        if let Some(ref input) = opts.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(err = %e, "bd stdin write failed");
                }
            }
        }

        // On deadline the child future is dropped; kill_on_drop reaps it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecResult::failure("SPAWN_ERROR", e.to_string(), -1);
            }
            Err(_elapsed) => {
                return ExecResult::failure(
                    "TIMEOUT",
                    format!("bd timed out after {}ms", timeout.as_millis()),
                    -1,
                );
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            if panic_signature().is_match(&stderr) {
                return ExecResult {
                    success: false,
                    data: None,
                    stdout,
                    exit_code,
                    error: Some(ExecError {
                        code: "BD_PANIC".to_owned(),
                        message: format!("bd crashed: {}", excerpt(&stderr)),
                    }),
                };
            }
            return ExecResult {
                success: false,
                data: None,
                stdout,
                exit_code,
                error: Some(ExecError {
                    code: "COMMAND_FAILED".to_owned(),
                    message: excerpt(&stderr),
                }),
            };
        }

        if parse_json {
            match serde_json::from_str::<Value>(&stdout) {
                Ok(data) => ExecResult {
                    success: true,
                    data: Some(data),
                    stdout,
                    exit_code,
                    error: None,
                },
                Err(e) => ExecResult {
                    success: false,
                    data: None,
                    stdout,
                    exit_code,
                    error: Some(ExecError {
                        code: "PARSE_ERROR".to_owned(),
                        message: format!("invalid JSON on stdout: {e}"),
                    }),
                },
            }
        } else {
            ExecResult { success: true, data: None, stdout, exit_code, error: None }
        }
    }
}

/// First lines of stderr, bounded, for error payloads.
fn excerpt(stderr: &str) -> String {
    const MAX: usize = 400;
    let trimmed = stderr.trim();
    let mut cut = trimmed.chars().take(MAX).collect::<String>();
    if cut.len() < trimmed.len() {
        cut.push('…');
    }
    cut
}

#[cfg(test)]
#[path = "bead_tests.rs"]
mod tests;
