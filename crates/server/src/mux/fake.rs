// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake multiplexer adapter for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{MuxAdapter, MuxError};

/// Recorded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum MuxCall {
    HasSession { name: String },
    NewSession { name: String, cwd: PathBuf, initial_command: Option<String> },
    KillSession { name: String },
    ListSessions,
    ListPanes { name: String },
    CapturePane { pane: String, lines: Option<u32> },
    SendKeys { pane: String, text: String, enter: bool },
}

#[derive(Debug, Clone)]
struct FakeSession {
    pane: String,
    capture: String,
}

struct FakeMuxState {
    sessions: HashMap<String, FakeSession>,
    calls: Vec<MuxCall>,
    /// When set, the named operation fails once with `CommandFailed`.
    fail_next: Option<&'static str>,
    /// When true, `list_sessions` fails (no daemon running).
    daemon_down: bool,
    next_pane: u64,
}

/// In-memory multiplexer for tests: scripts pane output, records calls.
#[derive(Clone)]
pub struct FakeMux {
    inner: Arc<Mutex<FakeMuxState>>,
}

impl Default for FakeMux {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeMuxState {
                sessions: HashMap::new(),
                calls: Vec::new(),
                fail_next: None,
                daemon_down: false,
                next_pane: 0,
            })),
        }
    }
}

impl FakeMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MuxCall> {
        self.inner.lock().calls.clone()
    }

    /// Register a pre-existing session (for discovery and liveness tests).
    pub fn add_session(&self, name: &str) {
        let mut inner = self.inner.lock();
        inner.next_pane += 1;
        let pane = format!("%{}", inner.next_pane);
        inner.sessions.insert(name.to_owned(), FakeSession { pane, capture: String::new() });
    }

    /// Replace the scripted capture text for a session's pane.
    pub fn set_capture(&self, name: &str, capture: &str) {
        if let Some(session) = self.inner.lock().sessions.get_mut(name) {
            session.capture = capture.to_owned();
        }
    }

    /// Fail the next call to the named operation.
    pub fn fail_next(&self, op: &'static str) {
        self.inner.lock().fail_next = Some(op);
    }

    /// Simulate a missing multiplexer daemon.
    pub fn set_daemon_down(&self, down: bool) {
        self.inner.lock().daemon_down = down;
    }

    /// All `send_keys` invocations recorded so far, as `(pane, text, enter)`.
    pub fn sent_keys(&self) -> Vec<(String, String, bool)> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MuxCall::SendKeys { pane, text, enter } => {
                    Some((pane.clone(), text.clone(), *enter))
                }
                _ => None,
            })
            .collect()
    }

    fn check_fail(inner: &mut FakeMuxState, op: &'static str) -> Result<(), MuxError> {
        if inner.fail_next == Some(op) {
            inner.fail_next = None;
            return Err(MuxError::CommandFailed(format!("scripted failure: {op}")));
        }
        Ok(())
    }
}

#[async_trait]
impl MuxAdapter for FakeMux {
    async fn has_session(&self, name: &str) -> Result<bool, MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::HasSession { name: name.to_owned() });
        Self::check_fail(&mut inner, "has_session")?;
        Ok(inner.sessions.contains_key(name))
    }

    async fn new_session(
        &self,
        name: &str,
        cwd: &Path,
        initial_command: Option<&str>,
    ) -> Result<String, MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::NewSession {
            name: name.to_owned(),
            cwd: cwd.to_path_buf(),
            initial_command: initial_command.map(str::to_owned),
        });
        Self::check_fail(&mut inner, "new_session")?;
        inner.next_pane += 1;
        let pane = format!("%{}", inner.next_pane);
        inner.sessions.insert(name.to_owned(), FakeSession { pane, capture: String::new() });
        Ok(name.to_owned())
    }

    async fn kill_session(&self, name: &str) -> Result<(), MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::KillSession { name: name.to_owned() });
        Self::check_fail(&mut inner, "kill_session")?;
        if inner.sessions.remove(name).is_none() {
            return Err(MuxError::NotFound(name.to_owned()));
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<String>, MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::ListSessions);
        Self::check_fail(&mut inner, "list_sessions")?;
        if inner.daemon_down {
            return Err(MuxError::CommandFailed("no server running".to_owned()));
        }
        let mut names: Vec<String> = inner.sessions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_panes(&self, name: &str) -> Result<String, MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::ListPanes { name: name.to_owned() });
        Self::check_fail(&mut inner, "list_panes")?;
        match inner.sessions.get(name) {
            Some(session) => Ok(session.pane.clone()),
            None => Err(MuxError::NotFound(name.to_owned())),
        }
    }

    async fn capture_pane(&self, pane: &str, lines: Option<u32>) -> Result<String, MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::CapturePane { pane: pane.to_owned(), lines });
        Self::check_fail(&mut inner, "capture_pane")?;
        match inner.sessions.values().find(|s| s.pane == pane) {
            Some(session) => Ok(session.capture.clone()),
            None => Err(MuxError::NotFound(pane.to_owned())),
        }
    }

    async fn send_keys(&self, pane: &str, text: &str, enter: bool) -> Result<(), MuxError> {
        let mut inner = self.inner.lock();
        inner.calls.push(MuxCall::SendKeys {
            pane: pane.to_owned(),
            text: text.to_owned(),
            enter,
        });
        Self::check_fail(&mut inner, "send_keys")?;
        if !inner.sessions.values().any(|s| s.pane == pane) {
            return Err(MuxError::NotFound(pane.to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
