// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session output batching.
//!
//! Terminal output arrives in bursts of single lines; the throttle
//! coalesces them into batches, flushing on a one-shot timer or when a
//! batch fills. Flushes for one session are serialized (buffer state and
//! the broadcast send share a lock), and batches preserve insertion order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// A flushed batch of raw output lines for one session.
#[derive(Debug, Clone)]
pub struct OutputBatch {
    pub session_id: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ThrottleSettings {
    pub flush_interval: Duration,
    pub max_batch: usize,
    pub persist_logs: bool,
    pub log_dir: PathBuf,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(100),
            max_batch: 128,
            persist_logs: false,
            log_dir: PathBuf::from("."),
        }
    }
}

#[derive(Default)]
struct SessionBuffer {
    lines: Vec<String>,
    timer: Option<CancellationToken>,
}

pub struct OutputThrottle {
    settings: ThrottleSettings,
    inner: Arc<Mutex<HashMap<String, SessionBuffer>>>,
    flush_tx: broadcast::Sender<OutputBatch>,
}

impl OutputThrottle {
    pub fn new(settings: ThrottleSettings) -> Self {
        let (flush_tx, _) = broadcast::channel(256);
        Self { settings, inner: Arc::new(Mutex::new(HashMap::new())), flush_tx }
    }

    /// Subscribe to flushed batches.
    pub fn subscribe(&self) -> broadcast::Receiver<OutputBatch> {
        self.flush_tx.subscribe()
    }

    /// Append a line to the session's pending buffer.
    ///
    /// Installs a one-shot flush timer if none is running; flushes
    /// immediately when the buffer reaches the batch cap. When log
    /// persistence is enabled the line hits the tail file before this
    /// returns.
    pub fn push(&self, session_id: &str, line: &str) {
        if self.settings.persist_logs {
            self.append_log(session_id, line);
        }

        let mut inner = self.inner.lock();
        let buffer = inner.entry(session_id.to_owned()).or_default();
        buffer.lines.push(line.to_owned());

        if buffer.lines.len() >= self.settings.max_batch {
            Self::flush_buffer(session_id, buffer, &self.flush_tx);
            return;
        }

        if buffer.timer.is_none() {
            let token = CancellationToken::new();
            buffer.timer = Some(token.clone());

            let interval = self.settings.flush_interval;
            let session = session_id.to_owned();
            let map = Arc::clone(&self.inner);
            let tx = self.flush_tx.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(interval) => {
                        let mut inner = map.lock();
                        if let Some(buffer) = inner.get_mut(&session) {
                            Self::flush_buffer(&session, buffer, &tx);
                        }
                    }
                }
            });
        }
    }

    /// Flush the session's pending buffer. No-op when empty.
    pub fn flush(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(buffer) = inner.get_mut(session_id) {
            Self::flush_buffer(session_id, buffer, &self.flush_tx);
        }
    }

    /// Final flush, then drop all state for the session.
    pub fn remove(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(mut buffer) = inner.remove(session_id) {
            Self::flush_buffer(session_id, &mut buffer, &self.flush_tx);
        }
    }

    /// Flush every session and cancel all timers.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for (session_id, buffer) in inner.iter_mut() {
            Self::flush_buffer(session_id, buffer, &self.flush_tx);
        }
        inner.clear();
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn pending_count(&self, session_id: &str) -> usize {
        self.inner.lock().get(session_id).map(|b| b.lines.len()).unwrap_or(0)
    }

    pub fn log_path(&self, session_id: &str) -> Option<PathBuf> {
        if !self.settings.persist_logs {
            return None;
        }
        Some(self.settings.log_dir.join(format!("session-{session_id}.log")))
    }

    /// Deliver and clear the buffer; called with the state lock held so
    /// flushes for the same session never interleave.
    fn flush_buffer(
        session_id: &str,
        buffer: &mut SessionBuffer,
        tx: &broadcast::Sender<OutputBatch>,
    ) {
        if let Some(timer) = buffer.timer.take() {
            timer.cancel();
        }
        if buffer.lines.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut buffer.lines);
        let _ = tx.send(OutputBatch { session_id: session_id.to_owned(), lines });
    }

    fn append_log(&self, session_id: &str, line: &str) {
        let Some(path) = self.log_path(session_id) else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(&self.settings.log_dir) {
            tracing::warn!(err = %e, "log dir creation failed");
            return;
        }
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(format!("{line}\n").as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), err = %e, "session log append failed");
        }
    }
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;
