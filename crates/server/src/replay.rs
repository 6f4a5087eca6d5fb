// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded replay buffer for chat broadcast gap recovery.
//!
//! Holds the tail of recently broadcast payloads, capped at a fixed entry
//! count and a maximum age, whichever is tighter. Entry eviction is FIFO;
//! age pruning runs lazily on every append.

use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReplayEntry {
    pub seq: u64,
    pub payload: Value,
    pub ts_ms: u64,
}

#[derive(Debug)]
pub struct ReplayBuffer {
    entries: VecDeque<ReplayEntry>,
    max_entries: usize,
    max_age: Duration,
}

impl ReplayBuffer {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self { entries: VecDeque::new(), max_entries, max_age }
    }

    /// Append an entry, evicting by count and by age.
    pub fn push(&mut self, seq: u64, payload: Value, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.max_age.as_millis() as u64);
        while self.entries.front().is_some_and(|e| e.ts_ms < cutoff) {
            self.entries.pop_front();
        }
        self.entries.push_back(ReplayEntry { seq, payload, ts_ms: now_ms });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Entries with `seq > last_seen`, in order. A `last_seen` beyond the
    /// newest entry yields an empty list.
    pub fn since(&self, last_seen: u64) -> Vec<ReplayEntry> {
        self.entries.iter().filter(|e| e.seq > last_seen).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
