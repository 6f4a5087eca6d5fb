// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide event bus with monotonic sequence numbers.
//!
//! A single broadcast channel fans events out to every subscriber. The
//! sequence counter and the send are performed under one lock so that all
//! subscribers observe events in strictly increasing `seq` order. Slow
//! subscribers lag and drop (tokio broadcast semantics); their catch-up
//! path is the chat replay buffer or the SSE `Last-Event-ID` resume.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// A sequenced event. The payload is opaque to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub seq: u64,
    pub ts_ms: u64,
    pub kind: String,
    pub payload: Value,
}

/// In-memory pub/sub hub. One instance per process, owned by the app state.
pub struct EventBus {
    seq: Mutex<u64>,
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { seq: Mutex::new(0), tx }
    }

    /// Publish an event, returning its assigned sequence number.
    ///
    /// Never blocks on subscribers: a receiver that cannot keep up lags
    /// out of the channel instead of backpressuring the publisher.
    pub fn emit(&self, kind: &str, payload: Value) -> u64 {
        let mut seq = self.seq.lock();
        *seq += 1;
        let event = BusEvent {
            seq: *seq,
            ts_ms: epoch_ms(),
            kind: kind.to_owned(),
            payload,
        };
        // Err means no subscribers, which is fine.
        let _ = self.tx.send(event);
        *seq
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// The sequence number of the most recently emitted event.
    pub fn current_seq(&self) -> u64 {
        *self.seq.lock()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
