// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn fast_settings() -> ThrottleSettings {
    ThrottleSettings {
        flush_interval: Duration::from_millis(20),
        max_batch: 4,
        persist_logs: false,
        log_dir: PathBuf::from("."),
    }
}

#[tokio::test]
async fn timer_flush_coalesces_burst() -> anyhow::Result<()> {
    let throttle = OutputThrottle::new(fast_settings());
    let mut rx = throttle.subscribe();

    throttle.push("s1", "a");
    throttle.push("s1", "b");
    assert_eq!(throttle.pending_count("s1"), 2);

    let batch = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await??;
    assert_eq!(batch.session_id, "s1");
    assert_eq!(batch.lines, vec!["a", "b"]);
    assert_eq!(throttle.pending_count("s1"), 0);
    Ok(())
}

#[tokio::test]
async fn full_batch_flushes_immediately() -> anyhow::Result<()> {
    let throttle = OutputThrottle::new(fast_settings());
    let mut rx = throttle.subscribe();

    for i in 0..4 {
        throttle.push("s1", &format!("line-{i}"));
    }

    // The flush happened synchronously inside the fourth push.
    let batch = rx.try_recv()?;
    assert_eq!(batch.lines.len(), 4);
    Ok(())
}

#[tokio::test]
async fn order_is_preserved_across_batches() -> anyhow::Result<()> {
    let throttle = OutputThrottle::new(fast_settings());
    let mut rx = throttle.subscribe();

    for i in 0..10 {
        throttle.push("s1", &format!("{i}"));
    }
    throttle.flush("s1");

    let mut seen = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        seen.extend(batch.lines);
    }
    let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[tokio::test]
async fn explicit_flush_on_empty_buffer_is_noop() {
    let throttle = OutputThrottle::new(fast_settings());
    let mut rx = throttle.subscribe();

    throttle.flush("s1");
    throttle.flush("unknown");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn remove_does_final_flush_and_drops_state() -> anyhow::Result<()> {
    let throttle = OutputThrottle::new(fast_settings());
    let mut rx = throttle.subscribe();

    throttle.push("s1", "tail");
    throttle.remove("s1");

    let batch = rx.try_recv()?;
    assert_eq!(batch.lines, vec!["tail"]);
    assert_eq!(throttle.active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn shutdown_flushes_every_session() -> anyhow::Result<()> {
    let throttle = OutputThrottle::new(fast_settings());
    let mut rx = throttle.subscribe();

    throttle.push("s1", "one");
    throttle.push("s2", "two");
    throttle.shutdown();

    let mut sessions = vec![rx.try_recv()?.session_id, rx.try_recv()?.session_id];
    sessions.sort();
    assert_eq!(sessions, vec!["s1", "s2"]);
    assert_eq!(throttle.active_count(), 0);
    Ok(())
}

#[tokio::test]
async fn persistence_appends_to_tail_log() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let throttle = OutputThrottle::new(ThrottleSettings {
        flush_interval: Duration::from_millis(20),
        max_batch: 4,
        persist_logs: true,
        log_dir: dir.path().to_path_buf(),
    });

    throttle.push("abc", "first");
    throttle.push("abc", "second");

    let path = match throttle.log_path("abc") {
        Some(p) => p,
        None => anyhow::bail!("log path missing with persistence enabled"),
    };
    // The write is synchronous: the file content is visible before any flush.
    let contents = std::fs::read_to_string(path)?;
    assert_eq!(contents, "first\nsecond\n");
    Ok(())
}

#[tokio::test]
async fn log_path_none_without_persistence() {
    let throttle = OutputThrottle::new(fast_settings());
    assert!(throttle.log_path("abc").is_none());
}
