// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fixtures shared by in-crate transport tests.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::mux::FakeMux;
use crate::run::build_state;
use crate::transport::AppState;

/// Convert any displayable error into an anyhow error, so test helpers
/// returning foreign error types compose with `anyhow::Result` tests.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// A fully assembled application state over a fake multiplexer and an
/// ephemeral state directory.
pub struct TestCtx {
    pub state: Arc<AppState>,
    pub mux: FakeMux,
    pub shutdown: CancellationToken,
    pub _dir: tempfile::TempDir,
}

/// Build the full service stack with default test config.
pub fn build_test_state() -> anyhow::Result<TestCtx> {
    build_test_state_with(|_| {})
}

/// Build the full service stack, applying config tweaks first.
pub fn build_test_state_with(configure: impl FnOnce(&mut Config)) -> anyhow::Result<TestCtx> {
    let dir = tempfile::tempdir()?;

    let mut config = Config::try_parse_from(["attache"])?;
    config.state_dir = dir.path().to_path_buf();
    config.flush_interval_ms = 10;
    config.poll_interval_ms = 10;
    configure(&mut config);

    let shutdown = CancellationToken::new();
    let mux = FakeMux::new();
    let state = build_state(&config, Arc::new(mux.clone()), shutdown.clone())?;
    Ok(TestCtx { state, mux, shutdown, _dir: dir })
}
