// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process test harness: assembles the full server over a fake
//! multiplexer and serves it on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use attache::config::Config;
use attache::mux::FakeMux;
use attache::run::{build_state, start_services};
use attache::transport::{build_router, AppState};

pub use attache::mux::MuxCall;

/// A running in-process server, torn down on drop.
pub struct TestServer {
    pub state: Arc<AppState>,
    pub mux: FakeMux,
    pub port: u16,
    shutdown: CancellationToken,
    _state_dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start with config tweaks (API keys, session cap, timeouts).
    pub async fn start_with(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let state_dir = tempfile::tempdir()?;

        let mut config = Config::try_parse_from(["attache"])?;
        config.state_dir = state_dir.path().to_path_buf();
        config.flush_interval_ms = 10;
        config.poll_interval_ms = 10;
        configure(&mut config);

        let shutdown = CancellationToken::new();
        let mux = FakeMux::new();
        let state = build_state(&config, Arc::new(mux.clone()), shutdown.clone())?;
        start_services(&state, config.discover_prefix.as_deref()).await;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let router = build_router(Arc::clone(&state));
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _ = axum_serve(listener, router, shutdown).await;
            });
        }

        Ok(Self { state, mux, port, shutdown, _state_dir: state_dir })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn chat_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws/chat", self.port)
    }

    pub fn tools_url(&self, agent: &str) -> String {
        format!("ws://127.0.0.1:{}/ws/tools?agent={agent}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn axum_serve(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// A connected chat WebSocket client with JSON frame helpers.
pub struct ChatClient {
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl ChatClient {
    /// Connect and consume the `auth_challenge` frame.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let mut client = Self { socket };
        let challenge = client.recv_json().await?;
        anyhow::ensure!(
            challenge["type"] == "auth_challenge",
            "expected auth_challenge, got {challenge}"
        );
        Ok(client)
    }

    /// Connect and complete the auth handshake, returning after the
    /// `connected` frame.
    pub async fn connect_authed(url: &str, api_key: Option<&str>) -> anyhow::Result<Self> {
        let mut client = Self::connect(url).await?;
        let frame = match api_key {
            Some(key) => serde_json::json!({ "type": "auth_response", "apiKey": key }),
            None => serde_json::json!({ "type": "auth_response" }),
        };
        client.send_json(&frame).await?;
        let connected = client.recv_json().await?;
        anyhow::ensure!(
            connected["type"] == "connected",
            "expected connected, got {connected}"
        );
        Ok(client)
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) -> anyhow::Result<()> {
        self.socket.send(Message::Text(value.to_string().into())).await?;
        Ok(())
    }

    /// Next text frame as JSON, with a bounded wait.
    pub async fn recv_json(&mut self) -> anyhow::Result<serde_json::Value> {
        let deadline = Duration::from_secs(5);
        loop {
            let frame = tokio::time::timeout(deadline, self.socket.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("socket closed"))?;
            match frame? {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => {
                    anyhow::bail!("socket closed: {frame:?}")
                }
                _ => continue,
            }
        }
    }

    /// Skip frames until one with the given `type` arrives.
    pub async fn recv_until(&mut self, frame_type: &str) -> anyhow::Result<serde_json::Value> {
        for _ in 0..50 {
            let frame = self.recv_json().await?;
            if frame["type"] == frame_type {
                return Ok(frame);
            }
        }
        anyhow::bail!("no {frame_type} frame within 50 frames")
    }

    /// Wait for the close frame, returning its code.
    pub async fn expect_close(&mut self) -> anyhow::Result<u16> {
        let deadline = Duration::from_secs(5);
        loop {
            let frame = tokio::time::timeout(deadline, self.socket.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("socket ended without close frame"))?;
            match frame? {
                Message::Close(Some(frame)) => return Ok(frame.code.into()),
                Message::Close(None) => anyhow::bail!("close frame without code"),
                _ => continue,
            }
        }
    }
}
