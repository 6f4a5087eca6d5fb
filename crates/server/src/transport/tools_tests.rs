// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool-RPC transport tests over a real listener, since upgrade rejection
//! and close handling only exist on an actual socket.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite;

use crate::test_support::{build_test_state, build_test_state_with, TestCtx};
use crate::transport::build_router;

/// Serve the router on an ephemeral port, returning the bound port.
async fn serve(ctx: &TestCtx) -> anyhow::Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let router = build_router(ctx.state.clone());
    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
    });
    Ok(port)
}

fn expect_http_status(
    result: Result<impl Sized, tungstenite::Error>,
    expected: u16,
) -> anyhow::Result<()> {
    match result {
        Err(tungstenite::Error::Http(response)) => {
            anyhow::ensure!(
                response.status().as_u16() == expected,
                "expected {expected}, got {}",
                response.status()
            );
            Ok(())
        }
        Err(other) => anyhow::bail!("expected HTTP {expected} rejection, got error: {other}"),
        Ok(_) => anyhow::bail!("expected HTTP {expected} rejection, upgrade succeeded"),
    }
}

#[tokio::test]
async fn missing_agent_param_is_rejected_with_400() -> anyhow::Result<()> {
    let ctx = build_test_state()?;
    let port = serve(&ctx).await?;

    let result =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws/tools")).await;
    expect_http_status(result, 400)?;

    // An empty agent value is equally invalid.
    let result =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws/tools?agent="))
            .await;
    expect_http_status(result, 400)?;
    Ok(())
}

#[tokio::test]
async fn upgrade_requires_valid_token_when_keys_configured() -> anyhow::Result<()> {
    let ctx = build_test_state_with(|c| c.api_keys = vec!["secret".to_owned()])?;
    let port = serve(&ctx).await?;

    let result = tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/ws/tools?agent=alpha"
    ))
    .await;
    expect_http_status(result, 401)?;

    let (socket, _) = tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/ws/tools?agent=alpha&token=secret"
    ))
    .await?;
    drop(socket);
    Ok(())
}

/// The upgrade callback registers the agent just after the handshake
/// completes, so observers must wait for it.
async fn wait_connected(ctx: &TestCtx, agent: &str) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !ctx.state.gateway.is_agent_connected(agent) {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "agent {agent} never registered"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn connect_binds_identity_and_answers_calls() -> anyhow::Result<()> {
    let ctx = build_test_state()?;
    let port = serve(&ctx).await?;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/ws/tools?agent=alpha"
    ))
    .await?;
    wait_connected(&ctx, "alpha").await?;

    let call = json!({ "id": 7, "tool": "set_status", "args": { "status": "working" } });
    socket.send(tungstenite::Message::Text(call.to_string().into())).await?;

    let reply = loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        match frame {
            tungstenite::Message::Text(text) => break serde_json::from_str::<Value>(&text)?,
            _ => continue,
        }
    };
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["ok"], true);
    assert_eq!(
        ctx.state.gateway.status_for("alpha").map(|s| s.status),
        Some("working".to_owned())
    );
    Ok(())
}

#[tokio::test]
async fn closing_the_socket_disconnects_the_agent() -> anyhow::Result<()> {
    let ctx = build_test_state()?;
    let port = serve(&ctx).await?;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/ws/tools?agent=alpha"
    ))
    .await?;
    wait_connected(&ctx, "alpha").await?;

    socket.close(None).await?;
    drop(socket);

    // The server's loop-exit path runs the idempotent disconnect.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while ctx.state.gateway.is_agent_connected("alpha") {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "agent never disconnected after close"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(ctx.state.gateway.connected_agents().is_empty());
    Ok(())
}
