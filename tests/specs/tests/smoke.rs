// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end tests over the in-process server: HTTP, chat WebSocket,
//! tool-RPC WebSocket, and SSE.

use attache_specs::{ChatClient, MuxCall, TestServer};
use futures_util::StreamExt;
use serde_json::json;

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", server.base_url())).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn session_create_and_cap() -> anyhow::Result<()> {
    let server = TestServer::start_with(|c| c.max_sessions = 1).await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/sessions", server.base_url());

    let resp = client
        .post(&url)
        .json(&json!({ "name": "one", "projectPath": "/tmp" }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 201);

    // At the cap: rejected, and no mux spawn is attempted.
    let spawns_before = server
        .mux
        .calls()
        .iter()
        .filter(|c| matches!(c, MuxCall::NewSession { .. }))
        .count();
    let resp = client
        .post(&url)
        .json(&json!({ "name": "two", "projectPath": "/tmp" }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 409);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"]["code"], "session_limit_reached");
    assert_eq!(body["error"]["message"], "Session limit reached");

    let spawns_after = server
        .mux
        .calls()
        .iter()
        .filter(|c| matches!(c, MuxCall::NewSession { .. }))
        .count();
    assert_eq!(spawns_before, spawns_after);
    Ok(())
}

#[tokio::test]
async fn http_auth_enforced_when_keys_configured() -> anyhow::Result<()> {
    let server = TestServer::start_with(|c| c.api_keys = vec!["k1".to_owned()]).await?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/sessions", server.base_url());

    let resp = client.get(&url).send().await?;
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client.get(&url).bearer_auth("k1").send().await?;
    assert_eq!(resp.status().as_u16(), 200);

    // Health stays open.
    let resp = reqwest::get(format!("{}/api/v1/health", server.base_url())).await?;
    assert_eq!(resp.status().as_u16(), 200);
    Ok(())
}

// -- Chat WebSocket -----------------------------------------------------------

#[tokio::test]
async fn chat_handshake_message_flow() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let mut client = ChatClient::connect_authed(&server.chat_url(), None).await?;

    client
        .send_json(&json!({ "type": "message", "to": "helper", "body": "hello there" }))
        .await?;

    // Broadcast comes back to the sender, then the delivery ack.
    let chat = client.recv_until("chat_message").await?;
    assert_eq!(chat["body"], "hello there");
    assert_eq!(chat["to"], "helper");
    assert_eq!(chat["seq"], 1);
    let delivered = client.recv_until("delivered").await?;
    assert!(delivered["messageId"].is_string());

    // The message was persisted with role=user.
    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/messages", server.base_url())).await?.json().await?;
    assert_eq!(resp["messages"][0]["role"], "user");
    assert_eq!(resp["messages"][0]["body"], "hello there");
    Ok(())
}

#[tokio::test]
async fn chat_sync_replays_missed_entries() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let mut sender = ChatClient::connect_authed(&server.chat_url(), None).await?;

    for n in 1..=3 {
        sender
            .send_json(&json!({ "type": "message", "to": "helper", "body": format!("m{n}") }))
            .await?;
        sender.recv_until("delivered").await?;
    }

    // A fresh client that claims to have seen seq 1 gets exactly 2 and 3.
    let mut late = ChatClient::connect_authed(&server.chat_url(), None).await?;
    late.send_json(&json!({ "type": "sync", "lastSeqSeen": 1 })).await?;
    let sync = late.recv_until("sync_response").await?;
    let missed = sync["missed"].as_array().cloned().unwrap_or_default();
    assert_eq!(missed.len(), 2);
    assert_eq!(missed[0]["seq"], 2);
    assert_eq!(missed[0]["payload"]["body"], "m2");
    assert_eq!(missed[1]["seq"], 3);

    // Beyond the current seq: empty list.
    late.send_json(&json!({ "type": "sync", "lastSeqSeen": 99 })).await?;
    let sync = late.recv_until("sync_response").await?;
    assert_eq!(sync["missed"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn chat_rejects_bad_key_with_close_4003() -> anyhow::Result<()> {
    let server = TestServer::start_with(|c| c.api_keys = vec!["right".to_owned()]).await?;
    let mut client = ChatClient::connect(&server.chat_url()).await?;
    client.send_json(&json!({ "type": "auth_response", "apiKey": "wrong" })).await?;

    let error = client.recv_until("error").await?;
    assert_eq!(error["code"], "auth_failed");
    assert_eq!(client.expect_close().await?, 4003);
    Ok(())
}

#[tokio::test]
async fn chat_auth_timeout_closes_with_4002() -> anyhow::Result<()> {
    let server = TestServer::start_with(|c| c.auth_timeout_ms = 200).await?;
    let mut client = ChatClient::connect(&server.chat_url()).await?;
    // Never answer the challenge.
    assert_eq!(client.expect_close().await?, 4002);
    Ok(())
}

#[tokio::test]
async fn chat_unauthenticated_traffic_is_refused() -> anyhow::Result<()> {
    let server = TestServer::start_with(|c| c.api_keys = vec!["k".to_owned()]).await?;
    let mut client = ChatClient::connect(&server.chat_url()).await?;
    client.send_json(&json!({ "type": "message", "to": "x", "body": "sneak" })).await?;
    let error = client.recv_until("error").await?;
    assert_eq!(error["code"], "auth_failed");
    Ok(())
}

#[tokio::test]
async fn chat_unknown_type_is_reported() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let mut client = ChatClient::connect_authed(&server.chat_url(), None).await?;
    client.send_json(&json!({ "type": "frobnicate" })).await?;
    let error = client.recv_until("error").await?;
    assert_eq!(error["code"], "unknown_type");
    Ok(())
}

#[tokio::test]
async fn chat_message_rate_limit() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let mut client = ChatClient::connect_authed(&server.chat_url(), None).await?;

    for n in 0..60 {
        client
            .send_json(&json!({ "type": "message", "to": "helper", "body": format!("n{n}") }))
            .await?;
        client.recv_until("delivered").await?;
    }

    client
        .send_json(&json!({ "type": "message", "to": "helper", "body": "over the line" }))
        .await?;
    let error = client.recv_until("error").await?;
    assert_eq!(error["code"], "rate_limited");

    // The 61st message was neither persisted nor broadcast.
    let resp: serde_json::Value = reqwest::Client::new()
        .get(format!("{}/api/v1/messages/search", server.base_url()))
        .query(&[("q", "over the line")])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["messages"].as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn chat_typing_broadcasts() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let mut a = ChatClient::connect_authed(&server.chat_url(), None).await?;
    let mut b = ChatClient::connect_authed(&server.chat_url(), None).await?;

    a.send_json(&json!({ "type": "typing", "state": "start" })).await?;
    let typing = b.recv_until("typing").await?;
    assert_eq!(typing["state"], "start");
    Ok(())
}

// -- Tool-RPC WebSocket -------------------------------------------------------

#[tokio::test]
async fn tool_identity_binding_ignores_claimed_identity() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let (mut socket, _) =
        tokio_tungstenite::connect_async(server.tools_url("server-resolved-agent")).await?;

    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    let call = json!({
        "id": 1,
        "tool": "send_message",
        "args": { "to": "user", "body": "hi", "_meta": { "agentId": "qa-agent" } },
    });
    socket.send(Message::Text(call.to_string().into())).await?;

    let reply = loop {
        match socket.next().await.ok_or_else(|| anyhow::anyhow!("socket closed"))?? {
            Message::Text(text) => break serde_json::from_str::<serde_json::Value>(&text)?,
            _ => continue,
        }
    };
    assert_eq!(reply["id"], 1);
    assert!(reply["result"]["id"].is_string());

    let resp: serde_json::Value = reqwest::get(format!(
        "{}/api/v1/messages?agentId=server-resolved-agent",
        server.base_url()
    ))
    .await?
    .json()
    .await?;
    assert_eq!(resp["messages"][0]["agent_id"], "server-resolved-agent");

    // The agent shows up in the listing while connected.
    let agents: serde_json::Value =
        reqwest::get(format!("{}/api/v1/agents", server.base_url())).await?.json().await?;
    assert_eq!(agents["agents"][0]["agentId"], "server-resolved-agent");
    Ok(())
}

// -- SSE ----------------------------------------------------------------------

#[tokio::test]
async fn sse_streams_events_with_ids_and_resume() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let resp = reqwest::get(format!("{}/api/events", server.base_url())).await?;
    assert_eq!(resp.status().as_u16(), 200);
    let mut body = resp.bytes_stream();

    // The initial frame announces the connection.
    let first = read_chunk(&mut body).await?;
    assert!(first.contains("event: connected"), "got: {first}");

    server.state.bus.emit("bead:created", json!({ "id": "b-1" }));
    let frame = read_chunk(&mut body).await?;
    assert!(frame.contains("event: bead_update"), "got: {frame}");
    assert!(frame.contains("\"action\":\"created\""), "got: {frame}");
    assert!(frame.contains("id: 1"), "got: {frame}");

    // Resume from a future id: earlier events are suppressed until the
    // live seq overtakes it.
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/api/events", server.base_url()))
        .header("Last-Event-ID", "2")
        .send()
        .await?;
    let mut resumed = resp.bytes_stream();
    let first = read_chunk(&mut resumed).await?;
    assert!(first.contains("event: connected"));

    server.state.bus.emit("mail:received", json!({ "id": "m-1" }));  // seq 2: suppressed
    server.state.bus.emit("agent:status_changed", json!({ "agentId": "a" })); // seq 3
    let frame = read_chunk(&mut resumed).await?;
    assert!(!frame.contains("mail_received"), "suppressed event leaked: {frame}");
    assert!(frame.contains("event: agent_status"), "got: {frame}");
    assert!(frame.contains("id: 3"), "got: {frame}");
    Ok(())
}

async fn read_chunk(
    stream: &mut (impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
) -> anyhow::Result<String> {
    let chunk = tokio::time::timeout(std::time::Duration::from_secs(5), stream.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("sse stream ended"))??;
    Ok(String::from_utf8_lossy(&chunk).into_owned())
}
