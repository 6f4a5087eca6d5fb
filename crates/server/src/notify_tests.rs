// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One-shot HTTP mock: accepts a single request, replies with `status`,
/// and hands the captured request text back through the channel.
async fn mock_webhook(
    status: &'static str,
) -> anyhow::Result<(u16, tokio::sync::oneshot::Receiver<String>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let (tx, rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        // Read until the body announced by content-length is complete.
        loop {
            let Ok(n) = socket.read(&mut buf).await else {
                return;
            };
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some((head, tail)) = text.split_once("\r\n\r\n") {
                let content_length = head
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower.strip_prefix("content-length:").map(str::to_owned)
                    })
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if tail.len() >= content_length {
                    break;
                }
            }
        }

        let response =
            format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
    });

    Ok((port, rx))
}

#[tokio::test]
async fn noop_notifier_is_inert() {
    NoopNotifier.notify("title", "body").await;
}

#[tokio::test]
async fn webhook_posts_title_body_and_timestamp() -> anyhow::Result<()> {
    let (port, rx) = mock_webhook("200 OK").await?;
    let notifier = WebhookNotifier::new(format!("http://127.0.0.1:{port}/hook"));

    notifier.notify("Message from alpha", "hello there").await;

    let request = rx.await?;
    let (head, body) = request
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("no body in request: {request}"))?;
    assert!(head.starts_with("POST /hook"), "head: {head}");
    assert!(head.to_ascii_lowercase().contains("content-type: application/json"));

    let payload: serde_json::Value = serde_json::from_str(body)?;
    assert_eq!(payload["title"], "Message from alpha");
    assert_eq!(payload["body"], "hello there");
    assert!(payload["ts"].is_u64());
    Ok(())
}

#[tokio::test]
async fn webhook_swallows_rejection() -> anyhow::Result<()> {
    let (port, rx) = mock_webhook("500 Internal Server Error").await?;
    let notifier = WebhookNotifier::new(format!("http://127.0.0.1:{port}/hook"));

    // A rejected POST is logged, never surfaced.
    notifier.notify("t", "b").await;
    let request = rx.await?;
    assert!(request.starts_with("POST"));
    Ok(())
}

#[tokio::test]
async fn webhook_swallows_connection_failure() -> anyhow::Result<()> {
    // Grab a port with nothing listening on it.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    let notifier = WebhookNotifier::new(format!("http://127.0.0.1:{port}/hook"));

    // Must return, not hang or panic.
    tokio::time::timeout(
        std::time::Duration::from_secs(15),
        notifier.notify("t", "b"),
    )
    .await?;
    Ok(())
}
