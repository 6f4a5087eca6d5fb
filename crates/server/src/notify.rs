// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Push-notification hook for user-addressed agent messages.
//!
//! The transport to an actual device is out of scope; the integration
//! point is a webhook POST. Delivery is best-effort and never blocks the
//! message path.

use async_trait::async_trait;
use serde_json::json;

use crate::bus::epoch_ms;

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, title: &str, body: &str);
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _title: &str, _body: &str) {}
}

/// POSTs `{title, body, ts}` to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, body: &str) {
        let payload = json!({ "title": title, "body": body, "ts": epoch_ms() });
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(url = %self.url, "push notification delivered");
            }
            Ok(resp) => {
                tracing::warn!(url = %self.url, status = %resp.status(), "push webhook rejected");
            }
            Err(e) => {
                tracing::warn!(url = %self.url, err = %e, "push webhook failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
