// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP delivery with backoff

use super::{build_request, Body, NotifyError, NotifyMessage, Notifier};
use async_trait::async_trait;
use backrest_config::HookAction;
use backrest_core::RetryPolicy;
use std::time::Duration;
use tracing::warn;

/// Overall deadline for one notification, retries included.
pub const NOTIFY_DEADLINE: Duration = Duration::from_secs(30);

/// Notifier that POSTs rendered messages with exponential backoff.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            policy: RetryPolicy::notifier(),
        }
    }

    async fn deliver(&self, action: &HookAction, message: &NotifyMessage) -> Result<(), NotifyError> {
        let request = build_request(action, message)?;
        let mut attempt = 0u32;
        loop {
            let mut builder = self.client.post(&request.url);
            for (name, value) in &request.headers {
                builder = builder.header(*name, value);
            }
            builder = match &request.body {
                Body::Json(value) => builder.json(value),
                Body::Text(text) => builder.body(text.clone()),
            };

            let result = builder.send().await;
            let error = match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => format!("{} returned {}", request.url, response.status()),
                Err(e) => format!("{} failed: {e}", request.url),
            };

            warn!(attempt, error = %error, "notification attempt failed");
            let delay = self.policy.jittered(attempt);
            attempt += 1;
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, action: &HookAction, message: &NotifyMessage) -> Result<(), NotifyError> {
        match tokio::time::timeout(NOTIFY_DEADLINE, self.deliver(action, message)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::SendFailed(format!(
                "{} not delivered within {}s",
                action.kind(),
                NOTIFY_DEADLINE.as_secs()
            ))),
        }
    }
}
