// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification adapters for hook actions.
//!
//! Each backend reduces to an HTTP request; the builders here are pure
//! (url + headers + body) so they can be tested without a network, and
//! [`WebhookNotifier`] delivers them with exponential backoff under one
//! overall deadline.

mod discord;
mod gotify;
mod healthchecks;
mod http;
mod shoutrrr;
mod slack;

pub use http::{WebhookNotifier, NOTIFY_DEADLINE};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeNotifier, NotifyCall};

use async_trait::async_trait;
use backrest_config::HookAction;
use thiserror::Error;

/// Errors from notify operations
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("hook action {0} is not a notifier")]
    NotANotifier(&'static str),
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMessage {
    pub title: String,
    pub body: String,
    /// Whether the triggering condition was a success (healthchecks pings
    /// a different endpoint for failures).
    pub success: bool,
}

/// Adapter delivering rendered hook notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Deliver `message` via the backend the action describes.
    async fn send(&self, action: &HookAction, message: &NotifyMessage) -> Result<(), NotifyError>;
}

/// A prepared HTTP request: where to POST and what.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Body {
    Json(serde_json::Value),
    Text(String),
}

/// Build the request for a notifier action, if the action is one.
pub(crate) fn build_request(
    action: &HookAction,
    message: &NotifyMessage,
) -> Result<WebhookRequest, NotifyError> {
    match action {
        HookAction::Command { .. } => Err(NotifyError::NotANotifier("command")),
        HookAction::Discord { webhook_url, .. } => Ok(discord::request(webhook_url, message)),
        HookAction::Slack { webhook_url, .. } => Ok(slack::request(webhook_url, message)),
        HookAction::Gotify {
            base_url, token, ..
        } => Ok(gotify::request(base_url, token, message)),
        HookAction::Shoutrrr { shoutrrr_url, .. } => Ok(shoutrrr::request(shoutrrr_url, message)),
        HookAction::Healthchecks { webhook_url, .. } => {
            Ok(healthchecks::request(webhook_url, message))
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
