// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gotify message payloads

use super::{Body, NotifyMessage, WebhookRequest};
use serde_json::json;

pub(crate) fn request(base_url: &str, token: &str, message: &NotifyMessage) -> WebhookRequest {
    WebhookRequest {
        url: format!("{}/message", base_url.trim_end_matches('/')),
        headers: vec![("X-Gotify-Key", token.to_string())],
        body: Body::Json(json!({
            "title": message.title,
            "message": message.body,
            "priority": if message.success { 2 } else { 5 },
        })),
    }
}
