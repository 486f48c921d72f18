// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discord webhook payloads

use super::{Body, NotifyMessage, WebhookRequest};
use serde_json::json;

pub(crate) fn request(webhook_url: &str, message: &NotifyMessage) -> WebhookRequest {
    WebhookRequest {
        url: webhook_url.to_string(),
        headers: vec![],
        body: Body::Json(json!({
            "content": format!("{}\n{}", message.title, message.body),
        })),
    }
}
