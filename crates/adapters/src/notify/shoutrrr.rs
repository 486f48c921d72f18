// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic webhook payloads for shoutrrr-style endpoints.
//!
//! The url is treated as a plain HTTP webhook receiving a JSON message;
//! routing to chat services is the receiving relay's business.

use super::{Body, NotifyMessage, WebhookRequest};
use serde_json::json;

pub(crate) fn request(url: &str, message: &NotifyMessage) -> WebhookRequest {
    WebhookRequest {
        url: url.to_string(),
        headers: vec![],
        body: Body::Json(json!({
            "title": message.title,
            "message": message.body,
        })),
    }
}
