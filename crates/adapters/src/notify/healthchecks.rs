// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Healthchecks.io pings.
//!
//! Success pings the check url, failure pings `<url>/fail`; the body is
//! the plain-text message either way.

use super::{Body, NotifyMessage, WebhookRequest};

pub(crate) fn request(webhook_url: &str, message: &NotifyMessage) -> WebhookRequest {
    let base = webhook_url.trim_end_matches('/');
    let url = if message.success {
        base.to_string()
    } else {
        format!("{base}/fail")
    };
    WebhookRequest {
        url,
        headers: vec![],
        body: Body::Text(format!("{}\n{}", message.title, message.body)),
    }
}
