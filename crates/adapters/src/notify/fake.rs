// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake notifier recording deliveries for tests

use super::{NotifyError, NotifyMessage, Notifier};
use async_trait::async_trait;
use backrest_config::HookAction;
use parking_lot::Mutex;
use std::sync::Arc;

/// One recorded delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyCall {
    pub kind: &'static str,
    pub title: String,
    pub body: String,
    pub success: bool,
}

/// Records every send; can be told to fail. Clones share state.
#[derive(Clone, Default)]
pub struct FakeNotifier {
    calls: Arc<Mutex<Vec<NotifyCall>>>,
    fail: Arc<Mutex<bool>>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<NotifyCall> {
        self.calls.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(&self, action: &HookAction, message: &NotifyMessage) -> Result<(), NotifyError> {
        self.calls.lock().push(NotifyCall {
            kind: action.kind(),
            title: message.title.clone(),
            body: message.body.clone(),
            success: message.success,
        });
        if *self.fail.lock() {
            return Err(NotifyError::SendFailed("injected failure".to_string()));
        }
        Ok(())
    }
}
