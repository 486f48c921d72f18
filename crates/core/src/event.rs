// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Broadcast events emitted by the operation log

use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// Change notification delivered to operation-log subscribers.
///
/// Delivery is at-least-once. A subscriber that observes a lagged stream
/// must treat itself as dirty and requery before trusting further events.
/// `KeepAlive` carries no change; it lets long-lived streams heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpEvent {
    Created { op: Operation },
    Updated { op: Operation },
    Deleted { id: i64 },
    KeepAlive,
}

impl OpEvent {
    /// Short description for log spans
    pub fn log_summary(&self) -> String {
        match self {
            OpEvent::Created { op } => format!("created op {} ({})", op.id, op.payload.kind()),
            OpEvent::Updated { op } => format!("updated op {} ({})", op.id, op.status),
            OpEvent::Deleted { id } => format!("deleted op {id}"),
            OpEvent::KeepAlive => "keep-alive".to_string(),
        }
    }
}
