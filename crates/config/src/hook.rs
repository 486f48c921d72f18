// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hook definitions: lifecycle conditions, actions, and failure policy

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle event a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookCondition {
    SnapshotStart,
    SnapshotEnd,
    SnapshotSuccess,
    SnapshotError,
    SnapshotWarning,
    SnapshotSkipped,
    AnyError,
    CheckStart,
    CheckEnd,
    PruneStart,
    PruneEnd,
    Unknown,
}

impl HookCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookCondition::SnapshotStart => "snapshot_start",
            HookCondition::SnapshotEnd => "snapshot_end",
            HookCondition::SnapshotSuccess => "snapshot_success",
            HookCondition::SnapshotError => "snapshot_error",
            HookCondition::SnapshotWarning => "snapshot_warning",
            HookCondition::SnapshotSkipped => "snapshot_skipped",
            HookCondition::AnyError => "any_error",
            HookCondition::CheckStart => "check_start",
            HookCondition::CheckEnd => "check_end",
            HookCondition::PruneStart => "prune_start",
            HookCondition::PruneEnd => "prune_end",
            HookCondition::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HookCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do when a hook itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Record the failure, keep going.
    #[default]
    Ignore,
    /// Cancel the surrounding task (status user_cancelled).
    Cancel,
    /// Fail the surrounding task (status error).
    Fatal,
    Retry1Min,
    Retry10Min,
}

impl OnError {
    /// Requeue delay for retrying policies, `None` otherwise.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            OnError::Retry1Min => Some(Duration::from_secs(60)),
            OnError::Retry10Min => Some(Duration::from_secs(600)),
            _ => None,
        }
    }
}

/// The action a hook performs when triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HookAction {
    /// Run a shell script with the expanded template vocabulary available.
    Command { script: String },
    Discord {
        webhook_url: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        template: String,
    },
    Gotify {
        base_url: String,
        token: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        title_template: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        template: String,
    },
    Slack {
        webhook_url: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        template: String,
    },
    Shoutrrr {
        shoutrrr_url: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        template: String,
    },
    Healthchecks {
        webhook_url: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        template: String,
    },
}

impl HookAction {
    /// Action kind for display and Run-Hook operation names.
    pub fn kind(&self) -> &'static str {
        match self {
            HookAction::Command { .. } => "command",
            HookAction::Discord { .. } => "discord",
            HookAction::Gotify { .. } => "gotify",
            HookAction::Slack { .. } => "slack",
            HookAction::Shoutrrr { .. } => "shoutrrr",
            HookAction::Healthchecks { .. } => "healthchecks",
        }
    }

    /// Message template, falling back to the default when unset.
    pub fn template(&self) -> &str {
        let t = match self {
            HookAction::Command { script } => script,
            HookAction::Discord { template, .. }
            | HookAction::Gotify { template, .. }
            | HookAction::Slack { template, .. }
            | HookAction::Shoutrrr { template, .. }
            | HookAction::Healthchecks { template, .. } => template,
        };
        if t.is_empty() {
            DEFAULT_TEMPLATE
        } else {
            t
        }
    }
}

/// Default notifier body when a hook declares no template.
pub const DEFAULT_TEMPLATE: &str =
    "${event} plan=${plan_id} repo=${repo_id} status=${status} ${error}";

/// A hook: the conditions it fires on, its action, and its failure policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<HookCondition>,
    pub action: HookAction,
    #[serde(default)]
    pub on_error: OnError,
}

impl Hook {
    pub fn fires_on(&self, condition: HookCondition) -> bool {
        self.conditions.contains(&condition)
    }
}

#[cfg(test)]
#[path = "hook_tests.rs"]
mod tests;
