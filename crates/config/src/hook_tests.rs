// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;
use yare::parameterized;

#[parameterized(
    ignore = { OnError::Ignore, None },
    cancel = { OnError::Cancel, None },
    fatal = { OnError::Fatal, None },
    retry_1min = { OnError::Retry1Min, Some(Duration::from_secs(60)) },
    retry_10min = { OnError::Retry10Min, Some(Duration::from_secs(600)) },
)]
fn retry_delays(policy: OnError, expect: Option<Duration>) {
    assert_eq!(policy.retry_delay(), expect);
}

#[test]
fn fires_on_checks_membership() {
    let hook = Hook {
        conditions: vec![HookCondition::SnapshotStart, HookCondition::AnyError],
        action: HookAction::Command {
            script: "true".into(),
        },
        on_error: OnError::Ignore,
    };
    assert!(hook.fires_on(HookCondition::SnapshotStart));
    assert!(hook.fires_on(HookCondition::AnyError));
    assert!(!hook.fires_on(HookCondition::SnapshotSuccess));
}

#[test]
fn empty_template_falls_back_to_default() {
    let action = HookAction::Discord {
        webhook_url: "https://example.test/webhook".into(),
        template: String::new(),
    };
    assert_eq!(action.template(), DEFAULT_TEMPLATE);

    let action = HookAction::Slack {
        webhook_url: "https://example.test/webhook".into(),
        template: "${event}".into(),
    };
    assert_eq!(action.template(), "${event}");
}

#[test]
fn conditions_serialize_snake_case() {
    let json = serde_json::to_string(&HookCondition::SnapshotWarning).unwrap();
    assert_eq!(json, "\"snapshot_warning\"");
}

#[test]
fn hook_round_trips_through_json() {
    let hook = Hook {
        conditions: vec![HookCondition::PruneEnd],
        action: HookAction::Gotify {
            base_url: "https://gotify.test".into(),
            token: "tok".into(),
            title_template: String::new(),
            template: "${status}".into(),
        },
        on_error: OnError::Retry1Min,
    };
    let json = serde_json::to_string(&hook).unwrap();
    let back: Hook = serde_json::from_str(&json).unwrap();
    assert_eq!(back, hook);
}
