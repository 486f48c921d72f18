// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end flows through the orchestrator over the fake driver.

use crate::test_helpers::{command_hook, test_config, TestEnv};
use backrest_config::{HookCondition, OnError, RetentionPolicy};
use backrest_core::{OpPayload, OpStatus, Operation};
use std::time::Duration;

fn data_dir() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("findme.txt"), b"original bytes").unwrap();
    dir
}

fn flow_of<'a>(ops: &'a [Operation], flow_id: i64) -> Vec<&'a Operation> {
    ops.iter().filter(|op| op.flow_id == flow_id).collect()
}

// Happy path: one backup produces exactly backup → index → forget in one
// flow, with the flow id anchored on the backup operation.
#[tokio::test]
async fn backup_flow_produces_ordered_operations() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("complete flow", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "forget" && op.is_terminal())
        })
        .await;

    let backup = ops
        .iter()
        .find(|op| op.payload.kind() == "backup")
        .expect("backup op");
    assert_eq!(backup.status, OpStatus::Success);
    assert_eq!(backup.flow_id, backup.id);

    let flow = flow_of(&ops, backup.flow_id);
    let kinds: Vec<&str> = flow.iter().map(|op| op.payload.kind()).collect();
    assert_eq!(kinds, vec!["backup", "index_snapshot", "forget"]);

    // Ordered by id within the flow
    assert!(flow.windows(2).all(|w| w[0].id < w[1].id));

    let index = flow[1];
    assert_eq!(index.status, OpStatus::Success);
    assert!(!index.snapshot_id.is_empty());

    let forget = flow[2];
    assert_eq!(forget.status, OpStatus::Success);
    let OpPayload::Forget { removed } = &forget.payload else {
        panic!("wrong payload");
    };
    assert!(removed.is_empty());
}

// Retention enforcement: keep-last-1 and two backups leave exactly one
// forgotten snapshot behind.
#[tokio::test]
async fn retention_forgets_the_older_snapshot() {
    let data = data_dir();
    let mut config = test_config(vec![data.path().display().to_string()]);
    config.plans[0].retention = RetentionPolicy::KeepLastN { count: 1 };
    let env = TestEnv::start(config).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    env.wait_ops("first flow", |ops| {
        ops.iter()
            .any(|op| op.payload.kind() == "forget" && op.is_terminal())
    })
    .await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("second flow", |ops| {
            ops.iter()
                .filter(|op| op.payload.kind() == "forget" && op.is_terminal())
                .count()
                >= 2
        })
        .await;

    let removed_counts: Vec<usize> = ops
        .iter()
        .filter_map(|op| match &op.payload {
            OpPayload::Forget { removed } => Some(removed.len()),
            _ => None,
        })
        .collect();
    assert!(removed_counts.contains(&1));
    assert_eq!(env.driver.snapshot_count(), 1);
}

// A start hook failing under the CANCEL policy stops the backup before
// the backup tool ever runs.
#[tokio::test]
async fn cancel_policy_start_hook_aborts_the_backup() {
    let data = data_dir();
    let mut config = test_config(vec![data.path().display().to_string()]);
    let mut hook = command_hook(vec![HookCondition::SnapshotStart], "exit 123");
    hook.on_error = OnError::Cancel;
    config.plans[0].hooks.push(hook);
    let env = TestEnv::start(config).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("cancelled backup", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "backup" && op.is_terminal())
        })
        .await;

    let backup = ops
        .iter()
        .find(|op| op.payload.kind() == "backup")
        .unwrap();
    assert_eq!(backup.status, OpStatus::UserCancelled);

    let hook_op = ops
        .iter()
        .find(|op| op.payload.kind() == "run_hook")
        .expect("hook op");
    assert_eq!(hook_op.status, OpStatus::Error);
    assert_eq!(hook_op.flow_id, backup.flow_id);

    // The backup tool was never invoked
    assert!(!env.driver.calls().contains(&"backup".to_string()));
    // And no follow-up forget appeared
    assert!(!ops.iter().any(|op| op.payload.kind() == "forget"));
}

// The same failing hook under IGNORE records the failure and lets the
// backup proceed.
#[tokio::test]
async fn ignore_policy_start_hook_lets_the_backup_run() {
    let data = data_dir();
    let mut config = test_config(vec![data.path().display().to_string()]);
    config
        .plans[0]
        .hooks
        .push(command_hook(vec![HookCondition::SnapshotStart], "exit 123"));
    let env = TestEnv::start(config).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("backup despite hook failure", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "backup" && op.is_terminal())
        })
        .await;

    let backup = ops
        .iter()
        .find(|op| op.payload.kind() == "backup")
        .unwrap();
    assert_eq!(backup.status, OpStatus::Success);

    let hook_op = ops
        .iter()
        .find(|op| op.payload.kind() == "run_hook")
        .unwrap();
    assert_eq!(hook_op.status, OpStatus::Error);

    assert_eq!(env.driver.snapshot_count(), 1);
}

// User-initiated cancel of an in-progress backup reaches a terminal
// status within the grace window and suppresses the follow-up forget.
#[tokio::test]
async fn user_cancel_interrupts_an_in_progress_backup() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;
    env.driver.set_backup_delay(Duration::from_secs(30));

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("backup in progress", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "backup" && op.status == OpStatus::InProgress)
        })
        .await;
    let backup_id = ops
        .iter()
        .find(|op| op.payload.kind() == "backup")
        .unwrap()
        .id;

    env.orchestrator.cancel(backup_id).unwrap();

    let ops = env
        .wait_ops("cancelled terminal state", |ops| {
            ops.iter().any(|op| op.id == backup_id && op.is_terminal())
        })
        .await;
    let backup = ops.iter().find(|op| op.id == backup_id).unwrap();
    assert!(matches!(
        backup.status,
        OpStatus::UserCancelled | OpStatus::Error | OpStatus::SystemCancelled
    ));
    assert!(!ops.iter().any(|op| op.payload.kind() == "forget"));
}

// Restore round-trip: back a file up, restore the snapshot elsewhere,
// find the original bytes.
#[tokio::test]
async fn restore_round_trips_backed_up_bytes() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("flow complete", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "forget" && op.is_terminal())
        })
        .await;
    let snapshot_id = ops
        .iter()
        .find(|op| op.payload.kind() == "index_snapshot")
        .unwrap()
        .snapshot_id
        .clone();
    assert!(!snapshot_id.is_empty());

    let target = tempfile::TempDir::new().unwrap();
    env.orchestrator
        .restore(
            &"r1".into(),
            &"p1".into(),
            &snapshot_id,
            None,
            target.path().display().to_string(),
        )
        .unwrap();

    let ops = env
        .wait_ops("restore complete", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "restore" && op.is_terminal())
        })
        .await;
    let restore = ops
        .iter()
        .find(|op| op.payload.kind() == "restore")
        .unwrap();
    assert_eq!(restore.status, OpStatus::Success);

    let restored = target
        .path()
        .join(
            data.path()
                .display()
                .to_string()
                .trim_start_matches('/'),
        )
        .join("findme.txt");
    assert_eq!(std::fs::read(restored).unwrap(), b"original bytes");
}

// A hook retry policy leaves the operation pending and re-runs the task.
#[tokio::test]
async fn retry_policy_start_hook_keeps_the_operation_pending() {
    let data = data_dir();
    let mut config = test_config(vec![data.path().display().to_string()]);
    let mut hook = command_hook(vec![HookCondition::SnapshotStart], "exit 1");
    hook.on_error = OnError::Retry1Min;
    config.plans[0].hooks.push(hook);
    let env = TestEnv::start(config).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("hook failure recorded", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "run_hook" && op.status == OpStatus::Error)
        })
        .await;

    let backup = ops
        .iter()
        .find(|op| op.payload.kind() == "backup")
        .unwrap();
    assert_eq!(backup.status, OpStatus::Pending);
    assert!(!env.driver.calls().contains(&"backup".to_string()));
}

// Per-repo serialization: with two plans on one repo, both flows finish
// and the repo never sees two operations in progress at once.
#[tokio::test]
async fn concurrent_backups_on_one_repo_are_serialized() {
    let data = data_dir();
    let mut config = test_config(vec![data.path().display().to_string()]);
    let mut second = config.plans[0].clone();
    second.id = "p2".into();
    config.plans.push(second);
    let env = TestEnv::start(config).await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    env.orchestrator.backup(&"p2".into()).unwrap();

    let ops = env
        .wait_ops("both flows", |ops| {
            ops.iter()
                .filter(|op| op.payload.kind() == "forget" && op.is_terminal())
                .count()
                >= 2
        })
        .await;

    for plan in ["p1", "p2"] {
        assert!(ops
            .iter()
            .any(|op| op.plan_id == plan
                && op.payload.kind() == "backup"
                && op.status == OpStatus::Success));
    }
}
