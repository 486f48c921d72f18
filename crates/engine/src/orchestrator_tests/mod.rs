// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod scenarios;

use super::*;
use crate::test_helpers::{test_config, TestEnv};
use backrest_core::{OpSelector, OpStatus};
use std::time::Duration;

fn data_dir() -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("file.txt"), b"payload").unwrap();
    dir
}

#[tokio::test]
async fn run_command_returns_a_followable_operation() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;

    let op_id = env
        .orchestrator
        .run_command(&"r1".into(), vec!["unlock".into()])
        .unwrap();

    let ops = env
        .wait_ops("run_command to finish", |ops| {
            ops.iter().any(|op| op.id == op_id && op.is_terminal())
        })
        .await;
    let op = ops.iter().find(|op| op.id == op_id).unwrap();
    assert_eq!(op.status, OpStatus::Success);
    assert_eq!(op.payload.kind(), "run_command");
    assert!(env.driver.calls().contains(&"run_command".to_string()));
}

#[tokio::test]
async fn unknown_targets_are_rejected() {
    let env = TestEnv::start(test_config(vec!["/data".into()])).await;
    assert!(matches!(
        env.orchestrator.backup(&"nope".into()),
        Err(EngineError::PlanNotFound(_))
    ));
    assert!(matches!(
        env.orchestrator.do_repo_task(&"nope".into(), RepoTask::Prune),
        Err(EngineError::RepoNotFound(_))
    ));
    assert!(matches!(
        env.orchestrator.run_command(&"r1".into(), vec![]),
        Err(EngineError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn cancel_of_a_terminal_operation_is_rejected() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;
    env.orchestrator.backup(&"p1".into()).unwrap();
    let ops = env
        .wait_ops("backup to finish", |ops| {
            ops.iter()
                .any(|op| op.payload.kind() == "backup" && op.status == OpStatus::Success)
        })
        .await;
    let done = ops
        .iter()
        .find(|op| op.payload.kind() == "backup")
        .unwrap();

    assert!(matches!(
        env.orchestrator.cancel(done.id),
        Err(EngineError::NotCancellable(_))
    ));
}

#[tokio::test]
async fn clear_history_removes_operations_and_transcripts() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;
    env.orchestrator.backup(&"p1".into()).unwrap();
    env.wait_ops("flow to finish", |ops| {
        ops.iter().any(|op| op.payload.kind() == "forget")
    })
    .await;

    let logrefs: Vec<String> = env
        .ops()
        .iter()
        .filter_map(|op| op.logref.clone())
        .collect();
    assert!(!logrefs.is_empty());

    let removed = env
        .orchestrator
        .clear_history(OpSelector::all(), false)
        .unwrap();
    assert!(removed >= 3);
    assert!(env.oplog.is_empty());
    for logref in logrefs {
        assert!(env.logstore.read_to_string(&logref).is_err());
    }
}

#[tokio::test]
async fn clear_history_only_failed_keeps_successes() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;

    env.driver.fail_next("boom");
    env.orchestrator.backup(&"p1".into()).unwrap();
    env.wait_ops("failed backup", |ops| {
        ops.iter().any(|op| op.status == OpStatus::Error)
    })
    .await;

    env.orchestrator.backup(&"p1".into()).unwrap();
    env.wait_ops("successful backup", |ops| {
        ops.iter()
            .any(|op| op.payload.kind() == "backup" && op.status == OpStatus::Success)
    })
    .await;

    let removed = env
        .orchestrator
        .clear_history(OpSelector::all(), true)
        .unwrap();
    assert_eq!(removed, 1);
    let ops = env.ops();
    assert!(ops.iter().all(|op| op.status != OpStatus::Error));
}

#[tokio::test]
async fn config_rebuild_drops_removed_plans() {
    let data = data_dir();
    let mut config = test_config(vec![data.path().display().to_string()]);
    config.plans[0].schedule = backrest_config::Schedule::interval_hours(1);
    let env = TestEnv::start(config.clone()).await;

    // The scheduled backup fires immediately (no prior run) and the task
    // re-enqueues an hour out
    env.wait_ops("scheduled backup", |ops| {
        ops.iter()
            .any(|op| op.payload.kind() == "backup" && op.is_terminal())
    })
    .await;

    // Remove the plan; the queued backup task must disappear
    let mut updated = config.clone();
    updated.plans.clear();
    updated.modno += 1;
    env.config_tx.send(std::sync::Arc::new(updated)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let backups_before = env
        .ops()
        .iter()
        .filter(|op| op.payload.kind() == "backup")
        .count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let backups_after = env
        .ops()
        .iter()
        .filter(|op| op.payload.kind() == "backup")
        .count();
    assert_eq!(backups_before, backups_after);
}

#[tokio::test]
async fn dashboard_reports_last_status_and_bytes() {
    let data = data_dir();
    let env = TestEnv::start(test_config(vec![data.path().display().to_string()])).await;
    env.orchestrator.backup(&"p1".into()).unwrap();
    env.wait_ops("backup", |ops| {
        ops.iter()
            .any(|op| op.payload.kind() == "backup" && op.status == OpStatus::Success)
    })
    .await;

    let dashboard = env.orchestrator.dashboard();
    assert_eq!(dashboard.plans.len(), 1);
    assert_eq!(dashboard.plans[0].last_status, Some(OpStatus::Success));
    assert!(dashboard.bytes_added_30d > 0);
}
