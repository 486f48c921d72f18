// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::hooks::HookPipeline;
use crate::test_helpers::{test_plan, test_repo};
use backrest_adapters::{FakeDriver, FakeNotifier};
use backrest_core::test_support::backup_op;
use backrest_core::SystemClock;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    data: TempDir,
    oplog: Arc<OpLog>,
    logstore: Arc<LogStore>,
    driver: FakeDriver,
    runner: Runner<SystemClock>,
    enqueue_rx: mpsc::UnboundedReceiver<EnqueueRequest>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("a.txt"), b"hello").unwrap();

    let oplog = Arc::new(OpLog::open(&dir.path().join("oplog")).unwrap());
    let logstore = Arc::new(LogStore::open(dir.path().join("tasklogs")).unwrap());
    let driver = FakeDriver::new();
    let notifier = FakeNotifier::new();
    let hooks = HookPipeline::new(
        Arc::clone(&oplog),
        Arc::clone(&logstore),
        Arc::new(notifier),
        SystemClock,
    );
    let (enqueue_tx, enqueue_rx) = mpsc::unbounded_channel();
    let runner = Runner::new(
        Arc::clone(&oplog),
        Arc::clone(&logstore),
        Arc::new(driver.clone()),
        hooks,
        SystemClock,
        "test-instance".into(),
        std::path::PathBuf::from("/nonexistent/restic"),
        enqueue_tx,
    );
    Fixture {
        _dir: dir,
        data,
        oplog,
        logstore,
        driver,
        runner,
        enqueue_rx,
    }
}

fn data_plan(fx: &Fixture) -> backrest_config::Plan {
    test_plan(vec![fx.data.path().display().to_string()])
}

async fn execute(fx: &Fixture, task: Task) -> RunOutcome {
    fx.runner
        .execute(task, CancellationToken::new(), Arc::new(Mutex::new(None)))
        .await
}

#[tokio::test]
async fn backup_records_flow_and_enqueues_forget() {
    let mut fx = fixture();
    let task = Task::backup(data_plan(&fx), test_repo());
    execute(&fx, task).await;

    let ops = fx.oplog.list(&OpSelector::all());
    assert_eq!(ops.len(), 2);

    let backup = &ops[0];
    assert_eq!(backup.payload.kind(), "backup");
    assert_eq!(backup.status, OpStatus::Success);
    assert!(!backup.snapshot_id.is_empty());
    assert!(backup.logref.is_some());
    assert!(backup.unix_time_end_ms >= backup.unix_time_start_ms);
    // First operation of the flow owns the flow id
    assert_eq!(backup.flow_id, backup.id);

    let index = &ops[1];
    assert_eq!(index.payload.kind(), "index_snapshot");
    assert_eq!(index.flow_id, backup.flow_id);
    assert_eq!(index.snapshot_id, backup.snapshot_id);

    // The follow-up forget was enqueued into the same flow
    let request = fx.enqueue_rx.try_recv().expect("forget enqueued");
    assert!(matches!(request.task.kind, TaskKind::Forget { .. }));
    assert_eq!(request.task.flow_id, backup.flow_id);
}

#[tokio::test]
async fn auto_unlock_runs_before_the_backup() {
    let fx = fixture();
    let mut repo = test_repo();
    repo.auto_unlock = true;
    execute(&fx, Task::backup(data_plan(&fx), repo)).await;

    let calls = fx.driver.calls();
    let unlock = calls.iter().position(|c| c == "unlock").expect("unlock ran");
    let backup = calls.iter().position(|c| c == "backup").expect("backup ran");
    assert!(unlock < backup);
}

#[tokio::test]
async fn backup_transcript_is_stored() {
    let fx = fixture();
    execute(&fx, Task::backup(data_plan(&fx), test_repo())).await;

    let ops = fx.oplog.list(&OpSelector::all());
    let logref = ops[0].logref.clone().unwrap();
    let transcript = fx.logstore.read_to_string(&logref).unwrap();
    assert!(transcript.contains("snapshot"));
}

#[tokio::test]
async fn failed_backup_records_error_and_no_followup() {
    let mut fx = fixture();
    fx.driver.fail_next("repository locked by another process");

    execute(&fx, Task::backup(data_plan(&fx), test_repo())).await;

    let ops = fx.oplog.list(&OpSelector::all());
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OpStatus::Error);
    assert!(ops[0].display_message.contains("repository locked"));
    assert!(fx.enqueue_rx.try_recv().is_err());
}

#[tokio::test]
async fn forget_marks_indexed_snapshots_forgotten() {
    let fx = fixture();
    let repo = test_repo();
    let mut plan = data_plan(&fx);
    plan.retention = backrest_config::RetentionPolicy::KeepLastN { count: 1 };

    // Two backups, then forget under keep-last-1
    execute(&fx, Task::backup(plan.clone(), repo.clone())).await;
    execute(&fx, Task::backup(plan.clone(), repo.clone())).await;
    execute(&fx, Task::forget(plan, repo, 0)).await;

    let ops = fx.oplog.list(&OpSelector::all());
    let forget = ops
        .iter()
        .find(|op| op.payload.kind() == "forget")
        .expect("forget op");
    let OpPayload::Forget { removed } = &forget.payload else {
        panic!("wrong payload");
    };
    assert_eq!(removed.len(), 1);

    // The removed snapshot's index op is flagged
    let flagged: Vec<bool> = ops
        .iter()
        .filter_map(|op| match &op.payload {
            OpPayload::IndexSnapshot { forgot, .. } => Some(*forgot),
            _ => None,
        })
        .collect();
    assert_eq!(flagged.iter().filter(|f| **f).count(), 1);
    assert_eq!(flagged.len(), 2);
}

#[tokio::test]
async fn index_reconciliation_adds_missing_and_flags_gone() {
    let fx = fixture();
    let repo = test_repo();

    // A snapshot exists that the log knows nothing about
    execute(&fx, Task::backup(data_plan(&fx), test_repo())).await;
    // Forget the index op to simulate a missing index
    let index_id = fx
        .oplog
        .list(&OpSelector::all())
        .into_iter()
        .find(|op| op.payload.kind() == "index_snapshot")
        .unwrap()
        .id;
    fx.oplog
        .delete(&OpSelector::all().with_ids(vec![index_id]))
        .unwrap();

    execute(&fx, Task::index_snapshots(repo.clone())).await;
    let ops = fx.oplog.list(&OpSelector::all());
    let index = ops
        .iter()
        .find(|op| op.payload.kind() == "index_snapshot")
        .expect("index recreated");
    assert_eq!(index.plan_id.as_str(), "p1");

    // Now drop the snapshot behind the log's back and reconcile again
    let snapshot_id = index.snapshot_id.clone();
    // Remove via the driver API so the fake's state changes
    let ctx = backrest_adapters::DriverCtx::new(
        std::path::PathBuf::from("/nonexistent/restic"),
        repo.clone(),
    );
    use backrest_adapters::RepoDriver as _;
    let _ = fx.driver.forget_snapshots(&ctx, &[snapshot_id]).await;

    execute(&fx, Task::index_snapshots(repo)).await;
    let ops = fx.oplog.list(&OpSelector::all());
    let index = ops
        .iter()
        .find(|op| op.payload.kind() == "index_snapshot")
        .unwrap();
    let OpPayload::IndexSnapshot { forgot, .. } = &index.payload else {
        panic!("wrong payload");
    };
    assert!(*forgot);
}

#[tokio::test]
async fn gc_deletes_old_operations_and_sweeps_logs() {
    let fx = fixture();

    // An ancient terminal operation with a transcript
    let (writer, logref) = fx.logstore.create().unwrap();
    writer.close().unwrap();
    let mut op = backup_op("test-instance", "guid-r1", "p1");
    op.status = OpStatus::Success;
    op.unix_time_start_ms = 1_000;
    op.unix_time_end_ms = 2_000;
    op.logref = Some(logref.clone());
    fx.oplog.add(op).unwrap();

    // A recent one that must survive
    let mut recent = backup_op("test-instance", "guid-r1", "p1");
    recent.status = OpStatus::Success;
    recent.unix_time_start_ms = SystemClock.epoch_ms();
    let recent = fx.oplog.add(recent).unwrap();

    execute(&fx, Task::collect_garbage()).await;

    let ops = fx.oplog.list(&OpSelector::all());
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].id, recent.id);
    // The old transcript is gone with its operation
    assert!(fx.logstore.read_to_string(&logref).is_err());
}
