// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use backrest_core::test_support::backup_op;
use backrest_core::{OpStatus, Operation};
use tempfile::TempDir;

fn open_log(dir: &TempDir) -> OpLog {
    OpLog::open(dir.path()).unwrap()
}

fn add_n(log: &OpLog, n: usize) -> Vec<Operation> {
    (0..n)
        .map(|_| log.add(backup_op("inst", "guid", "plan")).unwrap())
        .collect()
}

#[test]
fn add_assigns_id_modno_and_flow() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let a = log.add(backup_op("inst", "guid", "plan")).unwrap();
    let b = log.add(backup_op("inst", "guid", "plan")).unwrap();

    assert_eq!(a.id, 1);
    assert_eq!(b.id, 2);
    assert!(b.modno > a.modno);
    // First operation of a flow is the flow
    assert_eq!(a.flow_id, a.id);
    assert_eq!(b.flow_id, b.id);
}

#[test]
fn explicit_flow_id_is_preserved() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let first = log.add(backup_op("inst", "guid", "plan")).unwrap();
    let mut second = backup_op("inst", "guid", "plan");
    second.flow_id = first.flow_id;
    let second = log.add(second).unwrap();

    assert_eq!(second.flow_id, first.id);
    let flow = log.list(&OpSelector::all().with_flow_id(first.id));
    assert_eq!(flow.len(), 2);
    // Ascending id order within the flow
    assert!(flow[0].id < flow[1].id);
}

#[test]
fn update_bumps_modno_and_preserves_id() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut op = add_n(&log, 1).remove(0);
    let old_modno = op.modno;
    op.status = OpStatus::Success;
    let updated = log.update(op).unwrap();

    assert!(updated.modno > old_modno);
    assert_eq!(log.get(updated.id).unwrap().status, OpStatus::Success);
}

#[test]
fn update_of_missing_operation_errors() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    let mut op = backup_op("inst", "guid", "plan");
    op.id = 404;
    assert!(matches!(log.update(op), Err(OpLogError::NotFound(404))));
}

#[test]
fn modno_is_strictly_increasing_across_mutations() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut ops = add_n(&log, 3);
    let mut last_modno = 0;
    for op in &ops {
        assert!(op.modno > last_modno);
        last_modno = op.modno;
    }

    ops[0].status = OpStatus::Error;
    let updated = log.update(ops[0].clone()).unwrap();
    assert!(updated.modno > last_modno);
}

#[test]
fn query_stops_when_callback_returns_false() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    add_n(&log, 5);

    let mut seen = 0;
    log.query(&OpSelector::all(), |_| {
        seen += 1;
        seen < 2
    });
    assert_eq!(seen, 2);
}

#[test]
fn indexed_queries_filter_correctly() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut op_a = backup_op("inst", "guid-a", "plan");
    op_a.unix_time_start_ms = 100;
    let mut op_b = backup_op("inst", "guid-b", "plan");
    op_b.unix_time_start_ms = 200;
    let op_a = log.add(op_a).unwrap();
    log.add(op_b).unwrap();

    let by_repo = log.list(&OpSelector::all().with_repo_guid("guid-a".into()));
    assert_eq!(by_repo.len(), 1);
    assert_eq!(by_repo[0].id, op_a.id);

    let windowed = log.list(
        &OpSelector::all()
            .with_repo_guid("guid-b".into())
            .started_after(150)
            .started_before(250),
    );
    assert_eq!(windowed.len(), 1);

    let out_of_window = log.list(
        &OpSelector::all()
            .with_repo_guid("guid-b".into())
            .started_before(200),
    );
    assert!(out_of_window.is_empty());
}

#[test]
fn latest_prefers_newest_start_time() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut old = backup_op("inst", "guid", "plan");
    old.unix_time_start_ms = 100;
    let mut new = backup_op("inst", "guid", "plan");
    new.unix_time_start_ms = 900;
    log.add(old).unwrap();
    let new = log.add(new).unwrap();

    assert_eq!(log.latest(&OpSelector::all()).unwrap().id, new.id);
}

#[test]
fn delete_broadcasts_per_id_and_reports_count() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    let ops = add_n(&log, 3);

    let mut events = log.subscribe();
    let removed = log
        .delete(&OpSelector::all().with_ids(vec![ops[0].id, ops[2].id]))
        .unwrap();
    assert_eq!(removed, 2);

    for expect_id in [ops[0].id, ops[2].id] {
        match events.try_recv().unwrap() {
            OpEvent::Deleted { id } => assert_eq!(id, expect_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(log.len(), 1);
}

#[test]
fn transform_updates_deletes_and_keeps() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    let ops = add_n(&log, 3);

    let changed = log
        .transform(&OpSelector::all(), |op| {
            if op.id == ops[0].id {
                let mut new = op.clone();
                new.status = OpStatus::SystemCancelled;
                Transformed::Update(new)
            } else if op.id == ops[1].id {
                Transformed::Delete
            } else {
                Transformed::Keep
            }
        })
        .unwrap();

    assert_eq!(changed, 2);
    assert_eq!(log.get(ops[0].id).unwrap().status, OpStatus::SystemCancelled);
    assert!(log.get(ops[1].id).is_err());
    assert_eq!(log.get(ops[2].id).unwrap().status, OpStatus::Pending);
}

#[test]
fn subscribers_see_created_before_updated_for_same_id() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    let mut events = log.subscribe();

    let mut op = log.add(backup_op("inst", "guid", "plan")).unwrap();
    op.status = OpStatus::InProgress;
    log.update(op.clone()).unwrap();

    match events.try_recv().unwrap() {
        OpEvent::Created { op: created } => assert_eq!(created.id, op.id),
        other => panic!("unexpected event: {other:?}"),
    }
    match events.try_recv().unwrap() {
        OpEvent::Updated { op: updated } => assert_eq!(updated.status, OpStatus::InProgress),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn subscribers_receive_every_mutation_exactly_once() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    let mut events = log.subscribe();

    let ops = add_n(&log, 4);
    for mut op in ops {
        op.status = OpStatus::Success;
        log.update(op).unwrap();
    }

    let mut created = 0;
    let mut updated = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            OpEvent::Created { .. } => created += 1,
            OpEvent::Updated { .. } => updated += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(created, 4);
    assert_eq!(updated, 4);
}

#[test]
fn reopen_recovers_state_from_wal() {
    let dir = TempDir::new().unwrap();
    let kept_id;
    {
        let log = open_log(&dir);
        let ops = add_n(&log, 2);
        kept_id = ops[1].id;
        log.delete(&OpSelector::all().with_ids(vec![ops[0].id]))
            .unwrap();
    }

    let log = open_log(&dir);
    assert_eq!(log.len(), 1);
    assert!(log.get(kept_id).is_ok());

    // Ids keep increasing after recovery
    let next = log.add(backup_op("inst", "guid", "plan")).unwrap();
    assert!(next.id > kept_id);
}

#[test]
fn reopen_after_compact_recovers_from_snapshot() {
    let dir = TempDir::new().unwrap();
    {
        let log = open_log(&dir);
        add_n(&log, 3);
        log.compact().unwrap();
        // One more mutation after the snapshot
        add_n(&log, 1);
    }

    let log = open_log(&dir);
    assert_eq!(log.len(), 4);
    let next = log.add(backup_op("inst", "guid", "plan")).unwrap();
    assert_eq!(next.id, 5);
}

#[test]
fn apply_remote_inserts_with_local_ids_and_provenance() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);
    add_n(&log, 2);

    let mut remote = backup_op("peer", "guid", "plan");
    remote.id = 7;
    remote.flow_id = 7;
    remote.original_instance_keyid = "key-peer".into();
    remote.status = OpStatus::Success;

    let stored = log.apply_remote(remote).unwrap();
    assert_eq!(stored.id, 3);
    assert_eq!(stored.original_id, 7);
    assert_eq!(stored.instance_id, "peer");
    assert_eq!(stored.original_instance_keyid, "key-peer");
}

#[test]
fn apply_remote_upserts_by_origin_and_rejoins_flows() {
    let dir = TempDir::new().unwrap();
    let log = open_log(&dir);

    let mut first = backup_op("peer", "guid", "plan");
    first.id = 10;
    first.flow_id = 10;
    let first_local = log.apply_remote(first.clone()).unwrap();

    // Second op of the same foreign flow
    let mut second = backup_op("peer", "guid", "plan");
    second.id = 11;
    second.flow_id = 10;
    let second_local = log.apply_remote(second).unwrap();
    assert_eq!(second_local.flow_id, first_local.id);

    // Refresh of the first op keeps its local id
    first.status = OpStatus::Success;
    let refreshed = log.apply_remote(first).unwrap();
    assert_eq!(refreshed.id, first_local.id);
    assert_eq!(refreshed.status, OpStatus::Success);
    assert_eq!(log.len(), 2);
}
