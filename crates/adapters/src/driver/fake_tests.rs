// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use backrest_config::Repo;
use std::path::PathBuf;
use tempfile::TempDir;

fn ctx() -> DriverCtx {
    DriverCtx::new(PathBuf::from("/nonexistent/restic"), Repo::default())
}

fn spec(paths: Vec<String>) -> BackupSpec {
    BackupSpec {
        paths,
        tags: vec!["plan:p1".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn backup_then_restore_round_trips_file_bytes() {
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("findme.txt"), b"original bytes").unwrap();

    let driver = FakeDriver::new();
    let summary = driver
        .backup(
            &ctx(),
            &spec(vec![data.path().display().to_string()]),
            &|_| {},
        )
        .await
        .unwrap();
    assert!(!summary.snapshot_id.is_empty());
    assert_eq!(summary.files_new, 1);

    let target = TempDir::new().unwrap();
    driver
        .restore(
            &ctx(),
            &summary.snapshot_id,
            None,
            &target.path().display().to_string(),
            &|_| {},
        )
        .await
        .unwrap();

    let restored = target
        .path()
        .join(data.path().display().to_string().trim_start_matches('/'))
        .join("findme.txt");
    assert_eq!(std::fs::read(restored).unwrap(), b"original bytes");
}

#[tokio::test]
async fn forget_applies_retention_policy() {
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("f.txt"), b"x").unwrap();
    let driver = FakeDriver::new();
    let s = spec(vec![data.path().display().to_string()]);

    driver.backup(&ctx(), &s, &|_| {}).await.unwrap();
    driver.backup(&ctx(), &s, &|_| {}).await.unwrap();
    driver.backup(&ctx(), &s, &|_| {}).await.unwrap();
    assert_eq!(driver.snapshot_count(), 3);

    let removed = driver
        .forget(
            &ctx(),
            &backrest_config::RetentionPolicy::KeepLastN { count: 1 },
            Some("plan:p1"),
        )
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(driver.snapshot_count(), 1);

    // Idempotent: nothing more to forget
    let removed = driver
        .forget(
            &ctx(),
            &backrest_config::RetentionPolicy::KeepLastN { count: 1 },
            Some("plan:p1"),
        )
        .await
        .unwrap();
    assert!(removed.is_empty());
}

#[tokio::test]
async fn snapshots_filter_by_tag() {
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("f.txt"), b"x").unwrap();
    let driver = FakeDriver::new();

    driver
        .backup(&ctx(), &spec(vec![data.path().display().to_string()]), &|_| {})
        .await
        .unwrap();

    assert_eq!(driver.snapshots(&ctx(), None).await.unwrap().len(), 1);
    assert_eq!(
        driver
            .snapshots(&ctx(), Some("plan:p1"))
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(driver
        .snapshots(&ctx(), Some("plan:other"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn injected_failure_surfaces_as_command_error() {
    let driver = FakeDriver::new();
    driver.fail_next("repository is locked");
    let err = driver
        .backup(&ctx(), &spec(vec![]), &|_| {})
        .await
        .unwrap_err();
    match err {
        DriverError::CommandFailed { tail, .. } => assert_eq!(tail, "repository is locked"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn delayed_backup_honors_cancellation() {
    let driver = FakeDriver::new();
    driver.set_backup_delay(Duration::from_secs(30));
    let ctx = ctx();
    ctx.cancel.cancel();
    let err = driver
        .backup(&ctx, &spec(vec![]), &|_| {})
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
