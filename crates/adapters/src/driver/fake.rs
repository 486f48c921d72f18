// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake driver for tests: an in-memory repository.
//!
//! Backups copy real file bytes from the requested paths, restores write
//! them back out, and forget applies the retention policy with the same
//! pure partition the real tool is driven by. Calls are recorded for
//! assertions, and failures/delays can be injected.

use super::progress::BackupEvent;
use super::{
    BackupProgressFn, BackupSpec, DriverCtx, DriverError, LsEntry, RepoDriver, RestoreProgressFn,
};
use async_trait::async_trait;
use backrest_config::RetentionPolicy;
use backrest_core::{BackupProgress, BackupSummary, RepoStats, RestoreProgress, SnapshotMeta};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct FakeSnapshot {
    meta: SnapshotMeta,
    files: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    snapshots: Vec<FakeSnapshot>,
    counter: u64,
    now_ms: i64,
    calls: Vec<String>,
    fail_next: Option<String>,
    backup_delay: Option<Duration>,
}

/// In-memory driver double. Clones share state.
#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        let driver = Self::default();
        driver.state.lock().now_ms = 1_700_000_000_000;
        driver
    }

    /// Every driver call recorded so far, in order (e.g. "backup", "forget").
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshots.len()
    }

    /// Make the next call fail with the given output tail.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Delay backups, so tests can cancel mid-flight.
    pub fn set_backup_delay(&self, delay: Duration) {
        self.state.lock().backup_delay = Some(delay);
    }

    fn record(&self, call: &str) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.calls.push(call.to_string());
        if let Some(tail) = state.fail_next.take() {
            return Err(DriverError::CommandFailed {
                subcommand: call.to_string(),
                code: 1,
                tail,
            });
        }
        Ok(())
    }

    fn collect_files(paths: &[String]) -> HashMap<String, Vec<u8>> {
        let mut files = HashMap::new();
        for path in paths {
            collect_into(Path::new(path), &mut files);
        }
        files
    }
}

fn collect_into(path: &Path, files: &mut HashMap<String, Vec<u8>>) {
    if path.is_file() {
        if let Ok(bytes) = std::fs::read(path) {
            files.insert(path.display().to_string(), bytes);
        }
        return;
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        collect_into(&entry.path(), files);
    }
}

#[async_trait]
impl RepoDriver for FakeDriver {
    async fn init(&self, _ctx: &DriverCtx) -> Result<(), DriverError> {
        self.record("init")
    }

    async fn backup(
        &self,
        ctx: &DriverCtx,
        spec: &BackupSpec,
        on_progress: BackupProgressFn<'_>,
    ) -> Result<BackupSummary, DriverError> {
        self.record("backup")?;

        let delay = self.state.lock().backup_delay;
        if let Some(delay) = delay {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(DriverError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if ctx.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        let files = Self::collect_files(&spec.paths);
        let total_bytes: u64 = files.values().map(|b| b.len() as u64).sum();

        on_progress(BackupEvent::Status(BackupProgress {
            percent_done: 0.5,
            files_done: files.len() as u64 / 2,
            bytes_done: total_bytes / 2,
            total_bytes,
            current_files: spec.paths.clone(),
        }));

        let mut state = self.state.lock();
        state.counter += 1;
        state.now_ms += 3_600_000;
        let snapshot_id = format!("{:016x}", state.counter);
        let meta = SnapshotMeta {
            id: snapshot_id.clone(),
            unix_time_ms: state.now_ms,
            tags: spec.tags.clone(),
            paths: spec.paths.clone(),
        };
        ctx.emit(&format!("snapshot {snapshot_id} saved"));
        state.snapshots.push(FakeSnapshot {
            meta,
            files: files.clone(),
        });

        let summary = BackupSummary {
            files_new: files.len() as u64,
            total_files_processed: files.len() as u64,
            total_bytes_processed: total_bytes,
            data_added: total_bytes,
            snapshot_id,
            ..Default::default()
        };
        on_progress(BackupEvent::Summary(summary.clone()));
        Ok(summary)
    }

    async fn snapshots(
        &self,
        _ctx: &DriverCtx,
        tag: Option<&str>,
    ) -> Result<Vec<SnapshotMeta>, DriverError> {
        self.record("snapshots")?;
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .filter(|s| tag.is_none_or(|t| s.meta.tags.iter().any(|x| x == t)))
            .map(|s| s.meta.clone())
            .collect())
    }

    async fn forget(
        &self,
        ctx: &DriverCtx,
        policy: &RetentionPolicy,
        tag: Option<&str>,
    ) -> Result<Vec<SnapshotMeta>, DriverError> {
        self.record("forget")?;

        let matching: Vec<SnapshotMeta> = self
            .state
            .lock()
            .snapshots
            .iter()
            .filter(|s| tag.is_none_or(|t| s.meta.tags.iter().any(|x| x == t)))
            .map(|s| s.meta.clone())
            .collect();

        let (_kept, forgotten) = policy.partition(&matching);
        let removed_ids: Vec<String> = forgotten.iter().map(|s| s.id.clone()).collect();
        self.state
            .lock()
            .snapshots
            .retain(|s| !removed_ids.contains(&s.meta.id));
        for id in &removed_ids {
            ctx.emit(&format!("removed snapshot {id}"));
        }
        Ok(forgotten)
    }

    async fn forget_snapshots(&self, _ctx: &DriverCtx, ids: &[String]) -> Result<(), DriverError> {
        self.record("forget_snapshots")?;
        self.state
            .lock()
            .snapshots
            .retain(|s| !ids.iter().any(|id| s.meta.id.starts_with(id.as_str())));
        Ok(())
    }

    async fn prune(
        &self,
        _ctx: &DriverCtx,
        _max_unused_percent: f64,
    ) -> Result<String, DriverError> {
        self.record("prune")?;
        Ok("repository cleaned".to_string())
    }

    async fn check(&self, _ctx: &DriverCtx, _read_data_percent: f64) -> Result<String, DriverError> {
        self.record("check")?;
        Ok("no errors were found".to_string())
    }

    async fn stats(
        &self,
        _ctx: &DriverCtx,
        _snapshot: Option<&str>,
    ) -> Result<RepoStats, DriverError> {
        self.record("stats")?;
        let state = self.state.lock();
        Ok(RepoStats {
            total_size: state
                .snapshots
                .iter()
                .flat_map(|s| s.files.values())
                .map(|b| b.len() as u64)
                .sum(),
            total_file_count: state.snapshots.iter().map(|s| s.files.len() as u64).sum(),
            snapshot_count: state.snapshots.len() as u64,
        })
    }

    async fn restore(
        &self,
        _ctx: &DriverCtx,
        snapshot_id: &str,
        path: Option<&str>,
        target: &str,
        on_progress: RestoreProgressFn<'_>,
    ) -> Result<(), DriverError> {
        self.record("restore")?;

        let snapshot = self
            .state
            .lock()
            .snapshots
            .iter()
            .find(|s| s.meta.id.starts_with(snapshot_id))
            .cloned()
            .ok_or_else(|| DriverError::CommandFailed {
                subcommand: "restore".to_string(),
                code: 1,
                tail: format!("no matching snapshot {snapshot_id}"),
            })?;

        let total_bytes: u64 = snapshot.files.values().map(|b| b.len() as u64).sum();
        let mut restored = 0u64;
        for (file_path, bytes) in &snapshot.files {
            if let Some(filter) = path {
                if !file_path.starts_with(filter) {
                    continue;
                }
            }
            let relative = file_path.trim_start_matches('/');
            let out = Path::new(target).join(relative);
            if let Some(parent) = out.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&out, bytes)?;
            restored += bytes.len() as u64;
            on_progress(RestoreProgress {
                percent_done: restored as f64 / total_bytes.max(1) as f64,
                bytes_restored: restored,
                total_bytes,
            });
        }
        Ok(())
    }

    async fn ls(
        &self,
        _ctx: &DriverCtx,
        snapshot_id: &str,
        path: &str,
    ) -> Result<Vec<LsEntry>, DriverError> {
        self.record("ls")?;
        let state = self.state.lock();
        let snapshot = state
            .snapshots
            .iter()
            .find(|s| s.meta.id.starts_with(snapshot_id))
            .ok_or_else(|| DriverError::CommandFailed {
                subcommand: "ls".to_string(),
                code: 1,
                tail: format!("no matching snapshot {snapshot_id}"),
            })?;
        Ok(snapshot
            .files
            .keys()
            .filter(|f| f.starts_with(path))
            .map(|f| LsEntry {
                name: f.rsplit('/').next().unwrap_or(f).to_string(),
                kind: "file".to_string(),
                path: f.clone(),
                size: snapshot.files[f.as_str()].len() as u64,
            })
            .collect())
    }

    async fn unlock(&self, _ctx: &DriverCtx) -> Result<(), DriverError> {
        self.record("unlock")
    }

    async fn run_command(&self, ctx: &DriverCtx, args: &[String]) -> Result<(), DriverError> {
        self.record("run_command")?;
        ctx.emit(&format!("ran: {}", args.join(" ")));
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
