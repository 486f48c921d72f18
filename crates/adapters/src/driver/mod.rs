// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed driver over the external backup binary.
//!
//! The driver holds no state beyond what each call receives in its
//! [`DriverCtx`]; mutual exclusion per repository is the caller's
//! responsibility. Every invocation streams its combined output into the
//! transcript channel and surfaces the last 500 bytes on failure.

mod argv;
pub mod progress;
mod restic;

pub use argv::{build_argv, build_env, ENV_ALLOWLIST};
pub use progress::{parse_backup_line, parse_restore_line, BackupEvent};
pub use restic::ResticDriver;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDriver;

use async_trait::async_trait;
use backrest_config::{Repo, RetentionPolicy};
use backrest_core::{BackupSummary, RepoStats, RestoreProgress, SnapshotMeta};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors from driver invocations
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to launch {binary}: {source}")]
    Spawn { binary: String, source: io::Error },
    #[error("{subcommand} failed (exit {code}): {tail}")]
    CommandFailed {
        subcommand: String,
        code: i32,
        tail: String,
    },
    #[error("cancelled")]
    Cancelled,
    #[error("unparseable output from {subcommand}: {message}")]
    Parse { subcommand: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DriverError::Cancelled)
    }
}

/// Everything one driver invocation needs.
pub struct DriverCtx {
    /// Absolute path to the pinned backup binary.
    pub binary: PathBuf,
    /// Repo the invocation targets (uri, password, env, flags).
    pub repo: Repo,
    /// Combined stdout+stderr transcript lines, if anyone wants them.
    pub transcript: Option<mpsc::UnboundedSender<String>>,
    /// Cancellation propagated from the owning task.
    pub cancel: CancellationToken,
}

impl DriverCtx {
    pub fn new(binary: PathBuf, repo: Repo) -> Self {
        Self {
            binary,
            repo,
            transcript: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_transcript(mut self, tx: mpsc::UnboundedSender<String>) -> Self {
        self.transcript = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn emit(&self, line: &str) {
        if let Some(tx) = &self.transcript {
            let _ = tx.send(line.to_string());
        }
    }
}

/// What to back up in one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupSpec {
    pub paths: Vec<String>,
    pub excludes: Vec<String>,
    /// Case-insensitive excludes.
    pub ignores: Vec<String>,
    pub tags: Vec<String>,
}

/// One entry from a snapshot listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
}

/// Callback receiving parsed progress events during a backup.
pub type BackupProgressFn<'a> = &'a (dyn Fn(BackupEvent) + Send + Sync);

/// Callback receiving parsed progress events during a restore.
pub type RestoreProgressFn<'a> = &'a (dyn Fn(RestoreProgress) + Send + Sync);

/// The operations the orchestrator drives against a repository.
#[async_trait]
pub trait RepoDriver: Send + Sync + 'static {
    /// Initialize the repository if it does not exist yet.
    async fn init(&self, ctx: &DriverCtx) -> Result<(), DriverError>;

    /// Run a backup, streaming progress, returning the final summary.
    async fn backup(
        &self,
        ctx: &DriverCtx,
        spec: &BackupSpec,
        on_progress: BackupProgressFn<'_>,
    ) -> Result<BackupSummary, DriverError>;

    /// List snapshots, optionally filtered to one tag.
    async fn snapshots(
        &self,
        ctx: &DriverCtx,
        tag: Option<&str>,
    ) -> Result<Vec<SnapshotMeta>, DriverError>;

    /// Apply a retention policy; returns the snapshots it removed.
    async fn forget(
        &self,
        ctx: &DriverCtx,
        policy: &RetentionPolicy,
        tag: Option<&str>,
    ) -> Result<Vec<SnapshotMeta>, DriverError>;

    /// Forget specific snapshots by id.
    async fn forget_snapshots(&self, ctx: &DriverCtx, ids: &[String]) -> Result<(), DriverError>;

    /// Reclaim unreferenced pack data.
    async fn prune(&self, ctx: &DriverCtx, max_unused_percent: f64) -> Result<String, DriverError>;

    /// Verify repository integrity, optionally re-reading pack data.
    async fn check(&self, ctx: &DriverCtx, read_data_percent: f64) -> Result<String, DriverError>;

    /// Aggregate statistics, for one snapshot or the whole repo.
    async fn stats(
        &self,
        ctx: &DriverCtx,
        snapshot: Option<&str>,
    ) -> Result<RepoStats, DriverError>;

    /// Restore a snapshot subtree into `target`.
    async fn restore(
        &self,
        ctx: &DriverCtx,
        snapshot_id: &str,
        path: Option<&str>,
        target: &str,
        on_progress: RestoreProgressFn<'_>,
    ) -> Result<(), DriverError>;

    /// List the contents of a snapshot directory.
    async fn ls(
        &self,
        ctx: &DriverCtx,
        snapshot_id: &str,
        path: &str,
    ) -> Result<Vec<LsEntry>, DriverError>;

    /// Drop stale repository locks.
    async fn unlock(&self, ctx: &DriverCtx) -> Result<(), DriverError>;

    /// Run an arbitrary subcommand, output to the transcript only.
    async fn run_command(&self, ctx: &DriverCtx, args: &[String]) -> Result<(), DriverError>;
}
