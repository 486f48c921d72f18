// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The real driver: spawns the pinned backup binary.
//!
//! Launch discipline for every invocation: stdin detached, stdout and
//! stderr piped and folded into one transcript, environment scrubbed to
//! the allowlist plus repo credentials. On cancellation the child gets
//! SIGINT, then SIGKILL after the grace period.

use super::argv::{build_argv, build_env};
use super::progress::{
    parse_backup_line, parse_restore_line, BackupEvent, RawForgetGroup, RawSnapshot,
};
use super::{
    BackupProgressFn, BackupSpec, DriverCtx, DriverError, LsEntry, RepoDriver, RestoreProgressFn,
};
use crate::subprocess::{terminate_gracefully, GRACEFUL_KILL_TIMEOUT};
use async_trait::async_trait;
use backrest_config::RetentionPolicy;
use backrest_core::{BackupSummary, RepoStats, SnapshotMeta};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Bytes of combined output preserved for error messages.
const ERROR_TAIL_BYTES: usize = 500;

/// Driver backed by the external backup binary.
///
/// Stateless: everything per-invocation arrives in the [`DriverCtx`].
#[derive(Clone, Default)]
pub struct ResticDriver;

impl ResticDriver {
    pub fn new() -> Self {
        Self
    }

    /// Spawn one invocation, stream its output, return captured stdout.
    async fn run(
        &self,
        ctx: &DriverCtx,
        subcommand: &str,
        flags: &[String],
        args: &[String],
        mut on_stdout_line: impl FnMut(&str),
    ) -> Result<String, DriverError> {
        if ctx.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }

        let argv = build_argv(&ctx.repo, subcommand, flags, args);
        debug!(binary = %ctx.binary.display(), ?argv, "spawning backup tool");

        let mut cmd = Command::new(&ctx.binary);
        cmd.args(&argv)
            .env_clear()
            .envs(build_env(&ctx.repo))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| DriverError::Spawn {
            binary: ctx.binary.display().to_string(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Io(io::Error::other("child stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DriverError::Io(io::Error::other("child stderr not captured")))?;

        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_done = false;
        let mut err_done = false;
        let mut captured = String::new();
        let mut tail = Tail::new(ERROR_TAIL_BYTES);

        while !(out_done && err_done) {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    let _ = terminate_gracefully(&mut child, GRACEFUL_KILL_TIMEOUT).await;
                    return Err(DriverError::Cancelled);
                }
                line = out_lines.next_line(), if !out_done => match line? {
                    Some(line) => {
                        ctx.emit(&line);
                        tail.push(&line);
                        captured.push_str(&line);
                        captured.push('\n');
                        on_stdout_line(&line);
                    }
                    None => out_done = true,
                },
                line = err_lines.next_line(), if !err_done => match line? {
                    Some(line) => {
                        ctx.emit(&line);
                        tail.push(&line);
                    }
                    None => err_done = true,
                },
            }
        }

        let waited = {
            let wait = child.wait();
            tokio::pin!(wait);
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                status = &mut wait => Some(status),
            }
        };
        let status = match waited {
            None => {
                let _ = terminate_gracefully(&mut child, GRACEFUL_KILL_TIMEOUT).await;
                return Err(DriverError::Cancelled);
            }
            Some(status) => status?,
        };

        if !status.success() {
            return Err(DriverError::CommandFailed {
                subcommand: subcommand.to_string(),
                code: status.code().unwrap_or(-1),
                tail: tail.take(),
            });
        }
        Ok(captured)
    }

    fn parse<T: serde::de::DeserializeOwned>(
        subcommand: &str,
        output: &str,
    ) -> Result<T, DriverError> {
        serde_json::from_str(output.trim()).map_err(|e| DriverError::Parse {
            subcommand: subcommand.to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct RawStats {
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    total_file_count: u64,
    #[serde(default)]
    snapshots_count: u64,
}

#[async_trait]
impl RepoDriver for ResticDriver {
    async fn init(&self, ctx: &DriverCtx) -> Result<(), DriverError> {
        self.run(ctx, "init", &[], &[], |_| {}).await?;
        Ok(())
    }

    async fn backup(
        &self,
        ctx: &DriverCtx,
        spec: &BackupSpec,
        on_progress: BackupProgressFn<'_>,
    ) -> Result<BackupSummary, DriverError> {
        let mut flags = vec!["--json".to_string()];
        for tag in &spec.tags {
            flags.push("--tag".to_string());
            flags.push(tag.clone());
        }
        for exclude in &spec.excludes {
            flags.push("--exclude".to_string());
            flags.push(exclude.clone());
        }
        for ignore in &spec.ignores {
            flags.push("--iexclude".to_string());
            flags.push(ignore.clone());
        }

        let summary = Mutex::new(None);
        self.run(ctx, "backup", &flags, &spec.paths, |line| {
            if let Some(event) = parse_backup_line(line) {
                if let BackupEvent::Summary(s) = &event {
                    *summary.lock() = Some(s.clone());
                }
                on_progress(event);
            }
        })
        .await?;

        let summary = summary.into_inner();
        summary.ok_or_else(|| DriverError::Parse {
            subcommand: "backup".to_string(),
            message: "stream ended without a summary".to_string(),
        })
    }

    async fn snapshots(
        &self,
        ctx: &DriverCtx,
        tag: Option<&str>,
    ) -> Result<Vec<SnapshotMeta>, DriverError> {
        let mut flags = vec!["--json".to_string()];
        if let Some(tag) = tag {
            flags.push("--tag".to_string());
            flags.push(tag.to_string());
        }
        let output = self.run(ctx, "snapshots", &flags, &[], |_| {}).await?;
        if output.trim().is_empty() {
            return Ok(vec![]);
        }
        let raw: Vec<RawSnapshot> = Self::parse("snapshots", &output)?;
        Ok(raw.into_iter().map(RawSnapshot::into_meta).collect())
    }

    async fn forget(
        &self,
        ctx: &DriverCtx,
        policy: &RetentionPolicy,
        tag: Option<&str>,
    ) -> Result<Vec<SnapshotMeta>, DriverError> {
        // Keep-everything policies have nothing to forget
        let Some(policy_args) = policy.forget_args() else {
            return Ok(vec![]);
        };

        let mut flags = vec!["--json".to_string()];
        flags.extend(policy_args);
        if let Some(tag) = tag {
            flags.push("--tag".to_string());
            flags.push(tag.to_string());
            flags.push("--group-by".to_string());
            flags.push("tag".to_string());
        }
        let output = self.run(ctx, "forget", &flags, &[], |_| {}).await?;
        if output.trim().is_empty() {
            return Ok(vec![]);
        }
        let groups: Vec<RawForgetGroup> = Self::parse("forget", &output)?;
        Ok(groups
            .into_iter()
            .flat_map(|g| g.remove.unwrap_or_default())
            .map(RawSnapshot::into_meta)
            .collect())
    }

    async fn forget_snapshots(&self, ctx: &DriverCtx, ids: &[String]) -> Result<(), DriverError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.run(ctx, "forget", &[], ids, |_| {}).await?;
        Ok(())
    }

    async fn prune(&self, ctx: &DriverCtx, max_unused_percent: f64) -> Result<String, DriverError> {
        let mut flags = Vec::new();
        if max_unused_percent > 0.0 {
            flags.push("--max-unused".to_string());
            flags.push(format!("{max_unused_percent}%"));
        }
        self.run(ctx, "prune", &flags, &[], |_| {}).await
    }

    async fn check(&self, ctx: &DriverCtx, read_data_percent: f64) -> Result<String, DriverError> {
        let mut flags = Vec::new();
        if read_data_percent > 0.0 {
            flags.push("--read-data-subset".to_string());
            flags.push(format!("{read_data_percent}%"));
        }
        self.run(ctx, "check", &flags, &[], |_| {}).await
    }

    async fn stats(
        &self,
        ctx: &DriverCtx,
        snapshot: Option<&str>,
    ) -> Result<RepoStats, DriverError> {
        let args: Vec<String> = snapshot.map(|s| vec![s.to_string()]).unwrap_or_default();
        let output = self
            .run(ctx, "stats", &["--json".to_string()], &args, |_| {})
            .await?;
        let raw: RawStats = Self::parse("stats", &output)?;
        Ok(RepoStats {
            total_size: raw.total_size,
            total_file_count: raw.total_file_count,
            snapshot_count: raw.snapshots_count,
        })
    }

    async fn restore(
        &self,
        ctx: &DriverCtx,
        snapshot_id: &str,
        path: Option<&str>,
        target: &str,
        on_progress: RestoreProgressFn<'_>,
    ) -> Result<(), DriverError> {
        let source = match path {
            Some(path) => format!("{snapshot_id}:{path}"),
            None => snapshot_id.to_string(),
        };
        let flags = vec![
            "--json".to_string(),
            "--target".to_string(),
            target.to_string(),
        ];
        self.run(ctx, "restore", &flags, &[source], |line| {
            if let Some(progress) = parse_restore_line(line) {
                on_progress(progress);
            }
        })
        .await?;
        Ok(())
    }

    async fn ls(
        &self,
        ctx: &DriverCtx,
        snapshot_id: &str,
        path: &str,
    ) -> Result<Vec<LsEntry>, DriverError> {
        let args = vec![snapshot_id.to_string(), path.to_string()];
        let output = self
            .run(ctx, "ls", &["--json".to_string()], &args, |_| {})
            .await?;
        // Line-delimited: a snapshot header followed by one node per line
        Ok(output
            .lines()
            .filter_map(|line| serde_json::from_str::<LsEntry>(line).ok())
            .collect())
    }

    async fn unlock(&self, ctx: &DriverCtx) -> Result<(), DriverError> {
        self.run(ctx, "unlock", &[], &[], |_| {}).await?;
        Ok(())
    }

    async fn run_command(&self, ctx: &DriverCtx, args: &[String]) -> Result<(), DriverError> {
        let Some((subcommand, rest)) = args.split_first() else {
            return Err(DriverError::Parse {
                subcommand: String::new(),
                message: "empty command".to_string(),
            });
        };
        self.run(ctx, subcommand, &[], rest, |_| {}).await?;
        Ok(())
    }
}

/// Rolling buffer of the last N bytes of output.
struct Tail {
    buf: String,
    limit: usize,
}

impl Tail {
    fn new(limit: usize) -> Self {
        Self {
            buf: String::new(),
            limit,
        }
    }

    fn push(&mut self, line: &str) {
        if !self.buf.is_empty() {
            self.buf.push('\n');
        }
        self.buf.push_str(line);
        if self.buf.len() > self.limit {
            let mut cut = self.buf.len() - self.limit;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    fn take(self) -> String {
        self.buf
    }
}

#[cfg(test)]
#[path = "restic_tests.rs"]
mod tests;
