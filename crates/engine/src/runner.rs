// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runner: one task execution from PENDING to terminal.
//!
//! For each execution: create the operation record, attach a log-store
//! transcript, run the lifecycle hooks, drive the repo driver, throttle
//! progress heartbeats, finalize. Errors are recorded on the operation —
//! they never escape to crash the scheduler loop. The runner talks back
//! to the scheduler only through the append-only enqueue channel.

use crate::hooks::{HookEvent, HookOutcome, HookPipeline};
use crate::task::{Task, TaskKind};
use backrest_adapters::{BackupEvent, BackupSpec, DriverCtx, DriverError, RepoDriver};
use backrest_config::{Hook, HookCondition, Plan, Repo};
use backrest_core::{
    Clock, InstanceId, OpPayload, OpSelector, OpStatus, Operation, PlanId, SnapshotMeta,
};
use backrest_storage::{LogStore, LogWriter, OpLog, Transformed};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum wall time between progress-heartbeat updates of an operation.
const PROGRESS_THROTTLE: Duration = Duration::from_millis(250);

/// Display messages are clamped to keep the log lean; transcripts carry
/// the full output.
const DISPLAY_MESSAGE_MAX: usize = 4096;

/// Terminal operations older than this are garbage collected.
const GC_OP_RETENTION_DAYS: i64 = 90;

/// Unreferenced task logs younger than this survive the sweep.
const GC_LOG_GRACE_MS: i64 = 24 * 3_600 * 1_000;

/// What the scheduler should do after an execution.
#[derive(Debug)]
pub enum RunOutcome {
    /// Execution finished (successfully or not); reschedule per schedule.
    Done,
    /// A retrying hook policy asked for a delayed re-run of this task.
    Retry { delay: Duration, task: Task },
}

/// A task the runner wants enqueued (follow-ups within a flow).
pub struct EnqueueRequest {
    pub task: Task,
    pub run_at_ms: i64,
}

/// Per-instance execution engine for tasks.
pub struct Runner<C: Clock> {
    oplog: Arc<OpLog>,
    logstore: Arc<LogStore>,
    driver: Arc<dyn RepoDriver>,
    hooks: HookPipeline<C>,
    clock: C,
    instance: InstanceId,
    binary: PathBuf,
    enqueue_tx: mpsc::UnboundedSender<EnqueueRequest>,
}

impl<C: Clock> Runner<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oplog: Arc<OpLog>,
        logstore: Arc<LogStore>,
        driver: Arc<dyn RepoDriver>,
        hooks: HookPipeline<C>,
        clock: C,
        instance: InstanceId,
        binary: PathBuf,
        enqueue_tx: mpsc::UnboundedSender<EnqueueRequest>,
    ) -> Self {
        Self {
            oplog,
            logstore,
            driver,
            hooks,
            clock,
            instance,
            binary,
            enqueue_tx,
        }
    }

    /// Execute one task to completion.
    ///
    /// `op_slot` receives the id of the operation this execution owns, as
    /// soon as it exists, so the orchestrator can target cancellation and
    /// panic recovery.
    pub async fn execute(
        &self,
        task: Task,
        cancel: CancellationToken,
        op_slot: Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        info!(task = %task.name(), "task starting");
        let outcome = match task.kind.clone() {
            TaskKind::Backup { plan, repo } => {
                self.run_backup(&task, plan, repo, &cancel, &op_slot).await
            }
            TaskKind::Forget { plan, repo } => {
                self.run_forget(&task, plan, repo, &cancel, &op_slot).await
            }
            TaskKind::ForgetSnapshot { repo, snapshot_id } => {
                self.run_forget_snapshot(&task, repo, snapshot_id, &cancel, &op_slot)
                    .await
            }
            TaskKind::Prune { repo } => self.run_prune(&task, repo, &cancel, &op_slot).await,
            TaskKind::Check { repo } => self.run_check(&task, repo, &cancel, &op_slot).await,
            TaskKind::IndexSnapshots { repo } => self.run_index(&task, repo, &cancel).await,
            TaskKind::Stats { repo } => self.run_stats(&task, repo, &cancel, &op_slot).await,
            TaskKind::Restore {
                repo,
                plan_id,
                snapshot_id,
                path,
                target,
            } => {
                self.run_restore(&task, repo, plan_id, snapshot_id, path, target, &cancel, &op_slot)
                    .await
            }
            TaskKind::RunCommand { repo, command } => {
                self.run_command(&task, repo, command, &cancel, &op_slot).await
            }
            TaskKind::CollectGarbage => self.run_gc().await,
        };
        info!(task = %task.name(), "task finished");
        outcome
    }

    // === backup ===

    async fn run_backup(
        &self,
        task: &Task,
        plan: Plan,
        repo: Repo,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Backup {
            paths: plan.paths.clone(),
            excludes: plan.excludes.clone(),
            progress: None,
            summary: None,
        };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, plan.id.clone(), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        let hooks = combined_hooks(&repo, Some(&plan));

        // START hooks run while the operation is still pending
        let start = self
            .hooks
            .fire(
                &hooks,
                &HookEvent {
                    conditions: &[HookCondition::SnapshotStart],
                    op: &op,
                    repo: &repo,
                    error: None,
                },
                cancel,
            )
            .await;
        match start {
            HookOutcome::Continue => {}
            HookOutcome::Cancel => {
                self.finalize(&mut op, OpStatus::UserCancelled, "cancelled by hook".into());
                self.close_writer(writer);
                return RunOutcome::Done;
            }
            HookOutcome::Fail => {
                self.finalize(&mut op, OpStatus::Error, "fatal hook failure".into());
                self.close_writer(writer);
                return RunOutcome::Done;
            }
            HookOutcome::Retry(delay) => {
                // Operation stays pending; the task re-runs against it
                self.close_writer(writer);
                let mut task = task.clone();
                task.pending_op = Some(op.id);
                return RunOutcome::Retry { delay, task };
            }
        }

        if cancel.is_cancelled() {
            self.fire_and_forget(&hooks, &[HookCondition::SnapshotSkipped], &op, &repo, None)
                .await;
            self.finalize(&mut op, OpStatus::UserCancelled, "cancelled before start".into());
            self.close_writer(writer);
            return RunOutcome::Done;
        }

        op.status = OpStatus::InProgress;
        op = self.checked_update(op);
        self.maybe_unlock(&repo, cancel).await;

        let spec = BackupSpec {
            paths: plan.paths.clone(),
            excludes: plan.excludes.clone(),
            ignores: plan.ignores.clone(),
            tags: vec![
                format!("plan:{}", plan.id),
                format!("created-by:{}", self.instance),
            ],
        };

        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let op_cell = Mutex::new(op);
        let throttle = Throttle::new(&self.clock);
        let result = self
            .driver
            .backup(&ctx, &spec, &|event| match event {
                BackupEvent::Status(progress) => {
                    if throttle.ready() {
                        let mut op = op_cell.lock();
                        if let OpPayload::Backup { progress: p, .. } = &mut op.payload {
                            *p = Some(progress);
                        }
                        *op = self.checked_update(op.clone());
                    }
                }
                BackupEvent::Summary(summary) => {
                    let mut op = op_cell.lock();
                    op.snapshot_id = summary.snapshot_id.clone();
                    if let OpPayload::Backup { summary: s, .. } = &mut op.payload {
                        *s = Some(summary);
                    }
                    *op = self.checked_update(op.clone());
                }
            })
            .await;
        drop(ctx);
        self.wait_pump(pump).await;
        let mut op = op_cell.into_inner();

        match result {
            Ok(summary) => {
                op.snapshot_id = summary.snapshot_id.clone();
                if let OpPayload::Backup { summary: s, .. } = &mut op.payload {
                    *s = Some(summary.clone());
                }
                let message = format!(
                    "backup complete: {} files processed, snapshot {}",
                    summary.total_files_processed,
                    summary.snapshot_id.as_str()
                );
                self.finalize(&mut op, OpStatus::Success, message);

                let post = self
                    .hooks
                    .fire(
                        &hooks,
                        &HookEvent {
                            conditions: &[HookCondition::SnapshotSuccess],
                            op: &op,
                            repo: &repo,
                            error: None,
                        },
                        cancel,
                    )
                    .await;

                self.index_backup_snapshot(&op, &plan, &summary.snapshot_id);

                // Post-completion hook failures can't unwind a finished
                // backup, but cancel/fatal policies suppress the follow-up
                if matches!(post, HookOutcome::Continue) {
                    let forget = Task::forget(plan.clone(), repo.clone(), op.flow_id);
                    self.enqueue_now(forget);
                }
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "backup cancelled".into());
            }
            Err(e) => {
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message.clone());
                self.fire_and_forget(
                    &hooks,
                    &[HookCondition::SnapshotError, HookCondition::AnyError],
                    &op,
                    &repo,
                    Some(&message),
                )
                .await;
            }
        }

        self.fire_and_forget(&hooks, &[HookCondition::SnapshotEnd], &op, &repo, None)
            .await;
        RunOutcome::Done
    }

    /// Record the snapshot a successful backup produced in the same flow.
    fn index_backup_snapshot(&self, backup_op: &Operation, plan: &Plan, snapshot_id: &str) {
        let now = self.clock.epoch_ms();
        let meta = SnapshotMeta {
            id: snapshot_id.to_string(),
            unix_time_ms: now,
            tags: vec![
                format!("plan:{}", plan.id),
                format!("created-by:{}", self.instance),
            ],
            paths: plan.paths.clone(),
        };
        let mut op = self.new_operation(
            &backup_op.repo_id,
            backup_op.repo_guid.clone(),
            plan.id.clone(),
            backup_op.flow_id,
            OpPayload::IndexSnapshot {
                snapshot: meta,
                forgot: false,
            },
        );
        op.snapshot_id = snapshot_id.to_string();
        op.status = OpStatus::Success;
        op.unix_time_end_ms = now;
        if let Err(e) = self.oplog.add(op) {
            warn!(error = %e, "failed to index backup snapshot");
        }
    }

    // === forget ===

    async fn run_forget(
        &self,
        task: &Task,
        plan: Plan,
        repo: Repo,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Forget { removed: vec![] };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, plan.id.clone(), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        op.status = OpStatus::InProgress;
        op = self.checked_update(op);

        self.maybe_unlock(&repo, cancel).await;
        let tag = format!("plan:{}", plan.id);
        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let result = self.driver.forget(&ctx, &plan.retention, Some(&tag)).await;
        drop(ctx);
        self.wait_pump(pump).await;

        match result {
            Ok(removed) => {
                self.mark_forgotten(&repo, &removed);
                let message = format!("forget complete: removed {} snapshots", removed.len());
                if let OpPayload::Forget { removed: r } = &mut op.payload {
                    *r = removed;
                }
                self.finalize(&mut op, OpStatus::Success, message);
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "forget cancelled".into());
            }
            Err(e) => {
                let hooks = combined_hooks(&repo, Some(&plan));
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message.clone());
                self.fire_and_forget(
                    &hooks,
                    &[HookCondition::AnyError],
                    &op,
                    &repo,
                    Some(&message),
                )
                .await;
            }
        }
        RunOutcome::Done
    }

    /// Orphaned-index cleanup: flag indexed snapshots the forget removed.
    fn mark_forgotten(&self, repo: &Repo, removed: &[SnapshotMeta]) {
        for meta in removed {
            let selector = OpSelector::all()
                .with_repo_guid(repo.guid.clone())
                .with_snapshot_id(meta.id.clone());
            let result = self.oplog.transform(&selector, |op| {
                if let OpPayload::IndexSnapshot { snapshot, forgot } = &op.payload {
                    if !forgot {
                        let mut updated = op.clone();
                        updated.payload = OpPayload::IndexSnapshot {
                            snapshot: snapshot.clone(),
                            forgot: true,
                        };
                        return Transformed::Update(updated);
                    }
                }
                Transformed::Keep
            });
            if let Err(e) = result {
                warn!(error = %e, snapshot = %meta.id, "failed to flag forgotten snapshot");
            }
        }
    }

    /// Remove a single snapshot by id, outside any retention policy.
    async fn run_forget_snapshot(
        &self,
        task: &Task,
        repo: Repo,
        snapshot_id: String,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Forget { removed: vec![] };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, PlanId::new(""), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        op.snapshot_id = snapshot_id.clone();
        op.status = OpStatus::InProgress;
        op = self.checked_update(op);

        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let result = self
            .driver
            .forget_snapshots(&ctx, std::slice::from_ref(&snapshot_id))
            .await;
        drop(ctx);
        self.wait_pump(pump).await;

        match result {
            Ok(()) => {
                let meta = SnapshotMeta {
                    id: snapshot_id.clone(),
                    unix_time_ms: self.clock.epoch_ms(),
                    tags: vec![],
                    paths: vec![],
                };
                self.mark_forgotten(&repo, std::slice::from_ref(&meta));
                if let OpPayload::Forget { removed } = &mut op.payload {
                    removed.push(meta);
                }
                let message = format!("forgot snapshot {snapshot_id}");
                self.finalize(&mut op, OpStatus::Success, message);
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "forget cancelled".into());
            }
            Err(e) => {
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message);
            }
        }
        RunOutcome::Done
    }

    // === prune / check / stats ===

    async fn run_prune(
        &self,
        task: &Task,
        repo: Repo,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Prune {
            output: String::new(),
        };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, PlanId::new(""), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        let hooks = combined_hooks(&repo, None);

        let start = self
            .hooks
            .fire(
                &hooks,
                &HookEvent {
                    conditions: &[HookCondition::PruneStart],
                    op: &op,
                    repo: &repo,
                    error: None,
                },
                cancel,
            )
            .await;
        match start {
            HookOutcome::Continue => {}
            HookOutcome::Cancel => {
                self.finalize(&mut op, OpStatus::UserCancelled, "cancelled by hook".into());
                self.close_writer(writer);
                return RunOutcome::Done;
            }
            HookOutcome::Fail => {
                self.finalize(&mut op, OpStatus::Error, "fatal hook failure".into());
                self.close_writer(writer);
                return RunOutcome::Done;
            }
            HookOutcome::Retry(delay) => {
                self.close_writer(writer);
                let mut task = task.clone();
                task.pending_op = Some(op.id);
                return RunOutcome::Retry { delay, task };
            }
        }

        op.status = OpStatus::InProgress;
        op = self.checked_update(op);
        self.maybe_unlock(&repo, cancel).await;

        let max_unused = repo
            .prune_policy
            .as_ref()
            .map(|p| p.max_unused_percent)
            .unwrap_or(0.0);
        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let result = self.driver.prune(&ctx, max_unused).await;
        drop(ctx);
        self.wait_pump(pump).await;

        match result {
            Ok(output) => {
                if let OpPayload::Prune { output: o } = &mut op.payload {
                    *o = clamp(&output, DISPLAY_MESSAGE_MAX);
                }
                self.finalize(&mut op, OpStatus::Success, "prune complete".into());
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "prune cancelled".into());
            }
            Err(e) => {
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message.clone());
                self.fire_and_forget(
                    &hooks,
                    &[HookCondition::AnyError],
                    &op,
                    &repo,
                    Some(&message),
                )
                .await;
            }
        }
        self.fire_and_forget(&hooks, &[HookCondition::PruneEnd], &op, &repo, None)
            .await;
        RunOutcome::Done
    }

    async fn run_check(
        &self,
        task: &Task,
        repo: Repo,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Check {
            output: String::new(),
        };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, PlanId::new(""), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        let hooks = combined_hooks(&repo, None);

        let start = self
            .hooks
            .fire(
                &hooks,
                &HookEvent {
                    conditions: &[HookCondition::CheckStart],
                    op: &op,
                    repo: &repo,
                    error: None,
                },
                cancel,
            )
            .await;
        match start {
            HookOutcome::Continue => {}
            HookOutcome::Cancel => {
                self.finalize(&mut op, OpStatus::UserCancelled, "cancelled by hook".into());
                self.close_writer(writer);
                return RunOutcome::Done;
            }
            HookOutcome::Fail => {
                self.finalize(&mut op, OpStatus::Error, "fatal hook failure".into());
                self.close_writer(writer);
                return RunOutcome::Done;
            }
            HookOutcome::Retry(delay) => {
                self.close_writer(writer);
                let mut task = task.clone();
                task.pending_op = Some(op.id);
                return RunOutcome::Retry { delay, task };
            }
        }

        op.status = OpStatus::InProgress;
        op = self.checked_update(op);
        self.maybe_unlock(&repo, cancel).await;

        let read_data = repo
            .check_policy
            .as_ref()
            .map(|p| p.read_data_percent)
            .unwrap_or(0.0);
        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let result = self.driver.check(&ctx, read_data).await;
        drop(ctx);
        self.wait_pump(pump).await;

        match result {
            Ok(output) => {
                if let OpPayload::Check { output: o } = &mut op.payload {
                    *o = clamp(&output, DISPLAY_MESSAGE_MAX);
                }
                self.finalize(&mut op, OpStatus::Success, "check passed".into());
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "check cancelled".into());
            }
            Err(e) => {
                // Integrity failure: surface as a warning-class event, do
                // not quarantine the repo
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message.clone());
                self.fire_and_forget(
                    &hooks,
                    &[HookCondition::SnapshotWarning, HookCondition::AnyError],
                    &op,
                    &repo,
                    Some(&message),
                )
                .await;
            }
        }
        self.fire_and_forget(&hooks, &[HookCondition::CheckEnd], &op, &repo, None)
            .await;
        RunOutcome::Done
    }

    async fn run_stats(
        &self,
        task: &Task,
        repo: Repo,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Stats { stats: None };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, PlanId::new(""), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        op.status = OpStatus::InProgress;
        op = self.checked_update(op);

        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let result = self.driver.stats(&ctx, None).await;
        drop(ctx);
        self.wait_pump(pump).await;

        match result {
            Ok(stats) => {
                if let OpPayload::Stats { stats: s } = &mut op.payload {
                    *s = Some(stats);
                }
                self.finalize(&mut op, OpStatus::Success, "stats collected".into());
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "stats cancelled".into());
            }
            Err(e) => {
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message);
            }
        }
        RunOutcome::Done
    }

    // === restore / run-command ===

    #[allow(clippy::too_many_arguments)]
    async fn run_restore(
        &self,
        task: &Task,
        repo: Repo,
        plan_id: PlanId,
        snapshot_id: String,
        path: Option<String>,
        target: String,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::Restore {
            snapshot_id: snapshot_id.clone(),
            path: path.clone().unwrap_or_default(),
            target: target.clone(),
            progress: None,
        };
        let Some((mut op, writer)) = self.open_operation(task, &repo, plan_id, payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        op.snapshot_id = snapshot_id.clone();
        op.status = OpStatus::InProgress;
        op = self.checked_update(op);

        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let op_cell = Mutex::new(op);
        let throttle = Throttle::new(&self.clock);
        let result = self
            .driver
            .restore(&ctx, &snapshot_id, path.as_deref(), &target, &|progress| {
                if throttle.ready() {
                    let mut op = op_cell.lock();
                    if let OpPayload::Restore { progress: p, .. } = &mut op.payload {
                        *p = Some(progress);
                    }
                    *op = self.checked_update(op.clone());
                }
            })
            .await;
        drop(ctx);
        self.wait_pump(pump).await;
        let mut op = op_cell.into_inner();

        match result {
            Ok(()) => {
                let message = format!("restored {snapshot_id} to {target}");
                self.finalize(&mut op, OpStatus::Success, message);
            }
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "restore cancelled".into());
            }
            Err(e) => {
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message);
            }
        }
        RunOutcome::Done
    }

    async fn run_command(
        &self,
        task: &Task,
        repo: Repo,
        command: Vec<String>,
        cancel: &CancellationToken,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> RunOutcome {
        let payload = OpPayload::RunCommand {
            command: command.join(" "),
        };
        let Some((mut op, writer)) =
            self.open_operation(task, &repo, PlanId::new(""), payload, op_slot)
        else {
            return RunOutcome::Done;
        };
        op.status = OpStatus::InProgress;
        op = self.checked_update(op);

        let (ctx, pump) = self.driver_ctx(&repo, cancel, writer);
        let result = self.driver.run_command(&ctx, &command).await;
        drop(ctx);
        self.wait_pump(pump).await;

        match result {
            Ok(()) => self.finalize(&mut op, OpStatus::Success, "command complete".into()),
            Err(DriverError::Cancelled) => {
                self.finalize(&mut op, OpStatus::UserCancelled, "command cancelled".into());
            }
            Err(e) => {
                let message = clamp(&e.to_string(), DISPLAY_MESSAGE_MAX);
                self.finalize(&mut op, OpStatus::Error, message);
            }
        }
        RunOutcome::Done
    }

    // === index reconciliation ===

    /// Reconcile the repo's real snapshot list with indexed operations:
    /// add index ops for unknown snapshots, flag indexed-but-gone ones as
    /// forgotten. Creates no wrapper operation of its own.
    async fn run_index(&self, task: &Task, repo: Repo, cancel: &CancellationToken) -> RunOutcome {
        let ctx = DriverCtx::new(self.binary.clone(), repo.clone())
            .with_cancel(cancel.child_token());
        let real = match self.driver.snapshots(&ctx, None).await {
            Ok(real) => real,
            Err(e) => {
                warn!(task = %task.name(), error = %e, "snapshot listing failed");
                return RunOutcome::Done;
            }
        };

        let indexed = self
            .oplog
            .list(&OpSelector::all().with_repo_guid(repo.guid.clone()));
        let indexed_ids: HashSet<&str> = indexed
            .iter()
            .filter(|op| matches!(op.payload, OpPayload::IndexSnapshot { .. }))
            .map(|op| op.snapshot_id.as_str())
            .collect();

        let now = self.clock.epoch_ms();
        for snapshot in &real {
            if indexed_ids.contains(snapshot.id.as_str()) {
                continue;
            }
            let plan_id = plan_from_tags(&snapshot.tags);
            let mut op = self.new_operation(
                &repo.id,
                repo.guid.clone(),
                plan_id,
                task.flow_id,
                OpPayload::IndexSnapshot {
                    snapshot: snapshot.clone(),
                    forgot: false,
                },
            );
            op.snapshot_id = snapshot.id.clone();
            op.status = OpStatus::Success;
            op.unix_time_start_ms = snapshot.unix_time_ms.max(0);
            op.unix_time_end_ms = now;
            if let Err(e) = self.oplog.add(op) {
                warn!(error = %e, "failed to index discovered snapshot");
            }
        }

        let real_ids: HashSet<&str> = real.iter().map(|s| s.id.as_str()).collect();
        let gone: Vec<SnapshotMeta> = indexed
            .iter()
            .filter_map(|op| match &op.payload {
                OpPayload::IndexSnapshot { snapshot, forgot }
                    if !forgot && !real_ids.contains(snapshot.id.as_str()) =>
                {
                    Some(snapshot.clone())
                }
                _ => None,
            })
            .collect();
        self.mark_forgotten(&repo, &gone);

        debug!(
            repo = %repo.id,
            real = real.len(),
            forgotten = gone.len(),
            "index reconciliation complete"
        );
        RunOutcome::Done
    }

    // === garbage collection ===

    async fn run_gc(&self) -> RunOutcome {
        let now = self.clock.epoch_ms();
        let horizon = now - GC_OP_RETENTION_DAYS * 86_400_000;
        let selector = OpSelector::all()
            .with_statuses(vec![
                OpStatus::Success,
                OpStatus::Error,
                OpStatus::Warning,
                OpStatus::UserCancelled,
                OpStatus::SystemCancelled,
            ])
            .started_before(horizon);
        let doomed = self.oplog.list(&selector);
        match self.oplog.delete(&selector) {
            Ok(removed) if removed > 0 => {
                info!(removed, "garbage collected operations past retention");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "operation garbage collection failed"),
        }
        // Transcripts of collected operations go with them
        for op in &doomed {
            if let Some(logref) = &op.logref {
                if let Err(e) = self.logstore.delete(logref) {
                    warn!(error = %e, logref, "failed to delete transcript");
                }
            }
        }

        let mut referenced: HashSet<String> = HashSet::new();
        self.oplog.query(&OpSelector::all(), |op| {
            if let Some(logref) = &op.logref {
                referenced.insert(logref.clone());
            }
            true
        });
        if let Err(e) = self
            .logstore
            .sweep(now, GC_LOG_GRACE_MS, |refid| referenced.contains(refid))
        {
            warn!(error = %e, "task log sweep failed");
        }
        RunOutcome::Done
    }

    // === shared scaffolding ===

    /// Create (or resume) the operation for a task and open its transcript.
    ///
    /// Returns `None` if the log rejected the record; the failure is
    /// already logged and the task must give up.
    fn open_operation(
        &self,
        task: &Task,
        repo: &Repo,
        plan_id: PlanId,
        payload: OpPayload,
        op_slot: &Arc<Mutex<Option<i64>>>,
    ) -> Option<(Operation, Option<LogWriter>)> {
        let mut op = match task.pending_op.and_then(|id| self.oplog.get(id).ok()) {
            Some(existing) => existing,
            None => {
                let op = self.new_operation(&repo.id, repo.guid.clone(), plan_id, task.flow_id, payload);
                match self.oplog.add(op) {
                    Ok(op) => op,
                    Err(e) => {
                        warn!(task = %task.name(), error = %e, "failed to record operation");
                        return None;
                    }
                }
            }
        };
        *op_slot.lock() = Some(op.id);

        match self.logstore.create() {
            Ok((writer, refid)) => {
                op.logref = Some(refid);
                op = self.checked_update(op);
                Some((op, Some(writer)))
            }
            Err(e) => {
                warn!(task = %task.name(), error = %e, "failed to open task log");
                Some((op, None))
            }
        }
    }

    fn new_operation(
        &self,
        repo_id: &backrest_core::RepoId,
        repo_guid: backrest_core::RepoGuid,
        plan_id: PlanId,
        flow_id: i64,
        payload: OpPayload,
    ) -> Operation {
        Operation {
            id: 0,
            modno: 0,
            instance_id: self.instance.clone(),
            original_instance_keyid: String::new(),
            original_id: 0,
            original_flow_id: 0,
            repo_id: repo_id.clone(),
            repo_guid,
            plan_id,
            flow_id,
            snapshot_id: String::new(),
            unix_time_start_ms: self.clock.epoch_ms(),
            unix_time_end_ms: 0,
            status: OpStatus::Pending,
            display_message: String::new(),
            logref: None,
            payload,
        }
    }

    /// Drop stale repository locks ahead of a mutating call, when the
    /// repo is configured for it. Best effort: failure is the next
    /// invocation's problem to report.
    async fn maybe_unlock(&self, repo: &Repo, cancel: &CancellationToken) {
        if !repo.auto_unlock {
            return;
        }
        let ctx = DriverCtx::new(self.binary.clone(), repo.clone())
            .with_cancel(cancel.child_token());
        if let Err(e) = self.driver.unlock(&ctx).await {
            warn!(repo = %repo.id, error = %e, "auto-unlock failed");
        }
    }

    /// Build a driver context wired to the transcript pump.
    fn driver_ctx(
        &self,
        repo: &Repo,
        cancel: &CancellationToken,
        writer: Option<LogWriter>,
    ) -> (DriverCtx, Option<tokio::task::JoinHandle<LogWriter>>) {
        let mut ctx = DriverCtx::new(self.binary.clone(), repo.clone())
            .with_cancel(cancel.child_token());
        let mut pump = None;
        if let Some(mut writer) = writer {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            ctx = ctx.with_transcript(tx);
            pump = Some(tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    let _ = writer.append_line(&line);
                }
                writer
            }));
        }
        (ctx, pump)
    }

    /// Await the transcript pump and close the writer.
    async fn wait_pump(&self, pump: Option<tokio::task::JoinHandle<LogWriter>>) {
        if let Some(pump) = pump {
            match pump.await {
                Ok(writer) => {
                    if let Err(e) = writer.close() {
                        warn!(error = %e, "failed to close task log");
                    }
                }
                Err(e) => warn!(error = %e, "transcript pump failed"),
            }
        }
    }

    fn close_writer(&self, writer: Option<LogWriter>) {
        if let Some(writer) = writer {
            if let Err(e) = writer.close() {
                warn!(error = %e, "failed to close task log");
            }
        }
    }

    /// Update an operation, logging instead of propagating failures.
    fn checked_update(&self, op: Operation) -> Operation {
        match self.oplog.update(op.clone()) {
            Ok(updated) => updated,
            Err(e) => {
                warn!(op = op.id, error = %e, "operation update failed");
                op
            }
        }
    }

    fn finalize(&self, op: &mut Operation, status: OpStatus, message: String) {
        op.status = status;
        op.unix_time_end_ms = self.clock.epoch_ms().max(op.unix_time_start_ms);
        op.display_message = message;
        *op = self.checked_update(op.clone());
    }

    /// Fire hooks whose outcome cannot change anything anymore.
    async fn fire_and_forget(
        &self,
        hooks: &[Hook],
        conditions: &[HookCondition],
        op: &Operation,
        repo: &Repo,
        error: Option<&str>,
    ) {
        let cancel = CancellationToken::new();
        let _ = self
            .hooks
            .fire(
                hooks,
                &HookEvent {
                    conditions,
                    op,
                    repo,
                    error,
                },
                &cancel,
            )
            .await;
    }

    fn enqueue_now(&self, task: Task) {
        let request = EnqueueRequest {
            task,
            run_at_ms: self.clock.epoch_ms(),
        };
        if self.enqueue_tx.send(request).is_err() {
            warn!("enqueue channel closed; follow-up task dropped");
        }
    }
}

/// Repo-level hooks run before plan-level hooks; declared order within.
fn combined_hooks(repo: &Repo, plan: Option<&Plan>) -> Vec<Hook> {
    let mut hooks = repo.hooks.clone();
    if let Some(plan) = plan {
        hooks.extend(plan.hooks.iter().cloned());
    }
    hooks
}

/// Plan attribution from snapshot tags (`plan:<id>`).
fn plan_from_tags(tags: &[String]) -> PlanId {
    tags.iter()
        .find_map(|t| t.strip_prefix("plan:"))
        .map(PlanId::new)
        .unwrap_or_else(|| PlanId::new(""))
}

fn clamp(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}

/// Wall-clock throttle for progress heartbeats.
struct Throttle<'a, C: Clock> {
    clock: &'a C,
    last: Mutex<Option<Instant>>,
}

impl<'a, C: Clock> Throttle<'a, C> {
    fn new(clock: &'a C) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    fn ready(&self) -> bool {
        let now = self.clock.now();
        let mut last = self.last.lock();
        if last.is_none_or(|t| now.duration_since(t) >= PROGRESS_THROTTLE) {
            *last = Some(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
