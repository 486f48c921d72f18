// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: scheduler loop, command surface, lifecycle.
//!
//! One loop owns the task queue: peek the heap, sleep until the earliest
//! deadline or a wake, pop due tasks, try the repo lock (contended tasks
//! go back with a backoff), spawn the runner. Executions run concurrently
//! across repos and strictly serialized within one. The runner reaches
//! the scheduler only through the append-only enqueue channel, and every
//! execution is guarded: panics become operation failures, never a dead
//! loop.

use crate::error::EngineError;
use crate::hooks::HookPipeline;
use crate::runner::{EnqueueRequest, RunOutcome, Runner};
use crate::scheduler::{desired_tasks, still_desired, RepoLocks, TaskQueue};
use crate::task::{Task, TaskKind};
use backrest_adapters::{Notifier, RepoDriver};
use backrest_config::Config;
use backrest_core::{
    Clock, InstanceId, OpSelector, OpStatus, Operation, PlanId, RepoId, RetryPolicy,
};
use backrest_storage::{LogStore, OpLog, Transformed};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Grace period between a cancel request and force-marking the operation.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Default shutdown drain before in-flight tasks are abandoned.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Idle sleep when the queue is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

/// Per-plan rollup for the summary dashboard.
#[derive(Debug, Clone)]
pub struct PlanSummary {
    pub plan_id: PlanId,
    pub last_status: Option<OpStatus>,
    pub last_time_ms: Option<i64>,
}

/// Aggregates consumed by the UI's summary view.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub plans: Vec<PlanSummary>,
    pub bytes_added_30d: u64,
}

/// Repo-scoped maintenance a caller can request directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoTask {
    Prune,
    Check,
    Stats,
    IndexSnapshots,
}

/// Everything an orchestrator needs injected.
pub struct OrchestratorDeps<C: Clock> {
    pub oplog: Arc<OpLog>,
    pub logstore: Arc<LogStore>,
    pub driver: Arc<dyn RepoDriver>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: C,
    pub binary: PathBuf,
    pub config_rx: watch::Receiver<Arc<Config>>,
}

struct RunningTask {
    exec_id: u64,
    task_id: String,
    recurring: bool,
    op_slot: Arc<Mutex<Option<i64>>>,
    cancel: CancellationToken,
}

/// The long-running supervisor core.
pub struct Orchestrator<C: Clock> {
    oplog: Arc<OpLog>,
    logstore: Arc<LogStore>,
    driver: Arc<dyn RepoDriver>,
    binary: PathBuf,
    runner: Runner<C>,
    clock: C,
    config_rx: watch::Receiver<Arc<Config>>,
    queue: Mutex<TaskQueue>,
    locks: RepoLocks,
    wake: Notify,
    running: Mutex<Vec<RunningTask>>,
    root_cancel: CancellationToken,
    enqueue_rx: Mutex<Option<mpsc::UnboundedReceiver<EnqueueRequest>>>,
    next_exec_id: AtomicU64,
    instance: InstanceId,
}

impl<C: Clock> Orchestrator<C> {
    pub fn new(deps: OrchestratorDeps<C>) -> Arc<Self> {
        let instance = deps.config_rx.borrow().instance.clone();
        let (enqueue_tx, enqueue_rx) = mpsc::unbounded_channel();
        let hooks = HookPipeline::new(
            Arc::clone(&deps.oplog),
            Arc::clone(&deps.logstore),
            Arc::clone(&deps.notifier),
            deps.clock.clone(),
        );
        let runner = Runner::new(
            Arc::clone(&deps.oplog),
            Arc::clone(&deps.logstore),
            Arc::clone(&deps.driver),
            hooks,
            deps.clock.clone(),
            instance.clone(),
            deps.binary.clone(),
            enqueue_tx,
        );
        Arc::new(Self {
            oplog: deps.oplog,
            logstore: deps.logstore,
            driver: deps.driver,
            binary: deps.binary,
            runner,
            clock: deps.clock,
            config_rx: deps.config_rx,
            queue: Mutex::new(TaskQueue::new()),
            locks: RepoLocks::new(),
            wake: Notify::new(),
            running: Mutex::new(Vec::new()),
            root_cancel: CancellationToken::new(),
            enqueue_rx: Mutex::new(Some(enqueue_rx)),
            next_exec_id: AtomicU64::new(1),
            instance,
        })
    }

    /// The scheduler loop. Runs until [`Self::shutdown`] is called.
    pub async fn run(self: Arc<Self>) {
        let Some(mut enqueue_rx) = self.enqueue_rx.lock().take() else {
            warn!("orchestrator loop started twice");
            return;
        };
        let mut config_rx = self.config_rx.clone();
        let mut config_alive = true;

        self.rebuild();
        info!(instance = %self.instance, "orchestrator running");

        loop {
            Self::dispatch_due(&self);

            let sleep = match self.queue.lock().next_deadline() {
                Some(at) => {
                    let wait_ms = (at - self.clock.epoch_ms()).max(0) as u64;
                    Duration::from_millis(wait_ms)
                }
                None => IDLE_SLEEP,
            };

            tokio::select! {
                biased;
                _ = self.root_cancel.cancelled() => break,
                changed = config_rx.changed(), if config_alive => {
                    match changed {
                        Ok(()) => self.rebuild(),
                        // Config source gone; keep the last snapshot
                        Err(_) => config_alive = false,
                    }
                }
                request = enqueue_rx.recv() => {
                    if let Some(request) = request {
                        self.queue.lock().push(request.task, request.run_at_ms);
                    }
                }
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        info!("orchestrator loop stopped");
    }

    /// Cancel everything and wait for in-flight tasks to drain.
    ///
    /// Tasks still running past the deadline are abandoned; boot recovery
    /// rewrites their operations to system_cancelled.
    pub async fn shutdown(&self, drain: Duration) {
        self.root_cancel.cancel();
        let deadline = tokio::time::Instant::now() + drain;
        while !self.running.lock().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                let abandoned = self.running.lock().len();
                warn!(abandoned, "drain deadline reached with tasks in flight");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// True when nothing is queued for now and nothing is running.
    pub fn is_idle(&self) -> bool {
        let now = self.clock.epoch_ms();
        let queue_due = self
            .queue
            .lock()
            .next_deadline()
            .is_some_and(|at| at <= now);
        !queue_due && self.running.lock().is_empty()
    }

    // === command surface (consumed by the RPC layer) ===

    /// Run a plan's backup now, regardless of its schedule.
    pub fn backup(&self, plan_id: &PlanId) -> Result<(), EngineError> {
        let config = self.config();
        let plan = config
            .get_plan(plan_id)
            .ok_or_else(|| EngineError::PlanNotFound(plan_id.to_string()))?;
        let repo = config
            .get_repo(&plan.repo)
            .ok_or_else(|| EngineError::RepoNotFound(plan.repo.to_string()))?;
        let mut task = Task::backup(plan.clone(), repo.clone());
        task.id = self.one_shot_id("backup", plan_id.as_str());
        task.priority = crate::task::PRIORITY_INTERACTIVE;
        task.one_shot = true;
        self.enqueue_now(task);
        Ok(())
    }

    /// Run repo-scoped maintenance now.
    pub fn do_repo_task(&self, repo_id: &RepoId, kind: RepoTask) -> Result<(), EngineError> {
        let config = self.config();
        let repo = config
            .get_repo(repo_id)
            .ok_or_else(|| EngineError::RepoNotFound(repo_id.to_string()))?;
        let mut task = match kind {
            RepoTask::Prune => Task::prune(repo.clone()),
            RepoTask::Check => Task::check(repo.clone()),
            RepoTask::Stats => Task::stats(repo.clone()),
            RepoTask::IndexSnapshots => Task::index_snapshots(repo.clone()),
        };
        task.id = self.one_shot_id("repo-task", repo_id.as_str());
        task.priority = crate::task::PRIORITY_INTERACTIVE;
        task.one_shot = true;
        self.enqueue_now(task);
        Ok(())
    }

    /// Restore a snapshot subtree into a target directory.
    pub fn restore(
        &self,
        repo_id: &RepoId,
        plan_id: &PlanId,
        snapshot_id: &str,
        path: Option<String>,
        target: String,
    ) -> Result<(), EngineError> {
        let config = self.config();
        let repo = config
            .get_repo(repo_id)
            .ok_or_else(|| EngineError::RepoNotFound(repo_id.to_string()))?;
        let task = Task::restore(
            repo.clone(),
            plan_id.clone(),
            snapshot_id.to_string(),
            path,
            target,
        );
        self.enqueue_now(task);
        Ok(())
    }

    /// Remove a single snapshot by id.
    pub fn forget_snapshot(&self, repo_id: &RepoId, snapshot_id: &str) -> Result<(), EngineError> {
        let config = self.config();
        let repo = config
            .get_repo(repo_id)
            .ok_or_else(|| EngineError::RepoNotFound(repo_id.to_string()))?;
        self.enqueue_now(Task::forget_snapshot(repo.clone(), snapshot_id.to_string()));
        Ok(())
    }

    /// Queue an ad-hoc command; returns the operation created for it.
    pub fn run_command(&self, repo_id: &RepoId, command: Vec<String>) -> Result<i64, EngineError> {
        if command.is_empty() {
            return Err(EngineError::InvalidRequest("empty command".to_string()));
        }
        let config = self.config();
        let repo = config
            .get_repo(repo_id)
            .ok_or_else(|| EngineError::RepoNotFound(repo_id.to_string()))?;

        // Create the operation up front so the caller can follow it
        let op = Operation {
            id: 0,
            modno: 0,
            instance_id: self.instance.clone(),
            original_instance_keyid: String::new(),
            original_id: 0,
            original_flow_id: 0,
            repo_id: repo.id.clone(),
            repo_guid: repo.guid.clone(),
            plan_id: PlanId::new(""),
            flow_id: 0,
            snapshot_id: String::new(),
            unix_time_start_ms: self.clock.epoch_ms(),
            unix_time_end_ms: 0,
            status: OpStatus::Pending,
            display_message: String::new(),
            logref: None,
            payload: backrest_core::OpPayload::RunCommand {
                command: command.join(" "),
            },
        };
        let op = self.oplog.add(op)?;

        let mut task = Task::run_command(repo.clone(), command);
        task.id = self.one_shot_id("command", repo_id.as_str());
        task.pending_op = Some(op.id);
        self.enqueue_now(task);
        Ok(op.id)
    }

    /// Cancel the operation with the given id.
    ///
    /// A running owner gets its context cancelled and five seconds to
    /// finalize; if it does not, the operation is force-marked
    /// system_cancelled. A queued-but-unstarted operation is cancelled
    /// directly.
    pub fn cancel(&self, op_id: i64) -> Result<(), EngineError> {
        // Queued, not yet started?
        let dropped = self
            .queue
            .lock()
            .retain(|entry| entry.task.pending_op != Some(op_id));
        if !dropped.is_empty() {
            self.mark_cancelled(op_id, OpStatus::UserCancelled);
            return Ok(());
        }

        let cancel = {
            let running = self.running.lock();
            let Some(task) = running
                .iter()
                .find(|r| *r.op_slot.lock() == Some(op_id))
            else {
                let op = self.oplog.get(op_id)?;
                if op.is_terminal() {
                    return Err(EngineError::NotCancellable(op_id));
                }
                // No owner (e.g. recovered pending record): close it out
                self.mark_cancelled(op_id, OpStatus::UserCancelled);
                return Ok(());
            };
            task.cancel.clone()
        };
        cancel.cancel();

        // Watchdog: give the task the grace period to finalize
        let oplog = Arc::clone(&self.oplog);
        let clock = self.clock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CANCEL_GRACE).await;
            if let Ok(op) = oplog.get(op_id) {
                if !op.is_terminal() {
                    warn!(op = op_id, "cancel grace expired, force-marking");
                    force_status(&oplog, op_id, OpStatus::SystemCancelled, clock.epoch_ms());
                }
            }
        });
        Ok(())
    }

    /// Delete matching operations (optionally only failed ones) and their
    /// transcripts. Returns how many were removed.
    pub fn clear_history(
        &self,
        mut selector: OpSelector,
        only_failed: bool,
    ) -> Result<usize, EngineError> {
        if only_failed {
            selector = selector.with_statuses(vec![OpStatus::Error, OpStatus::SystemCancelled]);
        }
        let doomed = self.oplog.list(&selector);
        let removed = self.oplog.delete(&selector)?;
        for op in &doomed {
            if let Some(logref) = &op.logref {
                if let Err(e) = self.logstore.delete(logref) {
                    warn!(error = %e, logref, "failed to delete transcript");
                }
            }
        }
        Ok(removed)
    }

    /// List the snapshots a repo currently holds, optionally one plan's.
    ///
    /// Read-only against the repository; does not take the repo lock and
    /// records no operation.
    pub async fn list_snapshots(
        &self,
        repo_id: &RepoId,
        plan_id: Option<&PlanId>,
    ) -> Result<Vec<backrest_core::SnapshotMeta>, EngineError> {
        let config = self.config();
        let repo = config
            .get_repo(repo_id)
            .ok_or_else(|| EngineError::RepoNotFound(repo_id.to_string()))?;
        let ctx = backrest_adapters::DriverCtx::new(self.binary.clone(), repo.clone())
            .with_cancel(self.root_cancel.child_token());
        let tag = plan_id.map(|p| format!("plan:{p}"));
        self.driver
            .snapshots(&ctx, tag.as_deref())
            .await
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))
    }

    /// List the files under one path of a snapshot.
    pub async fn list_snapshot_files(
        &self,
        repo_id: &RepoId,
        snapshot_id: &str,
        path: &str,
    ) -> Result<Vec<backrest_adapters::LsEntry>, EngineError> {
        let config = self.config();
        let repo = config
            .get_repo(repo_id)
            .ok_or_else(|| EngineError::RepoNotFound(repo_id.to_string()))?;
        let ctx = backrest_adapters::DriverCtx::new(self.binary.clone(), repo.clone())
            .with_cancel(self.root_cancel.child_token());
        self.driver
            .ls(&ctx, snapshot_id, path)
            .await
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))
    }

    /// Aggregates for the summary dashboard: per-plan last backup status
    /// and bytes added over the trailing 30 days.
    pub fn dashboard(&self) -> Dashboard {
        let config = self.config();
        let now = self.clock.epoch_ms();
        let plans = config
            .plans
            .iter()
            .map(|plan| {
                let mut last: Option<(i64, OpStatus)> = None;
                self.oplog
                    .query(&OpSelector::all().with_plan_id(plan.id.clone()), |op| {
                        if op.payload.kind() == "backup" && op.status.is_terminal() {
                            let candidate = (op.unix_time_start_ms, op.status);
                            if last.is_none_or(|(t, _)| candidate.0 >= t) {
                                last = Some(candidate);
                            }
                        }
                        true
                    });
                PlanSummary {
                    plan_id: plan.id.clone(),
                    last_status: last.map(|(_, s)| s),
                    last_time_ms: last.map(|(t, _)| t),
                }
            })
            .collect();

        let mut bytes_added_30d = 0u64;
        let window = OpSelector::all().started_after(now - 30 * 86_400_000);
        self.oplog.query(&window, |op| {
            if let backrest_core::OpPayload::Backup {
                summary: Some(summary),
                ..
            } = &op.payload
            {
                bytes_added_30d += summary.data_added;
            }
            true
        });

        Dashboard {
            plans,
            bytes_added_30d,
        }
    }

    // === scheduler internals ===

    fn config(&self) -> Arc<Config> {
        self.config_rx.borrow().clone()
    }

    fn one_shot_id(&self, kind: &str, target: &str) -> String {
        let n = self.next_exec_id.fetch_add(1, Ordering::Relaxed);
        format!("onetime/{kind}/{target}/{n}")
    }

    fn enqueue_now(&self, task: Task) {
        self.queue.lock().push(task, self.clock.epoch_ms());
        self.wake.notify_one();
    }

    fn mark_cancelled(&self, op_id: i64, status: OpStatus) {
        force_status(&self.oplog, op_id, status, self.clock.epoch_ms());
    }

    /// Rebuild the recurring task set from the current configuration.
    ///
    /// Removed tasks are dropped from the queue (pending operations they
    /// held are closed out) and cancelled if in flight; added tasks are
    /// seeded from their last successful run in the operation log.
    fn rebuild(&self) {
        let config = self.config();
        let now = self.clock.epoch_ms();
        let desired = desired_tasks(&config);
        let desired_ids: HashSet<&str> = desired.iter().map(|t| t.id.as_str()).collect();

        let dropped = self
            .queue
            .lock()
            .retain(|entry| !entry.task.is_recurring() || still_desired(&entry.task, &config));
        for task in dropped {
            if let Some(op_id) = task.pending_op {
                self.mark_cancelled(op_id, OpStatus::SystemCancelled);
            }
        }

        {
            let running = self.running.lock();
            for running_task in running.iter() {
                if running_task.recurring && !desired_ids.contains(running_task.task_id.as_str()) {
                    info!(task = %running_task.task_id, "cancelling task removed by config change");
                    running_task.cancel.cancel();
                }
            }
        }

        let running_ids: HashSet<String> = self
            .running
            .lock()
            .iter()
            .map(|r| r.task_id.clone())
            .collect();
        for task in desired {
            if self.queue.lock().contains_task(&task.id) || running_ids.contains(&task.id) {
                continue;
            }
            let last = self.last_run_ms(&task);
            if let Some(at) = task.next_run(now, last) {
                self.queue.lock().push(task, at);
            }
        }
        self.wake.notify_one();
    }

    /// Start time of the last successful run of this task's kind/target.
    fn last_run_ms(&self, task: &Task) -> Option<i64> {
        let (selector, kind) = match &task.kind {
            TaskKind::Backup { plan, repo } => (
                OpSelector::all()
                    .with_repo_guid(repo.guid.clone())
                    .with_plan_id(plan.id.clone()),
                "backup",
            ),
            TaskKind::Prune { repo } => (
                OpSelector::all().with_repo_guid(repo.guid.clone()),
                "prune",
            ),
            TaskKind::Check { repo } => (
                OpSelector::all().with_repo_guid(repo.guid.clone()),
                "check",
            ),
            TaskKind::Stats { repo } => (
                OpSelector::all().with_repo_guid(repo.guid.clone()),
                "stats",
            ),
            _ => return None,
        };
        let mut best: Option<i64> = None;
        self.oplog.query(&selector, |op| {
            if op.status == OpStatus::Success
                && op.payload.kind() == kind
                && op.instance_id == self.instance
            {
                best = Some(best.map_or(op.unix_time_start_ms, |b| b.max(op.unix_time_start_ms)));
            }
            true
        });
        best
    }

    /// Pop and launch every task whose time has arrived.
    fn dispatch_due(this: &Arc<Self>) {
        let now = this.clock.epoch_ms();
        loop {
            let Some(entry) = this.queue.lock().pop_due(now) else {
                break;
            };
            let task = entry.task;
            match task.repo_guid().cloned() {
                Some(guid) => match this.locks.try_acquire(&guid) {
                    Some(guard) => Self::spawn_execution(this, task, Some(guard)),
                    None => {
                        // Contended: back off rather than block the loop
                        let delay = RetryPolicy::lock_contention().jittered(0);
                        this.queue
                            .lock()
                            .push(task, now + delay.as_millis() as i64);
                    }
                },
                None => Self::spawn_execution(this, task, None),
            }
        }
    }

    fn spawn_execution(this: &Arc<Self>, task: Task, guard: Option<OwnedMutexGuard<()>>) {
        let exec_id = this.next_exec_id.fetch_add(1, Ordering::Relaxed);
        let cancel = this.root_cancel.child_token();
        let op_slot = Arc::new(Mutex::new(task.pending_op));

        this.running.lock().push(RunningTask {
            exec_id,
            task_id: task.id.clone(),
            recurring: task.is_recurring(),
            op_slot: Arc::clone(&op_slot),
            cancel: cancel.clone(),
        });

        let this_exec = Arc::clone(this);
        let slot_for_watcher = Arc::clone(&op_slot);
        let handle = tokio::spawn(async move {
            let this = this_exec;
            let outcome = this
                .runner
                .execute(task.clone(), cancel, op_slot)
                .await;
            drop(guard);
            match outcome {
                RunOutcome::Done => {
                    if task.is_recurring() {
                        let now = this.clock.epoch_ms();
                        if let Some(at) = task.next_run(now, Some(now)) {
                            this.queue.lock().push(task, at);
                        }
                    }
                }
                RunOutcome::Retry { delay, task } => {
                    let at = this.clock.epoch_ms() + delay.as_millis() as i64;
                    this.queue.lock().push(task, at);
                }
            }
        });

        let this = Arc::clone(this);
        tokio::spawn(async move {
            if let Err(join_error) = handle.await {
                if join_error.is_panic() {
                    // Recovery boundary: a panicking task becomes an
                    // operation failure, never a dead scheduler
                    error!(error = %join_error, "task execution panicked");
                    let op_id = *slot_for_watcher.lock();
                    if let Some(op_id) = op_id {
                        this.record_panic(op_id, &join_error.to_string());
                    }
                }
            }
            this.running.lock().retain(|r| r.exec_id != exec_id);
            this.wake.notify_one();
        });
    }

    fn record_panic(&self, op_id: i64, message: &str) {
        let end = self.clock.epoch_ms();
        let truncated: String = message.chars().take(1024).collect();
        let result = self
            .oplog
            .transform(&OpSelector::all().with_ids(vec![op_id]), |op| {
                if op.is_terminal() {
                    return Transformed::Keep;
                }
                let mut updated = op.clone();
                updated.status = OpStatus::Error;
                updated.unix_time_end_ms = end.max(op.unix_time_start_ms);
                updated.display_message = format!("task panicked: {truncated}");
                Transformed::Update(updated)
            });
        if let Err(e) = result {
            warn!(op = op_id, error = %e, "failed to record panic");
        }
    }
}

/// Force a non-terminal operation to the given terminal status.
fn force_status(oplog: &OpLog, op_id: i64, status: OpStatus, end_ms: i64) {
    let result = oplog.transform(&OpSelector::all().with_ids(vec![op_id]), |op| {
        if op.is_terminal() {
            return Transformed::Keep;
        }
        let mut updated = op.clone();
        updated.status = status;
        updated.unix_time_end_ms = end_ms.max(op.unix_time_start_ms);
        updated.display_message = "cancelled".to_string();
        Transformed::Update(updated)
    });
    if let Err(e) = result {
        warn!(op = op_id, error = %e, "failed to mark operation cancelled");
    }
}

#[cfg(test)]
#[path = "orchestrator_tests/mod.rs"]
mod tests;
