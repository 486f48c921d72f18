// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task model: everything the scheduler can run.
//!
//! A task is data — a kind plus the config snapshot it operates on. New
//! kinds add a variant here and an arm in the runner; nothing else changes.
//! Tasks carry immutable copies of their repo/plan so a config edit never
//! mutates work already queued.

use backrest_config::{Plan, Repo, Schedule};
use backrest_core::{PlanId, RepoGuid};
use chrono::{DateTime, Utc};

pub const PRIORITY_LOW: i32 = -10;
pub const PRIORITY_DEFAULT: i32 = 0;
/// User-initiated one-shots jump the queue.
pub const PRIORITY_INTERACTIVE: i32 = 10;
/// Follow-ups within a flow run before anything newly scheduled.
pub const PRIORITY_FLOW: i32 = 20;

/// Interval between stats collections per repo.
const STATS_INTERVAL_HOURS: u32 = 24;
/// Interval between garbage collection sweeps.
const GC_INTERVAL_HOURS: u32 = 24;

/// What a task does when it runs.
#[derive(Debug, Clone)]
pub enum TaskKind {
    Backup {
        plan: Plan,
        repo: Repo,
    },
    Forget {
        plan: Plan,
        repo: Repo,
    },
    Prune {
        repo: Repo,
    },
    Check {
        repo: Repo,
    },
    /// Remove one snapshot by id, regardless of retention.
    ForgetSnapshot {
        repo: Repo,
        snapshot_id: String,
    },
    /// Reconcile the repo's real snapshot list with indexed operations.
    IndexSnapshots {
        repo: Repo,
    },
    Stats {
        repo: Repo,
    },
    Restore {
        repo: Repo,
        plan_id: PlanId,
        snapshot_id: String,
        path: Option<String>,
        target: String,
    },
    RunCommand {
        repo: Repo,
        command: Vec<String>,
    },
    /// Sweep expired task logs and operations past the retention horizon.
    CollectGarbage,
}

/// A schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    /// Stable id: recurring tasks keep the same id across rebuilds.
    pub id: String,
    pub kind: TaskKind,
    pub priority: i32,
    /// Flow the task's operations join (0 = start a new flow).
    pub flow_id: i64,
    /// Operation left pending by a retrying hook policy; the re-run
    /// resumes it instead of creating a new record.
    pub pending_op: Option<i64>,
    /// User-initiated instance of an otherwise recurring kind; never
    /// rescheduled or owned by config rebuilds.
    pub one_shot: bool,
}

impl Task {
    pub fn backup(plan: Plan, repo: Repo) -> Self {
        Self {
            id: format!("backup/{}", plan.id),
            kind: TaskKind::Backup { plan, repo },
            priority: PRIORITY_DEFAULT,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn forget(plan: Plan, repo: Repo, flow_id: i64) -> Self {
        Self {
            id: format!("forget/{}/{flow_id}", plan.id),
            kind: TaskKind::Forget { plan, repo },
            priority: PRIORITY_FLOW,
            flow_id,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn prune(repo: Repo) -> Self {
        Self {
            id: format!("prune/{}", repo.id),
            kind: TaskKind::Prune { repo },
            priority: PRIORITY_DEFAULT,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn check(repo: Repo) -> Self {
        Self {
            id: format!("check/{}", repo.id),
            kind: TaskKind::Check { repo },
            priority: PRIORITY_DEFAULT,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn forget_snapshot(repo: Repo, snapshot_id: String) -> Self {
        Self {
            id: format!("forget-snapshot/{}/{snapshot_id}", repo.id),
            kind: TaskKind::ForgetSnapshot { repo, snapshot_id },
            priority: PRIORITY_INTERACTIVE,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn index_snapshots(repo: Repo) -> Self {
        Self {
            id: format!("index/{}", repo.id),
            kind: TaskKind::IndexSnapshots { repo },
            priority: PRIORITY_INTERACTIVE,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn stats(repo: Repo) -> Self {
        Self {
            id: format!("stats/{}", repo.id),
            kind: TaskKind::Stats { repo },
            priority: PRIORITY_LOW,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn restore(
        repo: Repo,
        plan_id: PlanId,
        snapshot_id: String,
        path: Option<String>,
        target: String,
    ) -> Self {
        Self {
            id: format!("restore/{}/{snapshot_id}", repo.id),
            kind: TaskKind::Restore {
                repo,
                plan_id,
                snapshot_id,
                path,
                target,
            },
            priority: PRIORITY_INTERACTIVE,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn run_command(repo: Repo, command: Vec<String>) -> Self {
        Self {
            id: format!("command/{}", repo.id),
            kind: TaskKind::RunCommand { repo, command },
            priority: PRIORITY_INTERACTIVE,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    pub fn collect_garbage() -> Self {
        Self {
            id: "gc".to_string(),
            kind: TaskKind::CollectGarbage,
            priority: PRIORITY_LOW,
            flow_id: 0,
            pending_op: None,
            one_shot: false,
        }
    }

    /// Repo this task must hold exclusively, if any.
    pub fn repo_guid(&self) -> Option<&RepoGuid> {
        match &self.kind {
            TaskKind::Backup { repo, .. }
            | TaskKind::Forget { repo, .. }
            | TaskKind::ForgetSnapshot { repo, .. }
            | TaskKind::Prune { repo }
            | TaskKind::Check { repo }
            | TaskKind::IndexSnapshots { repo }
            | TaskKind::Stats { repo }
            | TaskKind::Restore { repo, .. }
            | TaskKind::RunCommand { repo, .. } => Some(&repo.guid),
            TaskKind::CollectGarbage => None,
        }
    }

    /// Plan affinity, if any.
    pub fn plan_id(&self) -> Option<&PlanId> {
        match &self.kind {
            TaskKind::Backup { plan, .. } | TaskKind::Forget { plan, .. } => Some(&plan.id),
            TaskKind::Restore { plan_id, .. } => Some(plan_id),
            _ => None,
        }
    }

    /// Display name for logs.
    pub fn name(&self) -> String {
        match &self.kind {
            TaskKind::Backup { plan, .. } => format!("backup {}", plan.id),
            TaskKind::Forget { plan, .. } => format!("forget {}", plan.id),
            TaskKind::ForgetSnapshot { repo, snapshot_id } => {
                format!("forget-snapshot {}@{}", repo.id, snapshot_id)
            }
            TaskKind::Prune { repo } => format!("prune {}", repo.id),
            TaskKind::Check { repo } => format!("check {}", repo.id),
            TaskKind::IndexSnapshots { repo } => format!("index {}", repo.id),
            TaskKind::Stats { repo } => format!("stats {}", repo.id),
            TaskKind::Restore { repo, snapshot_id, .. } => {
                format!("restore {}@{}", repo.id, snapshot_id)
            }
            TaskKind::RunCommand { repo, .. } => format!("command {}", repo.id),
            TaskKind::CollectGarbage => "collect-garbage".to_string(),
        }
    }

    /// True for tasks the config rebuild owns (re-enqueued on completion).
    pub fn is_recurring(&self) -> bool {
        !self.one_shot
            && matches!(
                self.kind,
                TaskKind::Backup { .. }
                    | TaskKind::Prune { .. }
                    | TaskKind::Check { .. }
                    | TaskKind::Stats { .. }
                    | TaskKind::CollectGarbage
            )
    }

    /// Next run time in epoch ms, from this task's schedule.
    ///
    /// One-shot tasks return `None`: they run when enqueued and never
    /// reschedule themselves.
    pub fn next_run(&self, now_ms: i64, last_run_ms: Option<i64>) -> Option<i64> {
        let schedule = match &self.kind {
            TaskKind::Backup { plan, .. } => plan.schedule.clone(),
            TaskKind::Prune { repo } => repo.prune_policy.as_ref()?.schedule.clone(),
            TaskKind::Check { repo } => repo.check_policy.as_ref()?.schedule.clone(),
            TaskKind::Stats { .. } => Schedule::interval_hours(STATS_INTERVAL_HOURS),
            TaskKind::CollectGarbage => Schedule::interval_hours(GC_INTERVAL_HOURS),
            _ => return None,
        };
        let now = to_datetime(now_ms)?;
        let last = last_run_ms.and_then(to_datetime);
        schedule.next(now, last).map(|t| t.timestamp_millis())
    }
}

fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
