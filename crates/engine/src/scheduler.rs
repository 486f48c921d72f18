// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task queue and per-repo mutual exclusion.
//!
//! The queue is a min-heap keyed on (run time, priority, FIFO sequence):
//! earliest first; at the same instant higher priority wins, then
//! enqueue order. Repo locks guarantee at most one in-progress task per
//! repo guid; lock acquisition is try-only — a contended task goes back
//! into the queue with a short backoff instead of blocking the loop.

use crate::task::{Task, TaskKind};
use backrest_config::Config;
use backrest_core::RepoGuid;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A queued task with its scheduled run time.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub run_at_ms: i64,
    pub priority: i32,
    /// FIFO tiebreaker assigned by the queue.
    pub seq: u64,
    pub task: Task,
}

impl ScheduledTask {
    /// Smaller sorts earlier: time, then higher priority, then FIFO.
    fn key(&self) -> (i64, Reverse<i32>, u64) {
        (self.run_at_ms, Reverse(self.priority), self.seq)
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for ScheduledTask {}
impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Min-heap of scheduled tasks.
#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Reverse<ScheduledTask>>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task, run_at_ms: i64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledTask {
            run_at_ms,
            priority: task.priority,
            seq,
            task,
        }));
    }

    /// Pop the earliest task whose time has arrived.
    pub fn pop_due(&mut self, now_ms: i64) -> Option<ScheduledTask> {
        if self.heap.peek().is_some_and(|Reverse(t)| t.run_at_ms <= now_ms) {
            self.heap.pop().map(|Reverse(t)| t)
        } else {
            None
        }
    }

    /// Earliest scheduled run time, if any.
    pub fn next_deadline(&self) -> Option<i64> {
        self.heap.peek().map(|Reverse(t)| t.run_at_ms)
    }

    /// Keep only entries the predicate accepts; returns the dropped tasks.
    pub fn retain(&mut self, mut keep: impl FnMut(&ScheduledTask) -> bool) -> Vec<Task> {
        let mut dropped = Vec::new();
        let entries: Vec<Reverse<ScheduledTask>> = std::mem::take(&mut self.heap).into_vec();
        for Reverse(entry) in entries {
            if keep(&entry) {
                self.heap.push(Reverse(entry));
            } else {
                dropped.push(entry.task);
            }
        }
        dropped
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.heap.iter().any(|Reverse(t)| t.task.id == id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Registry of per-repo mutexes keyed by repo guid.
///
/// A guard held for the duration of a task execution is the invariant
/// "at most one in-progress operation per repo at any instant".
#[derive(Clone, Default)]
pub struct RepoLocks {
    locks: Arc<Mutex<HashMap<RepoGuid, Arc<AsyncMutex<()>>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to acquire the lock for a repo without blocking.
    pub fn try_acquire(&self, guid: &RepoGuid) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(guid.clone()).or_default())
        };
        lock.try_lock_owned().ok()
    }
}

/// The recurring task set a configuration declares.
///
/// Backup per scheduled plan, prune/check per repo policy, stats per
/// repo, one garbage collector. One-shot tasks never appear here.
pub fn desired_tasks(config: &Config) -> Vec<Task> {
    let mut tasks = Vec::new();
    for plan in &config.plans {
        let Some(repo) = config.get_repo(&plan.repo) else {
            continue;
        };
        if !plan.schedule.is_disabled() {
            tasks.push(Task::backup(plan.clone(), repo.clone()));
        }
    }
    for repo in &config.repos {
        if repo
            .prune_policy
            .as_ref()
            .is_some_and(|p| !p.schedule.is_disabled())
        {
            tasks.push(Task::prune(repo.clone()));
        }
        if repo
            .check_policy
            .as_ref()
            .is_some_and(|p| !p.schedule.is_disabled())
        {
            tasks.push(Task::check(repo.clone()));
        }
        tasks.push(Task::stats(repo.clone()));
    }
    tasks.push(Task::collect_garbage());
    tasks
}

/// True when the task still matches the configuration that spawned it.
pub(crate) fn still_desired(task: &Task, config: &Config) -> bool {
    match &task.kind {
        TaskKind::Backup { plan, .. } => config
            .get_plan(&plan.id)
            .is_some_and(|p| !p.schedule.is_disabled()),
        TaskKind::Prune { repo } => config.get_repo(&repo.id).is_some_and(|r| {
            r.prune_policy
                .as_ref()
                .is_some_and(|p| !p.schedule.is_disabled())
        }),
        TaskKind::Check { repo } => config.get_repo(&repo.id).is_some_and(|r| {
            r.check_policy
                .as_ref()
                .is_some_and(|p| !p.schedule.is_disabled())
        }),
        TaskKind::Stats { repo } => config.get_repo(&repo.id).is_some(),
        TaskKind::CollectGarbage => true,
        // One-shots run regardless of config churn
        _ => true,
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
