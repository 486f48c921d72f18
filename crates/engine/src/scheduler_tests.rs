// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task::{PRIORITY_DEFAULT, PRIORITY_FLOW, PRIORITY_INTERACTIVE};
use crate::test_helpers::{test_config, test_plan, test_repo};
use backrest_config::Schedule;

fn named_task(id: &str, priority: i32) -> Task {
    let mut task = Task::backup(test_plan(vec!["/data".into()]), test_repo());
    task.id = id.to_string();
    task.priority = priority;
    task
}

#[test]
fn queue_pops_in_time_order() {
    let mut queue = TaskQueue::new();
    queue.push(named_task("late", PRIORITY_DEFAULT), 300);
    queue.push(named_task("early", PRIORITY_DEFAULT), 100);
    queue.push(named_task("mid", PRIORITY_DEFAULT), 200);

    assert_eq!(queue.pop_due(1_000).unwrap().task.id, "early");
    assert_eq!(queue.pop_due(1_000).unwrap().task.id, "mid");
    assert_eq!(queue.pop_due(1_000).unwrap().task.id, "late");
    assert!(queue.pop_due(1_000).is_none());
}

#[test]
fn equal_times_run_in_priority_order_then_fifo() {
    let mut queue = TaskQueue::new();
    queue.push(named_task("default-a", PRIORITY_DEFAULT), 100);
    queue.push(named_task("flow", PRIORITY_FLOW), 100);
    queue.push(named_task("interactive", PRIORITY_INTERACTIVE), 100);
    queue.push(named_task("default-b", PRIORITY_DEFAULT), 100);

    assert_eq!(queue.pop_due(100).unwrap().task.id, "flow");
    assert_eq!(queue.pop_due(100).unwrap().task.id, "interactive");
    assert_eq!(queue.pop_due(100).unwrap().task.id, "default-a");
    assert_eq!(queue.pop_due(100).unwrap().task.id, "default-b");
}

#[test]
fn future_tasks_are_not_due() {
    let mut queue = TaskQueue::new();
    queue.push(named_task("soon", PRIORITY_DEFAULT), 500);
    assert!(queue.pop_due(499).is_none());
    assert_eq!(queue.next_deadline(), Some(500));
    assert!(queue.pop_due(500).is_some());
}

#[test]
fn retain_returns_dropped_tasks() {
    let mut queue = TaskQueue::new();
    queue.push(named_task("keep", PRIORITY_DEFAULT), 100);
    queue.push(named_task("drop", PRIORITY_DEFAULT), 200);

    let dropped = queue.retain(|entry| entry.task.id == "keep");
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].id, "drop");
    assert_eq!(queue.len(), 1);
    assert!(queue.contains_task("keep"));
    assert!(!queue.contains_task("drop"));
}

#[test]
fn repo_locks_are_exclusive_per_guid() {
    let locks = RepoLocks::new();
    let guid: backrest_core::RepoGuid = "guid-a".into();
    let other: backrest_core::RepoGuid = "guid-b".into();

    let held = locks.try_acquire(&guid).expect("first acquire");
    assert!(locks.try_acquire(&guid).is_none());
    // A different repo is unaffected
    assert!(locks.try_acquire(&other).is_some());

    drop(held);
    assert!(locks.try_acquire(&guid).is_some());
}

#[test]
fn desired_tasks_cover_the_configuration() {
    let mut config = test_config(vec!["/data".into()]);
    config.plans[0].schedule = Schedule::interval_hours(6);
    config.repos[0].prune_policy = Some(backrest_config::PrunePolicy {
        schedule: Schedule::interval_days(7),
        max_unused_percent: 10.0,
    });

    let tasks = desired_tasks(&config);
    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    assert!(ids.contains(&"backup/p1"));
    assert!(ids.contains(&"prune/r1"));
    assert!(ids.contains(&"stats/r1"));
    assert!(ids.contains(&"gc"));
    // No check policy configured
    assert!(!ids.contains(&"check/r1"));
}

#[test]
fn disabled_plans_produce_no_backup_task() {
    let config = test_config(vec!["/data".into()]);
    let tasks = desired_tasks(&config);
    assert!(!tasks.iter().any(|t| t.id == "backup/p1"));
}

#[test]
fn still_desired_tracks_config_changes() {
    let mut config = test_config(vec!["/data".into()]);
    config.plans[0].schedule = Schedule::interval_hours(6);
    let backup = Task::backup(config.plans[0].clone(), config.repos[0].clone());
    assert!(still_desired(&backup, &config));

    let mut without_plan = config.clone();
    without_plan.plans.clear();
    assert!(!still_desired(&backup, &without_plan));

    // One-shots survive any config churn
    let restore = Task::restore(
        config.repos[0].clone(),
        "p1".into(),
        "snap".into(),
        None,
        "/tmp/out".into(),
    );
    assert!(still_desired(&restore, &without_plan));
}
