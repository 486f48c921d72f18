// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{test_plan, test_repo};
use backrest_config::{Schedule, ScheduleClock};

#[test]
fn backup_task_follows_plan_schedule() {
    let mut plan = test_plan(vec!["/data".into()]);
    plan.schedule = Schedule::interval_hours(6);
    let task = Task::backup(plan, test_repo());

    let now = 1_700_000_000_000;
    // No prior run under last-run-time: due immediately
    assert_eq!(task.next_run(now, None), Some(now));
    // Prior run an hour ago: five hours out
    let last = now - 3_600_000;
    assert_eq!(task.next_run(now, Some(last)), Some(last + 6 * 3_600_000));
}

#[test]
fn disabled_plan_never_schedules() {
    let task = Task::backup(test_plan(vec!["/data".into()]), test_repo());
    assert_eq!(task.next_run(1_700_000_000_000, None), None);
}

#[test]
fn one_shots_do_not_reschedule() {
    let repo = test_repo();
    let now = 1_700_000_000_000;
    assert_eq!(
        Task::restore(repo.clone(), "p1".into(), "snap".into(), None, "/tmp/out".into())
            .next_run(now, Some(now)),
        None
    );
    assert_eq!(
        Task::run_command(repo.clone(), vec!["unlock".into()]).next_run(now, None),
        None
    );
    assert_eq!(
        Task::forget(test_plan(vec![]), repo, 7).next_run(now, None),
        None
    );
}

#[test]
fn prune_uses_repo_policy_schedule() {
    let mut repo = test_repo();
    assert_eq!(Task::prune(repo.clone()).next_run(1_700_000_000_000, None), None);

    repo.prune_policy = Some(backrest_config::PrunePolicy {
        schedule: Schedule::interval_days(7),
        max_unused_percent: 10.0,
    });
    let now = 1_700_000_000_000;
    assert_eq!(Task::prune(repo).next_run(now, None), Some(now));
}

#[test]
fn stats_and_gc_are_periodic() {
    let now = 1_700_000_000_000;
    let stats = Task::stats(test_repo());
    assert_eq!(stats.next_run(now, Some(now)), Some(now + 24 * 3_600_000));
    let gc = Task::collect_garbage();
    assert_eq!(gc.next_run(now, Some(now)), Some(now + 24 * 3_600_000));
}

#[test]
fn repo_affinity_covers_every_repo_touching_kind() {
    let repo = test_repo();
    let plan = test_plan(vec![]);
    assert!(Task::backup(plan.clone(), repo.clone()).repo_guid().is_some());
    assert!(Task::prune(repo.clone()).repo_guid().is_some());
    assert!(Task::index_snapshots(repo.clone()).repo_guid().is_some());
    assert!(Task::collect_garbage().repo_guid().is_none());

    assert_eq!(
        Task::backup(plan, repo).plan_id().map(|p| p.as_str()),
        Some("p1")
    );
}

#[test]
fn one_shot_instances_are_never_recurring() {
    let mut plan = test_plan(vec!["/data".into()]);
    plan.schedule = Schedule::interval_hours(6);
    let mut task = Task::backup(plan, test_repo());
    assert!(task.is_recurring());
    task.one_shot = true;
    assert!(!task.is_recurring());
}

#[test]
fn recurring_flags_match_rebuild_ownership() {
    let repo = test_repo();
    assert!(Task::backup(test_plan(vec![]), repo.clone()).is_recurring());
    assert!(Task::stats(repo.clone()).is_recurring());
    assert!(Task::collect_garbage().is_recurring());
    assert!(!Task::restore(repo.clone(), "p1".into(), "s".into(), None, "/t".into()).is_recurring());
    assert!(!Task::forget(test_plan(vec![]), repo, 1).is_recurring());
}

#[test]
fn schedule_with_utc_cron_returns_future_time() {
    let mut plan = test_plan(vec!["/data".into()]);
    plan.schedule = Schedule::cron("0 0 3 * * *", ScheduleClock::Utc);
    let task = Task::backup(plan, test_repo());
    let now = 1_700_000_000_000;
    let next = task.next_run(now, None).expect("cron schedules");
    assert!(next > now);
}
