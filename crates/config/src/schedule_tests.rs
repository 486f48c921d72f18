// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use proptest::prelude::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

#[test]
fn disabled_never_fires() {
    let s = Schedule::disabled();
    assert_eq!(s.next(at(1_000_000), None), None);
    assert_eq!(s.next(at(1_000_000), Some(at(900_000))), None);
}

#[test]
fn utc_cron_returns_strictly_future_time() {
    // Six-field expression, seconds first: daily at 02:00:00
    let s = Schedule::cron("0 0 2 * * *", ScheduleClock::Utc);
    let now = at(1_700_000_000);
    let next = s.next(now, None).unwrap();
    assert!(next > now);
    assert_eq!(next.format("%H:%M:%S").to_string(), "02:00:00");
}

#[test]
fn interval_hours_anchors_on_last_run() {
    let s = Schedule::interval_hours(6);
    let now = at(100_000);
    let last = at(100_000 - 3_600);
    // 1h since last run, 5h to go
    assert_eq!(s.next(now, Some(last)).unwrap(), at(100_000 + 5 * 3_600));
}

#[test]
fn missed_interval_fires_once_at_now() {
    let s = Schedule::interval_hours(1);
    let now = at(100_000);
    let last = at(100_000 - 10 * 3_600);
    assert_eq!(s.next(now, Some(last)).unwrap(), now);
}

#[test]
fn last_run_time_without_prior_run_fires_now() {
    assert_eq!(
        Schedule::interval_days(7).next(at(5_000), None).unwrap(),
        at(5_000)
    );
    assert_eq!(
        Schedule::max_frequency_days(3).next(at(5_000), None).unwrap(),
        at(5_000)
    );
}

#[test]
fn wall_clock_interval_without_prior_run_waits_one_interval() {
    let s = Schedule {
        kind: ScheduleKind::IntervalDays { days: 2 },
        clock: ScheduleClock::Utc,
    };
    let now = at(50_000);
    assert_eq!(s.next(now, None).unwrap(), now + Duration::days(2));
}

// Pins the max-frequency semantics: the policy is applied literally
// (now earlier than last + d defers to exactly last + d, else now),
// so recomputing after a config reload can never defer twice.
#[test]
fn max_frequency_defers_to_exactly_last_plus_duration() {
    let s = Schedule::max_frequency_days(2);
    let last = at(1_000_000);
    let now_too_soon = last + Duration::days(1);
    assert_eq!(s.next(now_too_soon, Some(last)).unwrap(), last + Duration::days(2));

    // Recomputing with the same last run yields the same target
    assert_eq!(
        s.next(now_too_soon + Duration::hours(5), Some(last)).unwrap(),
        last + Duration::days(2)
    );

    // Past the window the task is due immediately
    let now_due = last + Duration::days(3);
    assert_eq!(s.next(now_due, Some(last)).unwrap(), now_due);
}

#[test]
fn schedule_round_trips_through_json() {
    let s = Schedule::cron("0 30 4 * * Mon", ScheduleClock::Local);
    let json = serde_json::to_string(&s).unwrap();
    let back: Schedule = serde_json::from_str(&json).unwrap();
    assert_eq!(back, s);
}

#[test]
fn check_rejects_bad_cron_and_zero_intervals() {
    assert!(Schedule::cron("not a cron", ScheduleClock::Utc).check().is_err());
    assert!(Schedule::interval_hours(0).check().is_err());
    assert!(Schedule::interval_days(1).check().is_ok());
}

proptest! {
    // next() never returns a time before now, and is monotonic in now.
    #[test]
    fn next_is_monotonic_in_now(
        start in 0i64..4_000_000_000,
        step in 0i64..1_000_000,
        last_offset in proptest::option::of(0i64..10_000_000),
    ) {
        let schedules = [
            Schedule::interval_hours(6),
            Schedule::interval_days(3),
            Schedule::max_frequency_days(2),
            Schedule::cron("0 0 3 * * *", ScheduleClock::Utc),
        ];
        let now_a = at(start);
        let now_b = at(start + step);
        let last = last_offset.map(|off| at(start.saturating_sub(off)));

        for s in &schedules {
            let a = s.next(now_a, last);
            let b = s.next(now_b, last);
            if let (Some(a), Some(b)) = (a, b) {
                prop_assert!(a >= now_a);
                prop_assert!(b >= now_b);
                prop_assert!(b >= a);
            }
        }
    }
}
