// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retention policies and their pure evaluation.
//!
//! The backup tool applies retention itself when given the right forget
//! flags; `forget_args` produces those. `partition` is the same rule
//! evaluated locally — the fake driver and the idempotency tests run it,
//! and it documents exactly which snapshots a policy preserves.

use backrest_core::SnapshotMeta;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to keep after a successful backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    KeepAll,
    KeepLastN {
        count: u32,
    },
    KeepByTime {
        #[serde(default)]
        hourly: u32,
        #[serde(default)]
        daily: u32,
        #[serde(default)]
        weekly: u32,
        #[serde(default)]
        monthly: u32,
        #[serde(default)]
        yearly: u32,
        /// Duration string like `"30d"` or `"2y5m7d3h"`, relative to the
        /// newest snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        within: Option<String>,
    },
}

impl RetentionPolicy {
    /// Flags for the backup tool's forget subcommand.
    ///
    /// Returns `None` for `KeepAll`: there is nothing to forget.
    pub fn forget_args(&self) -> Option<Vec<String>> {
        match self {
            RetentionPolicy::KeepAll => None,
            RetentionPolicy::KeepLastN { count } => {
                Some(vec!["--keep-last".into(), count.to_string()])
            }
            RetentionPolicy::KeepByTime {
                hourly,
                daily,
                weekly,
                monthly,
                yearly,
                within,
            } => {
                let mut args = Vec::new();
                for (flag, n) in [
                    ("--keep-hourly", hourly),
                    ("--keep-daily", daily),
                    ("--keep-weekly", weekly),
                    ("--keep-monthly", monthly),
                    ("--keep-yearly", yearly),
                ] {
                    if *n > 0 {
                        args.push(flag.to_string());
                        args.push(n.to_string());
                    }
                }
                if let Some(within) = within {
                    args.push("--keep-within".into());
                    args.push(within.clone());
                }
                Some(args)
            }
        }
    }

    /// Split a snapshot set into (kept, forgotten) under this policy.
    ///
    /// Idempotent: partitioning the kept set again forgets nothing.
    pub fn partition(&self, snapshots: &[SnapshotMeta]) -> (Vec<SnapshotMeta>, Vec<SnapshotMeta>) {
        let mut sorted: Vec<SnapshotMeta> = snapshots.to_vec();
        // Newest first; ties broken by id so the split is deterministic
        sorted.sort_by(|a, b| (b.unix_time_ms, &b.id).cmp(&(a.unix_time_ms, &a.id)));

        let keep_ids: HashSet<String> = match self {
            RetentionPolicy::KeepAll => sorted.iter().map(|s| s.id.clone()).collect(),
            RetentionPolicy::KeepLastN { count } => sorted
                .iter()
                .take(*count as usize)
                .map(|s| s.id.clone())
                .collect(),
            RetentionPolicy::KeepByTime {
                hourly,
                daily,
                weekly,
                monthly,
                yearly,
                within,
            } => {
                let mut keep = HashSet::new();
                for (n, bucket) in [
                    (*hourly, BucketKind::Hourly),
                    (*daily, BucketKind::Daily),
                    (*weekly, BucketKind::Weekly),
                    (*monthly, BucketKind::Monthly),
                    (*yearly, BucketKind::Yearly),
                ] {
                    keep_newest_per_bucket(&sorted, n, bucket, &mut keep);
                }
                if let (Some(within), Some(newest)) = (within, sorted.first()) {
                    if let Ok(dur) = parse_within(within) {
                        let cutoff = newest.unix_time_ms - dur.num_milliseconds();
                        for snap in &sorted {
                            if snap.unix_time_ms >= cutoff {
                                keep.insert(snap.id.clone());
                            }
                        }
                    }
                }
                keep
            }
        };

        let (kept, forgotten) = sorted
            .into_iter()
            .partition(|s| keep_ids.contains(&s.id));
        (kept, forgotten)
    }
}

#[derive(Clone, Copy)]
enum BucketKind {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

fn bucket_key(kind: BucketKind, time: DateTime<Utc>) -> (i32, u32, u32, u32) {
    match kind {
        BucketKind::Hourly => (time.year(), time.month(), time.day(), time.hour()),
        BucketKind::Daily => (time.year(), time.month(), time.day(), 0),
        BucketKind::Weekly => {
            let week = time.iso_week();
            (week.year(), week.week(), 0, 0)
        }
        BucketKind::Monthly => (time.year(), time.month(), 0, 0),
        BucketKind::Yearly => (time.year(), 0, 0, 0),
    }
}

/// Keep the newest snapshot in each of the `n` most recent buckets.
fn keep_newest_per_bucket(
    sorted_desc: &[SnapshotMeta],
    n: u32,
    kind: BucketKind,
    keep: &mut HashSet<String>,
) {
    if n == 0 {
        return;
    }
    let mut seen_buckets = Vec::new();
    for snap in sorted_desc {
        let Some(time) = DateTime::<Utc>::from_timestamp_millis(snap.unix_time_ms) else {
            continue;
        };
        let key = bucket_key(kind, time);
        if seen_buckets.contains(&key) {
            continue;
        }
        if seen_buckets.len() as u32 >= n {
            break;
        }
        seen_buckets.push(key);
        keep.insert(snap.id.clone());
    }
}

/// Parse a compact duration like `"30d"`, `"12h"`, or `"2y5m7d3h"`.
///
/// Units: `y` (365 days), `m` (30 days), `d`, `h`.
pub fn parse_within(s: &str) -> Result<Duration, String> {
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| format!("invalid duration {s:?}: unit {c:?} without a count"))?;
        digits.clear();
        total += match c {
            'y' => Duration::days(365 * n),
            'm' => Duration::days(30 * n),
            'd' => Duration::days(n),
            'h' => Duration::hours(n),
            other => return Err(format!("invalid duration {s:?}: unknown unit {other:?}")),
        };
    }
    if !digits.is_empty() {
        return Err(format!("invalid duration {s:?}: trailing count {digits:?}"));
    }
    Ok(total)
}

#[cfg(test)]
#[path = "retention_tests.rs"]
mod tests;
