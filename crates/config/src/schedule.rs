// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule evaluation
//!
//! A schedule is a pure function `next(now, last_run) -> Option<time>`.
//! Cron expressions are evaluated against the configured clock (local or
//! UTC wall time); interval and max-frequency schedules anchor on the last
//! successful run. A missed target fires once, at `now` — never as a
//! catch-up flood.

use chrono::{DateTime, Duration, Local, Utc};
use cron::Schedule as CronExpr;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reference time a schedule is evaluated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleClock {
    #[default]
    Local,
    Utc,
    LastRunTime,
}

/// The shape of a schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Disabled,
    Cron {
        expr: String,
    },
    IntervalDays {
        days: u32,
    },
    IntervalHours {
        hours: u32,
    },
    /// Run whenever due, but no more often than every `days` days.
    MaxFrequencyDays {
        days: u32,
    },
}

/// A schedule kind paired with the clock it is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(flatten)]
    pub kind: ScheduleKind,
    #[serde(default)]
    pub clock: ScheduleClock,
}

impl Schedule {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn cron(expr: impl Into<String>, clock: ScheduleClock) -> Self {
        Self {
            kind: ScheduleKind::Cron { expr: expr.into() },
            clock,
        }
    }

    pub fn interval_hours(hours: u32) -> Self {
        Self {
            kind: ScheduleKind::IntervalHours { hours },
            clock: ScheduleClock::LastRunTime,
        }
    }

    pub fn interval_days(days: u32) -> Self {
        Self {
            kind: ScheduleKind::IntervalDays { days },
            clock: ScheduleClock::LastRunTime,
        }
    }

    pub fn max_frequency_days(days: u32) -> Self {
        Self {
            kind: ScheduleKind::MaxFrequencyDays { days },
            clock: ScheduleClock::LastRunTime,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.kind, ScheduleKind::Disabled)
    }

    /// Compute the next run time.
    ///
    /// Returns `None` for disabled schedules. For anchored schedules a
    /// target already in the past collapses to `now` (fire once,
    /// immediately); with no prior run they return `now` under
    /// `LAST_RUN_TIME` and one interval out under wall clocks.
    pub fn next(
        &self,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match &self.kind {
            ScheduleKind::Disabled => None,
            ScheduleKind::Cron { expr } => {
                let parsed = CronExpr::from_str(expr).ok()?;
                match self.clock {
                    ScheduleClock::Utc => parsed.after(&now).next(),
                    ScheduleClock::Local => {
                        let local = now.with_timezone(&Local);
                        parsed.after(&local).next().map(|t| t.with_timezone(&Utc))
                    }
                    ScheduleClock::LastRunTime => {
                        let anchor = match last_run {
                            Some(last) => last,
                            None => return Some(now),
                        };
                        let target = parsed.after(&anchor).next()?;
                        Some(target.max(now))
                    }
                }
            }
            ScheduleKind::IntervalDays { days } => {
                self.anchored(now, last_run, Duration::days(i64::from(*days)))
            }
            ScheduleKind::IntervalHours { hours } => {
                self.anchored(now, last_run, Duration::hours(i64::from(*hours)))
            }
            ScheduleKind::MaxFrequencyDays { days } => match last_run {
                None => Some(now),
                // Literal policy: now < last + d defers to exactly last + d.
                Some(last) => Some((last + Duration::days(i64::from(*days))).max(now)),
            },
        }
    }

    fn anchored(
        &self,
        now: DateTime<Utc>,
        last_run: Option<DateTime<Utc>>,
        interval: Duration,
    ) -> Option<DateTime<Utc>> {
        match last_run {
            Some(last) => Some((last + interval).max(now)),
            None => match self.clock {
                ScheduleClock::LastRunTime => Some(now),
                _ => Some(now + interval),
            },
        }
    }

    /// Check that the schedule parses (cron syntax, non-zero intervals).
    pub fn check(&self) -> Result<(), String> {
        match &self.kind {
            ScheduleKind::Disabled => Ok(()),
            ScheduleKind::Cron { expr } => CronExpr::from_str(expr)
                .map(|_| ())
                .map_err(|e| format!("invalid cron expression {expr:?}: {e}")),
            ScheduleKind::IntervalDays { days } | ScheduleKind::MaxFrequencyDays { days } => {
                if *days == 0 {
                    Err("interval must be at least one day".to_string())
                } else {
                    Ok(())
                }
            }
            ScheduleKind::IntervalHours { hours } => {
                if *hours == 0 {
                    Err("interval must be at least one hour".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
