// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry backoff policy

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a multiplier and an upper cap.
///
/// `delay(0)` returns the initial delay; each subsequent attempt multiplies
/// it, saturating at `max`. `jittered` adds up to 25% random slack so
/// parallel retries don't thundering-herd a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Policy for notifier HTTP calls: 500ms, 1s, 2s, 4s... capped at 8s.
    pub fn notifier() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }

    /// Policy for re-enqueueing a task whose repo lock was contended.
    pub fn lock_contention() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    /// Deterministic delay for the given 0-based attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(63) as i32);
        let ms = (self.initial.as_millis() as f64 * factor) as u128;
        Duration::from_millis(ms.min(self.max.as_millis()) as u64)
    }

    /// Delay with up to 25% of random jitter added.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let base = self.delay(attempt);
        let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
        (base + Duration::from_millis(jitter_ms)).min(self.max)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
