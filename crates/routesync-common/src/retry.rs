//! Retry policy for conflicting writes.
//!
//! The policy bounds how many fetch/compute/write rounds an optimistic
//! update may run, and how long to wait between rounds.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff.
///
/// Attempt `n` (1-based) waits `initial_backoff * multiplier^(n-1)` before
/// the next round, capped at `max_backoff`. With `jitter` enabled the wait
/// is drawn uniformly from `[wait / 2, wait]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of write attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt bound and default timings.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A policy that never sleeps. Used by tests that race writers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns true if another attempt is allowed after `attempt` failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter.
    pub fn nominal_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let micros = self.initial_backoff.as_micros() as f64 * factor;
        let capped = micros.min(self.max_backoff.as_micros() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_micros(capped as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Delay before the attempt following `attempt`, with jitter applied.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_backoff(attempt);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let half = nominal / 2;
        rand::thread_rng().gen_range(half..=nominal)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }
}
