//! Retry scheduling policies.
//!
//! When a failed job still has retry budget left, the manager spawns a retry
//! job and defers its eligibility by the delay a [`RetryScheduler`] computes.
//! Policies are pure functions of the attempt index, so alternative backoff
//! curves can be substituted without touching the manager.
//!
//! # Example
//!
//! ```
//! use jobgraph::retry::{ExponentialRetryScheduler, RetryScheduler};
//! use chrono::TimeDelta;
//!
//! let scheduler =
//!     ExponentialRetryScheduler::new(TimeDelta::seconds(5)).with_max(TimeDelta::seconds(30));
//!
//! assert_eq!(scheduler.schedule_next_retry(0), TimeDelta::seconds(5));
//! assert_eq!(scheduler.schedule_next_retry(1), TimeDelta::seconds(10));
//! assert_eq!(scheduler.schedule_next_retry(2), TimeDelta::seconds(20));
//! assert_eq!(scheduler.schedule_next_retry(3), TimeDelta::seconds(30));
//! ```

use chrono::TimeDelta;
use rand::Rng;

/// Computes the delay before retry attempt `attempt` becomes eligible.
///
/// `attempt` is zero-based: it is the number of retry jobs the original job
/// has already spawned.
pub trait RetryScheduler: Send + Sync {
    fn schedule_next_retry(&self, attempt: u32) -> TimeDelta;
}

/// Exponential backoff: `base * 2^attempt`, optionally clamped and jittered.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRetryScheduler {
    base: TimeDelta,
    max: Option<TimeDelta>,
    jitter: Option<Jitter>,
}

impl ExponentialRetryScheduler {
    pub const fn new(base: TimeDelta) -> Self {
        Self {
            base,
            max: None,
            jitter: None,
        }
    }

    pub const fn with_max(self, max: TimeDelta) -> Self {
        Self {
            max: Some(max),
            ..self
        }
    }

    pub const fn with_jitter(self, jitter: Jitter) -> Self {
        Self {
            jitter: Some(jitter),
            ..self
        }
    }
}

impl Default for ExponentialRetryScheduler {
    /// Five seconds doubling per attempt, capped at one day.
    fn default() -> Self {
        Self::new(TimeDelta::seconds(5)).with_max(TimeDelta::days(1))
    }
}

impl RetryScheduler for ExponentialRetryScheduler {
    fn schedule_next_retry(&self, attempt: u32) -> TimeDelta {
        let factor = 2_i64.checked_pow(attempt).unwrap_or(i64::MAX);
        let mut seconds = self.base.num_seconds().saturating_mul(factor);
        if let Some(max) = self.max {
            seconds = seconds.min(max.num_seconds());
        }
        let delay = TimeDelta::try_seconds(seconds).unwrap_or(TimeDelta::MAX);
        match self.jitter {
            Some(jitter) => jitter.apply(delay),
            None => delay,
        }
    }
}

/// The same delay for every attempt. `ConstantRetryScheduler::immediate()`
/// disables the delay entirely, which is convenient in tests.
#[derive(Debug, Clone, Copy)]
pub struct ConstantRetryScheduler {
    delay: TimeDelta,
}

impl ConstantRetryScheduler {
    pub const fn new(delay: TimeDelta) -> Self {
        Self { delay }
    }

    pub const fn immediate() -> Self {
        Self::new(TimeDelta::zero())
    }
}

impl RetryScheduler for ConstantRetryScheduler {
    fn schedule_next_retry(&self, _attempt: u32) -> TimeDelta {
        self.delay
    }
}

/// A random offset applied to a computed delay.
#[derive(Debug, Clone, Copy)]
pub enum Jitter {
    /// Added uniformly from `-delta ..= delta`.
    Absolute(TimeDelta),
    /// Added as a proportion of the computed delay.
    Relative(f64),
}

impl Jitter {
    fn apply(&self, value: TimeDelta) -> TimeDelta {
        let milliseconds = match self {
            Self::Absolute(delta) => delta.num_milliseconds(),
            Self::Relative(ratio) => (value.num_milliseconds() as f64 * ratio).round() as i64,
        };
        if milliseconds == 0 {
            return value;
        }
        let offset = rand::thread_rng().gen_range(-milliseconds..=milliseconds);
        value + TimeDelta::milliseconds(offset)
    }
}
