//! Job-level retry policies
//!
//! Each job kind carries a fixed backoff schedule and an attempt budget.
//! This is the outer retry layer: the router client performs its own inner
//! transport retries, and only after those are exhausted does a failure
//! reach the schedule here.

use std::time::Duration;

use netbill_shared::JobKind;

/// Backoff schedule for a retryable unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    backoff: &'static [Duration],
}

const ISOLATION_BACKOFF: &[Duration] = &[
    Duration::from_secs(60),
    Duration::from_secs(120),
    Duration::from_secs(240),
];

const RESTORATION_BACKOFF: &[Duration] = &[
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(900),
];

const NOTIFICATION_BACKOFF: &[Duration] = &[
    Duration::from_secs(60),
    Duration::from_secs(300),
    Duration::from_secs(900),
];

impl RetryPolicy {
    pub const fn isolation() -> Self {
        Self {
            max_attempts: 3,
            backoff: ISOLATION_BACKOFF,
        }
    }

    pub const fn restoration() -> Self {
        Self {
            max_attempts: 3,
            backoff: RESTORATION_BACKOFF,
        }
    }

    pub const fn notification() -> Self {
        Self {
            max_attempts: 3,
            backoff: NOTIFICATION_BACKOFF,
        }
    }

    pub fn for_job_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::Isolate => Self::isolation(),
            JobKind::Restore | JobKind::RetryProvisioning => Self::restoration(),
        }
    }

    /// Delay before the next attempt, where `failed_attempts` counts the
    /// attempts already made. Past the end of the schedule the last entry
    /// repeats, but callers stop at `max_attempts` anyway.
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let idx = (failed_attempts.saturating_sub(1) as usize).min(self.backoff.len() - 1);
        self.backoff[idx]
    }

    /// Whether a unit of work with this many failed attempts gets another try
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.max_attempts
    }
}
