//! Retry policy: what happens to a job after a failed execution.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use coursehub_core::config::WorkerConfig;
use coursehub_entity::job::{JobRecord, JobStatus};

use crate::recurrence::RecurrenceCalculator;
use crate::registry::HandlerError;

/// Why an execution failed, as seen by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    /// Handler failed; attempts may remain.
    #[error("{0}")]
    Retryable(String),
    /// Handler declared the occurrence unrecoverable.
    #[error("{0}")]
    Permanent(String),
    /// The job itself cannot run (e.g. no handler registered); ends the record.
    #[error("{0}")]
    Fatal(String),
}

impl From<HandlerError> for JobFailure {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Transient(reason) => Self::Retryable(reason),
            HandlerError::Permanent(reason) => Self::Permanent(reason),
        }
    }
}

/// Result of routing a failure through the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Back to `Pending`, eligible again at `scheduled_at`.
    Retrying {
        /// Retries consumed so far, including this one.
        retry_count: u32,
        /// When the retry becomes due.
        scheduled_at: DateTime<Utc>,
    },
    /// Terminal `Failed`.
    Failed,
    /// Recurring job gave up on this occurrence; the series resumes at `next_run_at`.
    NextOccurrence {
        /// Start of the next occurrence.
        next_run_at: DateTime<Utc>,
    },
    /// The caller no longer held the lease; nothing was written.
    Stale,
}

/// Bounded retries with capped exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with explicit delays.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Build the policy from worker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.retry_base_delay(), config.retry_max_delay())
    }

    /// Delay before retry number `retry_count` (1-based): `base * 2^(retry_count - 1)`, capped.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = 1i32.checked_shl(exponent).filter(|f| *f > 0);
        match factor.and_then(|f| self.base_delay.checked_mul(f)) {
            Some(delay) if delay < self.max_delay => delay,
            _ => self.max_delay,
        }
    }

    /// Apply a failure observed at `now` to a claimed record.
    ///
    /// `retry_count` only grows while it is below `max_retries`, so it never
    /// exceeds the budget. The lease is dropped in every branch.
    pub fn on_failure(
        &self,
        job: &mut JobRecord,
        failure: &JobFailure,
        now: DateTime<Utc>,
    ) -> FailureOutcome {
        job.error_message = Some(failure.to_string());

        match failure {
            JobFailure::Retryable(_) if job.retry_count < job.max_retries => {
                job.retry_count += 1;
                let scheduled_at = now + self.backoff(job.retry_count);
                job.scheduled_at = scheduled_at;
                job.release(JobStatus::Pending, now);
                FailureOutcome::Retrying {
                    retry_count: job.retry_count,
                    scheduled_at,
                }
            }
            JobFailure::Fatal(_) => {
                job.release(JobStatus::Failed, now);
                FailureOutcome::Failed
            }
            _ => match RecurrenceCalculator.skip_occurrence(job, now) {
                Some(next_run_at) => FailureOutcome::NextOccurrence { next_run_at },
                None => {
                    job.release(JobStatus::Failed, now);
                    FailureOutcome::Failed
                }
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}
