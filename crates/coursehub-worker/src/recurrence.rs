//! Next-run computation for recurring jobs.

use chrono::{DateTime, Utc};

use coursehub_entity::job::{JobRecord, JobSchedule, JobStatus};

/// Advances a recurring job to its next occurrence.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecurrenceCalculator;

impl RecurrenceCalculator {
    /// Record a successful run finishing at `now` and schedule the next one.
    ///
    /// `next_run_at` is derived from the recorded `last_run_at`, never from a
    /// later reading of the clock, and never moves backwards. Returns the new
    /// `next_run_at`, or `None` for one-time jobs.
    pub fn on_success(&self, job: &mut JobRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let JobSchedule::Recurring {
            interval_seconds,
            next_run_at,
            last_run_at,
        } = &mut job.schedule
        else {
            return None;
        };

        *last_run_at = Some(now);
        let next = (now + chrono::Duration::seconds(*interval_seconds as i64)).max(*next_run_at);
        *next_run_at = next;

        job.scheduled_at = next;
        job.retry_count = 0;
        job.error_message = None;
        job.release(JobStatus::Pending, now);
        Some(next)
    }

    /// Abandon the current occurrence after a failure at `now`.
    ///
    /// The series continues one interval later; `last_run_at` is untouched
    /// because nothing succeeded, and the failure detail is kept.
    pub fn skip_occurrence(&self, job: &mut JobRecord, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let JobSchedule::Recurring {
            interval_seconds,
            next_run_at,
            ..
        } = &mut job.schedule
        else {
            return None;
        };

        let next = (now + chrono::Duration::seconds(*interval_seconds as i64)).max(*next_run_at);
        *next_run_at = next;

        job.scheduled_at = next;
        job.retry_count = 0;
        job.release(JobStatus::Pending, now);
        Some(next)
    }
}
