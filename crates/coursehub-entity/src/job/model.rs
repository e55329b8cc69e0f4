//! Job record entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use coursehub_core::types::{JobId, LeaseId};

use super::status::{JobKind, JobStatus};

/// Exclusive, time-bounded claim on a job record.
///
/// Present on a record if and only if its status is [`JobStatus::Processing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Identifier minted by the claiming dispatcher.
    pub id: LeaseId,
    /// Instant after which other dispatchers may reclaim the record.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// How a job is scheduled, with the recurrence bookkeeping recurring jobs carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSchedule {
    /// Runs once.
    OneTime,
    /// Runs every `interval_seconds`.
    Recurring {
        /// Period between occurrences.
        interval_seconds: u64,
        /// Nominal start of the current (or next) occurrence.
        next_run_at: DateTime<Utc>,
        /// When the last successful occurrence finished.
        last_run_at: Option<DateTime<Utc>>,
    },
}

impl JobSchedule {
    /// The [`JobKind`] this schedule represents.
    pub fn kind(&self) -> JobKind {
        match self {
            Self::OneTime => JobKind::OneTime,
            Self::Recurring { .. } => JobKind::Recurring,
        }
    }
}

/// A persisted background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier.
    pub id: JobId,
    /// Grouping key; recurring jobs are looked up by it.
    pub job_name: String,
    /// Identifier resolved through the handler registry.
    pub handler_type: String,
    /// Opaque handler argument, passed through untouched.
    pub payload: serde_json::Value,
    /// One-time or recurring, plus recurrence state.
    pub schedule: JobSchedule,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Earliest instant the job may be claimed.
    pub scheduled_at: DateTime<Utc>,
    /// When the current or last attempt was claimed.
    pub started_at: Option<DateTime<Utc>>,
    /// When a one-time job completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// Failed attempts of the current occurrence.
    pub retry_count: u32,
    /// Retry budget per occurrence.
    pub max_retries: u32,
    /// Most recent failure detail.
    pub error_message: Option<String>,
    /// Mutual-exclusion lease, held only while processing.
    pub lease: Option<Lease>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
    /// Write counter maintained by the store; bumped on every claim and save.
    pub version: i64,
}

impl JobRecord {
    /// The job's kind.
    pub fn kind(&self) -> JobKind {
        self.schedule.kind()
    }

    /// Whether this is a recurring job.
    pub fn is_recurring(&self) -> bool {
        self.kind() == JobKind::Recurring
    }

    /// Recurrence period, for recurring jobs.
    pub fn interval(&self) -> Option<Duration> {
        match self.schedule {
            JobSchedule::Recurring {
                interval_seconds, ..
            } => Some(Duration::seconds(interval_seconds as i64)),
            JobSchedule::OneTime => None,
        }
    }

    /// Next nominal run, for recurring jobs.
    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        match self.schedule {
            JobSchedule::Recurring { next_run_at, .. } => Some(next_run_at),
            JobSchedule::OneTime => None,
        }
    }

    /// Last successful run, for recurring jobs that have run.
    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        match self.schedule {
            JobSchedule::Recurring { last_run_at, .. } => last_run_at,
            JobSchedule::OneTime => None,
        }
    }

    /// Whether `claim_next_due` may hand this record out at `now`.
    ///
    /// Either it is pending and due, or a previous holder's lease lapsed.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => self.scheduled_at <= now,
            JobStatus::Processing => self.lease.is_none_or(|lease| lease.is_expired(now)),
            _ => false,
        }
    }

    /// Whether `lease_id` is the lease currently attached to a processing record.
    pub fn holds_lease(&self, lease_id: LeaseId) -> bool {
        self.status == JobStatus::Processing && self.lease.is_some_and(|lease| lease.id == lease_id)
    }

    /// Move into `Processing` under a new lease.
    pub fn claim(&mut self, lease_id: LeaseId, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.lease = Some(Lease {
            id: lease_id,
            expires_at,
        });
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Leave `Processing` for `status`, dropping the lease.
    pub fn release(&mut self, status: JobStatus, now: DateTime<Utc>) {
        debug_assert_ne!(status, JobStatus::Processing);
        self.status = status;
        self.lease = None;
        self.updated_at = now;
    }
}

/// Data required to create a new job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Handler type identifier.
    pub handler_type: String,
    /// Grouping key.
    pub job_name: String,
    /// Handler argument.
    pub payload: serde_json::Value,
    /// First eligible run time.
    pub scheduled_at: DateTime<Utc>,
    /// Retry budget per occurrence.
    pub max_retries: u32,
    /// Recurrence period; `None` for one-time jobs.
    pub interval_seconds: Option<u64>,
}

impl NewJob {
    /// Build the initial `Pending` record.
    pub fn into_record(self, now: DateTime<Utc>) -> JobRecord {
        let schedule = match self.interval_seconds {
            Some(interval_seconds) => JobSchedule::Recurring {
                interval_seconds,
                next_run_at: self.scheduled_at,
                last_run_at: None,
            },
            None => JobSchedule::OneTime,
        };

        JobRecord {
            id: JobId::new(),
            job_name: self.job_name,
            handler_type: self.handler_type,
            payload: self.payload,
            schedule,
            status: JobStatus::Pending,
            scheduled_at: self.scheduled_at,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: self.max_retries,
            error_message: None,
            lease: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}
