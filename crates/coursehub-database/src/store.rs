//! The job record store contract.
//!
//! Every mutation after insert is conditional: a write names the lease or
//! record version it expects to find, and is silently refused when the
//! stored record has moved on. This is what lets any number of dispatchers share
//! one store without further coordination.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use coursehub_core::result::AppResult;
use coursehub_core::types::{JobId, LeaseId};
use coursehub_entity::job::{JobRecord, JobStatus};

/// Precondition a conditional write must satisfy against the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    /// Stored record is `Processing` under this lease.
    Lease(LeaseId),
    /// Stored record is still at this version: nothing claimed or saved it
    /// since it was read.
    Version(i64),
}

impl WriteGuard {
    /// Whether `stored` satisfies the guard.
    pub fn admits(&self, stored: &JobRecord) -> bool {
        match *self {
            Self::Lease(lease_id) => stored.holds_lease(lease_id),
            Self::Version(version) => stored.version == version,
        }
    }
}

impl fmt::Display for WriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lease(lease_id) => write!(f, "lease={lease_id}"),
            Self::Version(version) => write!(f, "version={version}"),
        }
    }
}

/// Durable storage for job records.
#[async_trait]
pub trait JobStore: Send + Sync + fmt::Debug + 'static {
    /// Persist a new record.
    async fn insert(&self, job: &JobRecord) -> AppResult<()>;

    /// Find a record by ID.
    async fn get_by_id(&self, id: JobId) -> AppResult<Option<JobRecord>>;

    /// All records sharing `job_name`, oldest first.
    async fn get_by_name(&self, job_name: &str) -> AppResult<Vec<JobRecord>>;

    /// Atomically claim the earliest claimable record.
    ///
    /// A record is claimable when it is `Pending` with `scheduled_at <= now`,
    /// or `Processing` with a lease that expired before `now`. The claimed
    /// record is returned already `Processing` under `lease_id`, with
    /// `lease.expires_at = now + lease_duration`, `started_at = now` and its
    /// version bumped.
    /// Concurrent callers never receive the same record.
    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        lease_id: LeaseId,
        lease_duration: Duration,
    ) -> AppResult<Option<JobRecord>>;

    /// Overwrite the stored record with `job` if `guard` admits it.
    ///
    /// Returns `false`, writing nothing, when the guard is not satisfied.
    /// A successful write stores `version + 1` of the record it replaced.
    async fn save(&self, job: &JobRecord, guard: WriteGuard) -> AppResult<bool>;

    /// Push the lease deadline to `expires_at` while `lease_id` still holds the record.
    ///
    /// Leaves the version untouched.
    async fn renew_lease(
        &self,
        id: JobId,
        lease_id: LeaseId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Number of records in `status`.
    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64>;
}
