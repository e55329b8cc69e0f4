//! Lease manager: acquisition, renewal and guarded release of job leases.
//!
//! Leases live entirely in the job record store. Nothing here is shared
//! between dispatchers except through the store itself.

use std::sync::Arc;

use chrono::Duration;
use tracing;

use coursehub_core::result::AppResult;
use coursehub_core::traits::Clock;
use coursehub_core::types::{JobId, LeaseId};
use coursehub_database::store::{JobStore, WriteGuard};
use coursehub_entity::job::JobRecord;

/// A record claimed by this process, together with the lease that guards it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// The record as returned by the claim.
    pub job: JobRecord,
    /// Lease minted for this claim.
    pub lease_id: LeaseId,
}

/// Lease protocol over a [`JobStore`].
#[derive(Debug, Clone)]
pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    lease_duration: Duration,
}

impl LeaseManager {
    /// Create a lease manager granting leases of `lease_duration`.
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, lease_duration: Duration) -> Self {
        Self {
            store,
            clock,
            lease_duration,
        }
    }

    /// Lease lifetime granted on claim and renewal.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Claim the next due job under a freshly minted lease.
    pub async fn acquire(&self) -> AppResult<Option<ClaimedJob>> {
        let lease_id = LeaseId::new();
        let now = self.clock.now();
        let claimed = self
            .store
            .claim_next_due(now, lease_id, self.lease_duration)
            .await?;

        Ok(claimed.map(|job| {
            tracing::debug!(
                job_id = %job.id,
                lease_id = %lease_id,
                expires_at = %(now + self.lease_duration),
                "Lease acquired"
            );
            ClaimedJob { job, lease_id }
        }))
    }

    /// Extend a held lease by a full lease duration from now.
    ///
    /// Returns `false` once the lease is gone: the job was cancelled,
    /// finished, or reclaimed by another dispatcher after expiry.
    pub async fn renew(&self, job_id: JobId, lease_id: LeaseId) -> AppResult<bool> {
        let expires_at = self.clock.now() + self.lease_duration;
        let renewed = self.store.renew_lease(job_id, lease_id, expires_at).await?;
        if renewed {
            tracing::trace!(job_id = %job_id, lease_id = %lease_id, "Lease renewed");
        }
        Ok(renewed)
    }

    /// Whether `lease_id` still holds `job_id` in the store.
    pub async fn is_held(&self, job_id: JobId, lease_id: LeaseId) -> AppResult<bool> {
        Ok(self
            .store
            .get_by_id(job_id)
            .await?
            .is_some_and(|job| job.holds_lease(lease_id)))
    }

    /// Persist `job` only if `lease_id` still holds the stored record.
    pub async fn commit(&self, job: &JobRecord, lease_id: LeaseId) -> AppResult<bool> {
        let written = self.store.save(job, WriteGuard::Lease(lease_id)).await?;
        if !written {
            tracing::debug!(
                job_id = %job.id,
                lease_id = %lease_id,
                "Lease no longer held; write refused"
            );
        }
        Ok(written)
    }
}
