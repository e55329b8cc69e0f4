//! In-process job record store.
//!
//! A single write lock around the record map makes `claim_next_due` atomic
//! for every dispatcher sharing the same `MemoryJobStore` instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use coursehub_core::error::AppError;
use coursehub_core::result::AppResult;
use coursehub_core::types::{JobId, LeaseId};
use coursehub_entity::job::{JobRecord, JobStatus};

use crate::store::{JobStore, WriteGuard};

/// Job record store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    records: Arc<RwLock<HashMap<JobId, JobRecord>>>,
}

impl MemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &JobRecord) -> AppResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&job.id) {
            return Err(AppError::conflict(format!("Job {} already exists", job.id)));
        }
        records.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: JobId) -> AppResult<Option<JobRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn get_by_name(&self, job_name: &str) -> AppResult<Vec<JobRecord>> {
        let records = self.records.read().await;
        let mut jobs: Vec<JobRecord> = records
            .values()
            .filter(|job| job.job_name == job_name)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        lease_id: LeaseId,
        lease_duration: Duration,
    ) -> AppResult<Option<JobRecord>> {
        let mut records = self.records.write().await;

        let Some(job) = records
            .values_mut()
            .filter(|job| job.is_claimable(now))
            .min_by_key(|job| (job.scheduled_at, job.created_at))
        else {
            return Ok(None);
        };

        if job.status == JobStatus::Processing {
            debug!(job_id = %job.id, "Reclaiming job with expired lease");
        }
        job.claim(lease_id, now + lease_duration, now);
        job.version += 1;
        Ok(Some(job.clone()))
    }

    async fn save(&self, job: &JobRecord, guard: WriteGuard) -> AppResult<bool> {
        let mut records = self.records.write().await;
        let Some(stored) = records.get_mut(&job.id) else {
            return Err(AppError::not_found(format!("Job {} not found", job.id)));
        };

        if !guard.admits(stored) {
            return Ok(false);
        }
        let version = stored.version + 1;
        *stored = job.clone();
        stored.version = version;
        Ok(true)
    }

    async fn renew_lease(
        &self,
        id: JobId,
        lease_id: LeaseId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(job) if job.holds_lease(lease_id) => {
                if let Some(lease) = job.lease.as_mut() {
                    lease.expires_at = expires_at;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64> {
        let records = self.records.read().await;
        Ok(records.values().filter(|job| job.status == status).count() as u64)
    }
}
