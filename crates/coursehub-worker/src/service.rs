//! Job service: the facade the rest of the platform enqueues and inspects jobs through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing;

use coursehub_core::config::WorkerConfig;
use coursehub_core::error::AppError;
use coursehub_core::result::AppResult;
use coursehub_core::traits::Clock;
use coursehub_core::types::{JobId, LeaseId};
use coursehub_database::store::{JobStore, WriteGuard};
use coursehub_entity::job::{JobRecord, JobSchedule, JobStatus, NewJob};

use crate::lease::LeaseManager;
use crate::recurrence::RecurrenceCalculator;
use crate::registry::HandlerRegistry;
use crate::retry::{FailureOutcome, JobFailure, RetryPolicy};

/// Longest accepted recurrence interval (ten years).
const MAX_INTERVAL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Parameters for creating a new job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobCreateParams {
    /// Handler type; must be registered.
    pub handler_type: String,
    /// Grouping key; defaults to the handler type for one-time jobs.
    pub job_name: Option<String>,
    /// Handler argument; defaults to JSON `null`.
    pub payload: Option<Value>,
    /// First eligible run; defaults to now.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Retry budget per occurrence; defaults to `worker.default_max_retries`.
    pub max_retries: Option<u32>,
    /// Recurrence period; `None` for one-time jobs.
    pub interval_seconds: Option<u64>,
}

/// Counts of job records per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting to run.
    pub pending: u64,
    /// Currently leased.
    pub processing: u64,
    /// One-time jobs that succeeded.
    pub completed: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Cancelled jobs.
    pub cancelled: u64,
}

/// Validated entry point over the job record store.
///
/// Also exposes the state transitions the dispatcher applies, so external
/// orchestration can reuse them instead of writing records directly.
#[derive(Debug)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    leases: LeaseManager,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    default_max_retries: u32,
}

impl JobService {
    /// Create a job service.
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
    ) -> Self {
        let leases = LeaseManager::new(Arc::clone(&store), Arc::clone(&clock), config.lease_duration());
        Self {
            store,
            registry,
            leases,
            retry: RetryPolicy::from_config(config),
            clock,
            default_max_retries: config.default_max_retries,
        }
    }

    /// Lease manager sharing this service's store and clock.
    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Handler registry used for validation.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Clock used for every transition.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Enqueue a one-time job.
    pub async fn add_job(
        &self,
        handler_type: &str,
        payload: Option<Value>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> AppResult<JobRecord> {
        self.enqueue(JobCreateParams {
            handler_type: handler_type.to_string(),
            payload,
            scheduled_at,
            ..JobCreateParams::default()
        })
        .await
    }

    /// Enqueue a recurring job running every `interval_seconds`, first at `start_at` (default now).
    pub async fn add_recurring_job(
        &self,
        handler_type: &str,
        job_name: &str,
        interval_seconds: u64,
        payload: Option<Value>,
        start_at: Option<DateTime<Utc>>,
    ) -> AppResult<JobRecord> {
        self.enqueue(JobCreateParams {
            handler_type: handler_type.to_string(),
            job_name: Some(job_name.to_string()),
            payload,
            scheduled_at: start_at,
            interval_seconds: Some(interval_seconds),
            ..JobCreateParams::default()
        })
        .await
    }

    /// Validate and persist a new job.
    pub async fn enqueue(&self, params: JobCreateParams) -> AppResult<JobRecord> {
        self.validate(&params)?;

        let now = self.clock.now();
        let job_name = match params.job_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => params.handler_type.clone(),
        };
        let job = NewJob {
            handler_type: params.handler_type,
            job_name,
            payload: params.payload.unwrap_or(Value::Null),
            scheduled_at: params.scheduled_at.unwrap_or(now),
            max_retries: params.max_retries.unwrap_or(self.default_max_retries),
            interval_seconds: params.interval_seconds,
        }
        .into_record(now);

        self.store.insert(&job).await?;

        tracing::info!(
            job_id = %job.id,
            handler_type = %job.handler_type,
            job_name = %job.job_name,
            kind = %job.kind(),
            scheduled_at = %job.scheduled_at,
            "Enqueued job"
        );
        Ok(job)
    }

    fn validate(&self, params: &JobCreateParams) -> AppResult<()> {
        if params.handler_type.trim().is_empty() {
            return Err(AppError::validation("Handler type must not be empty"));
        }
        if !self.registry.contains(&params.handler_type) {
            return Err(AppError::validation(format!(
                "No handler registered for type '{}'",
                params.handler_type
            )));
        }
        if let Some(max_retries) = params.max_retries {
            if max_retries > i32::MAX as u32 {
                return Err(AppError::validation("max_retries is out of range"));
            }
        }
        if let Some(interval) = params.interval_seconds {
            if interval == 0 {
                return Err(AppError::validation("Recurring interval must be positive"));
            }
            if interval > MAX_INTERVAL_SECONDS {
                return Err(AppError::validation(format!(
                    "Recurring interval {interval}s exceeds the maximum of {MAX_INTERVAL_SECONDS}s"
                )));
            }
            if params
                .job_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
            {
                return Err(AppError::validation("Recurring jobs require a job name"));
            }
        }
        Ok(())
    }

    /// Look up a job by ID.
    pub async fn get_job_by_id(&self, id: JobId) -> AppResult<Option<JobRecord>> {
        self.store.get_by_id(id).await
    }

    /// All jobs sharing `job_name`, oldest first.
    pub async fn get_jobs_by_name(&self, job_name: &str) -> AppResult<Vec<JobRecord>> {
        self.store.get_by_name(job_name).await
    }

    async fn require(&self, id: JobId) -> AppResult<JobRecord> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))
    }

    /// Cancel a pending job.
    ///
    /// Returns `false` without writing when the job is processing or
    /// already terminal.
    pub async fn cancel_job(&self, id: JobId) -> AppResult<bool> {
        let job = self.require(id).await?;
        self.cancel_pending(job).await
    }

    /// Cancel the pending recurring job(s) named `job_name`.
    ///
    /// Returns `false` if none was pending.
    pub async fn cancel_recurring_job(&self, job_name: &str) -> AppResult<bool> {
        let recurring: Vec<JobRecord> = self
            .store
            .get_by_name(job_name)
            .await?
            .into_iter()
            .filter(JobRecord::is_recurring)
            .collect();

        if recurring.is_empty() {
            return Err(AppError::not_found(format!(
                "No recurring job named '{job_name}'"
            )));
        }

        let mut cancelled = false;
        for job in recurring {
            cancelled |= self.cancel_pending(job).await?;
        }
        Ok(cancelled)
    }

    async fn cancel_pending(&self, mut job: JobRecord) -> AppResult<bool> {
        if job.status != JobStatus::Pending {
            tracing::debug!(job_id = %job.id, status = %job.status, "Job not cancellable");
            return Ok(false);
        }

        let read_version = job.version;
        job.release(JobStatus::Cancelled, self.clock.now());
        let cancelled = self
            .store
            .save(&job, WriteGuard::Version(read_version))
            .await?;
        if cancelled {
            tracing::info!(job_id = %job.id, job_name = %job.job_name, "Job cancelled");
        }
        Ok(cancelled)
    }

    /// Compare-and-swap the status of a job from `expected` to `status`.
    ///
    /// Leaving `Processing` drops the lease, so forcing `Processing → Cancelled`
    /// makes the holding dispatcher discard its result. `Processing` itself
    /// can only be entered through a claim.
    ///
    /// `Completed` and `Cancelled` are final. A `Failed` one-time job can only
    /// go back to `Pending`, with a fresh retry budget, due immediately.
    pub async fn update_job_status(
        &self,
        id: JobId,
        expected: JobStatus,
        status: JobStatus,
    ) -> AppResult<bool> {
        if status == JobStatus::Processing {
            return Err(AppError::validation(
                "Jobs enter processing only through a dispatcher claim",
            ));
        }
        if status == expected {
            return Err(AppError::validation(format!("Job is already {status}")));
        }
        if matches!(expected, JobStatus::Completed | JobStatus::Cancelled) {
            return Err(AppError::validation(format!(
                "A {expected} job cannot change status"
            )));
        }
        if expected == JobStatus::Failed && status != JobStatus::Pending {
            return Err(AppError::validation(
                "A failed job can only be moved back to pending",
            ));
        }

        let mut job = self.require(id).await?;
        if job.status != expected {
            return Ok(false);
        }
        if expected == JobStatus::Failed && job.is_recurring() {
            return Err(AppError::validation(
                "A failed recurring job cannot be revived; enqueue it again",
            ));
        }
        let read_version = job.version;

        let now = self.clock.now();
        match status {
            JobStatus::Pending => {
                job.retry_count = 0;
                job.scheduled_at = now;
                if let JobSchedule::Recurring { next_run_at, .. } = &mut job.schedule {
                    *next_run_at = now;
                }
            }
            JobStatus::Completed => {
                if job.is_recurring() {
                    return Err(AppError::validation(
                        "Recurring jobs have no completed state; cancel them instead",
                    ));
                }
                job.completed_at = Some(now);
            }
            _ => {}
        }
        job.release(status, now);

        let updated = self.store.save(&job, WriteGuard::Version(read_version)).await?;
        if updated {
            tracing::info!(job_id = %id, from = %expected, to = %status, "Job status updated");
        }
        Ok(updated)
    }

    /// Re-queue a failed job with a fresh retry budget.
    pub async fn retry_job(&self, id: JobId) -> AppResult<bool> {
        self.update_job_status(id, JobStatus::Failed, JobStatus::Pending)
            .await
    }

    /// Mark a claimed one-time job completed.
    ///
    /// Returns `false`, writing nothing, if `lease_id` no longer holds the
    /// job; in particular a second call for the same lease is a no-op.
    pub async fn mark_job_completed(&self, id: JobId, lease_id: LeaseId) -> AppResult<bool> {
        let mut job = self.require(id).await?;
        if !job.holds_lease(lease_id) {
            return Ok(false);
        }
        if job.is_recurring() {
            return Err(AppError::validation(
                "Recurring jobs are rescheduled with schedule_next_run, not completed",
            ));
        }

        let now = self.clock.now();
        job.completed_at = Some(now);
        job.error_message = None;
        job.release(JobStatus::Completed, now);
        self.leases.commit(&job, lease_id).await
    }

    /// Route a failed execution of a claimed job through the retry policy.
    pub async fn mark_job_failed(
        &self,
        id: JobId,
        lease_id: LeaseId,
        failure: JobFailure,
    ) -> AppResult<FailureOutcome> {
        let mut job = self.require(id).await?;
        if !job.holds_lease(lease_id) {
            return Ok(FailureOutcome::Stale);
        }

        let outcome = self.retry.on_failure(&mut job, &failure, self.clock.now());
        if self.leases.commit(&job, lease_id).await? {
            Ok(outcome)
        } else {
            Ok(FailureOutcome::Stale)
        }
    }

    /// Record a successful run of a claimed recurring job and schedule its next occurrence.
    ///
    /// Returns the new `next_run_at`, or `None` if the lease was lost.
    pub async fn schedule_next_run(
        &self,
        id: JobId,
        lease_id: LeaseId,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let mut job = self.require(id).await?;
        if !job.holds_lease(lease_id) {
            return Ok(None);
        }

        let Some(next_run_at) = RecurrenceCalculator.on_success(&mut job, self.clock.now()) else {
            return Err(AppError::validation(format!(
                "Job {id} is not recurring"
            )));
        };

        if self.leases.commit(&job, lease_id).await? {
            Ok(Some(next_run_at))
        } else {
            Ok(None)
        }
    }

    /// Counts of records per status.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        Ok(QueueStats {
            pending: self.store.count_by_status(JobStatus::Pending).await?,
            processing: self.store.count_by_status(JobStatus::Processing).await?,
            completed: self.store.count_by_status(JobStatus::Completed).await?,
            failed: self.store.count_by_status(JobStatus::Failed).await?,
            cancelled: self.store.count_by_status(JobStatus::Cancelled).await?,
        })
    }
}
