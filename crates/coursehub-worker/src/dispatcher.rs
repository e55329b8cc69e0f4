//! Dispatcher: polls the store for due jobs and runs them under a lease.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing;
use uuid::Uuid;

use coursehub_core::config::WorkerConfig;
use coursehub_core::traits::Clock;
use coursehub_core::types::{JobId, LeaseId};
use coursehub_entity::job::JobRecord;

use crate::lease::{ClaimedJob, LeaseManager};
use crate::registry::{HandlerError, JobHandler};
use crate::retry::{FailureOutcome, JobFailure};
use crate::service::JobService;

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A job was claimed and handed to a worker task.
    Claimed(JobId),
    /// Nothing is due.
    Idle,
    /// Every worker slot is busy; nothing was claimed.
    Saturated,
    /// The store could not be reached; nothing was claimed.
    StoreUnavailable,
}

/// Polling dispatcher with a bounded pool of worker tasks.
///
/// Any number of dispatchers, in one process or many, may share a store.
/// Claims are exclusive and every write back is guarded by the claim's lease.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Dispatcher identifier for logs
    dispatcher_id: String,
    /// Job service applying state transitions
    service: Arc<JobService>,
    /// Worker configuration
    config: WorkerConfig,
    /// One permit per worker slot
    slots: Arc<Semaphore>,
    /// Parent of every handler's cancellation token
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher with `config.concurrency` worker slots.
    pub fn new(service: Arc<JobService>, config: WorkerConfig) -> Self {
        let dispatcher_id = format!("dispatcher-{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self {
            dispatcher_id,
            slots: Arc::new(Semaphore::new(config.concurrency)),
            service,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Identifier used in this dispatcher's log lines.
    pub fn id(&self) -> &str {
        &self.dispatcher_id
    }

    /// Number of handlers currently running.
    pub fn in_flight(&self) -> usize {
        self.config
            .concurrency
            .saturating_sub(self.slots.available_permits())
    }

    /// Run until `shutdown` flips to `true`, then drain in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Dispatcher '{}' started with concurrency={}, poll_interval={}s, lease={}s",
            self.dispatcher_id,
            self.config.concurrency,
            self.config.poll_interval_seconds,
            self.config.lease_duration_seconds
        );

        'poll: loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                PollOutcome::Claimed(_) => continue,
                PollOutcome::Saturated => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break 'poll;
                            }
                        }
                        permit = self.slots.acquire() => drop(permit),
                    }
                    continue;
                }
                PollOutcome::Idle | PollOutcome::StoreUnavailable => {}
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = time::sleep(self.config.poll_interval()) => {}
            }
        }

        tracing::info!(
            "Dispatcher '{}' received shutdown signal, waiting for {} in-flight job(s)",
            self.dispatcher_id,
            self.in_flight()
        );

        if !self.wait_idle(self.config.shutdown_timeout()).await {
            tracing::warn!(
                "Dispatcher '{}' shutdown timed out with {} job(s) still running; cancelling them",
                self.dispatcher_id,
                self.in_flight()
            );
            self.shutdown.cancel();
        }

        tracing::info!("Dispatcher '{}' shut down complete", self.dispatcher_id);
    }

    /// Wait until no handler is running, up to `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let total = self.config.concurrency as u32;
        matches!(
            time::timeout(timeout, self.slots.acquire_many(total)).await,
            Ok(Ok(_))
        )
    }

    /// Claim at most one due job and start it on a worker task.
    pub async fn poll_once(&self) -> PollOutcome {
        let permit = match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::trace!("All worker slots occupied, waiting...");
                return PollOutcome::Saturated;
            }
        };

        match self.service.leases().acquire().await {
            Ok(Some(claimed)) => {
                let job_id = claimed.job.id;
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    dispatcher.process(claimed, permit).await;
                });
                PollOutcome::Claimed(job_id)
            }
            Ok(None) => {
                tracing::trace!("No jobs due");
                PollOutcome::Idle
            }
            Err(e) => {
                tracing::error!("Dispatcher '{}' failed to claim a job: {}", self.dispatcher_id, e);
                PollOutcome::StoreUnavailable
            }
        }
    }

    /// Execute a claimed job and record its outcome. Holds a worker slot throughout.
    async fn process(&self, claimed: ClaimedJob, _permit: OwnedSemaphorePermit) {
        let ClaimedJob { job, lease_id } = claimed;
        let leases = self.service.leases();

        tracing::info!(
            "Processing job: id={}, type='{}', name='{}', attempt={}/{}",
            job.id,
            job.handler_type,
            job.job_name,
            job.retry_count + 1,
            job.max_retries + 1
        );

        let Some(handler) = self.service.registry().resolve(&job.handler_type) else {
            let reason = format!("No handler registered for job type '{}'", job.handler_type);
            tracing::error!("Job {} cannot run: {}", job.id, reason);
            self.record_failure(&job, lease_id, JobFailure::Fatal(reason))
                .await;
            return;
        };

        match leases.is_held(job.id, lease_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("Lease on job {} lost before execution; skipping", job.id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to verify lease on job {}: {}", job.id, e);
                return;
            }
        }

        let cancel = self.shutdown.child_token();
        let clock = Arc::clone(self.service.clock());
        let deadline = job
            .lease
            .map_or_else(|| clock.now() + leases.lease_duration(), |lease| lease.expires_at);
        let heartbeat = tokio::spawn(heartbeat(
            leases.clone(),
            clock,
            job.id,
            lease_id,
            deadline,
            self.config.lease_renewal_interval(),
            cancel.clone(),
        ));

        let result = run_handler(handler, job.payload.clone(), cancel.clone()).await;

        heartbeat.abort();
        if cancel.is_cancelled() {
            tracing::info!("Job {} was interrupted while running", job.id);
        }

        match result {
            Ok(()) => self.record_success(&job, lease_id).await,
            Err(err) => {
                match err {
                    HandlerError::Transient(_) => {
                        tracing::warn!("Job {} failed (transient): {}", job.id, err.reason())
                    }
                    HandlerError::Permanent(_) => {
                        tracing::error!("Job {} failed permanently: {}", job.id, err.reason())
                    }
                }
                self.record_failure(&job, lease_id, err.into()).await;
            }
        }
    }

    async fn record_success(&self, job: &JobRecord, lease_id: LeaseId) {
        if job.is_recurring() {
            match self.service.schedule_next_run(job.id, lease_id).await {
                Ok(Some(next_run_at)) => tracing::info!(
                    "Recurring job {} ('{}') succeeded; next run at {}",
                    job.id,
                    job.job_name,
                    next_run_at
                ),
                Ok(None) => tracing::warn!(
                    "Recurring job {} finished after losing its lease; result discarded",
                    job.id
                ),
                Err(e) => tracing::error!("Failed to schedule next run of job {}: {}", job.id, e),
            }
        } else {
            match self.service.mark_job_completed(job.id, lease_id).await {
                Ok(true) => tracing::info!("Job {} completed successfully", job.id),
                Ok(false) => tracing::warn!(
                    "Job {} finished after losing its lease; result discarded",
                    job.id
                ),
                Err(e) => tracing::error!("Failed to mark job {} as completed: {}", job.id, e),
            }
        }
    }

    async fn record_failure(&self, job: &JobRecord, lease_id: LeaseId, failure: JobFailure) {
        match self.service.mark_job_failed(job.id, lease_id, failure).await {
            Ok(FailureOutcome::Retrying {
                retry_count,
                scheduled_at,
            }) => tracing::info!(
                "Job {} scheduled for retry {}/{} at {}",
                job.id,
                retry_count,
                job.max_retries,
                scheduled_at
            ),
            Ok(FailureOutcome::Failed) => tracing::error!("Job {} marked as failed", job.id),
            Ok(FailureOutcome::NextOccurrence { next_run_at }) => tracing::warn!(
                "Recurring job {} ('{}') gave up on this run; next run at {}",
                job.id,
                job.job_name,
                next_run_at
            ),
            Ok(FailureOutcome::Stale) => tracing::warn!(
                "Job {} failed after losing its lease; result discarded",
                job.id
            ),
            Err(e) => tracing::error!("Failed to record failure of job {}: {}", job.id, e),
        }
    }
}

/// Run a handler on its own task so a panic is reported instead of unwinding the worker.
async fn run_handler(
    handler: Arc<dyn JobHandler>,
    payload: Value,
    cancel: CancellationToken,
) -> Result<(), HandlerError> {
    let task = tokio::spawn(async move { handler.execute(&payload, cancel).await });
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let panic = e.into_panic();
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HandlerError::transient(format!("Handler panicked: {msg}")))
        }
        Err(_) => Err(HandlerError::transient("Handler task was cancelled")),
    }
}

/// Renew the lease every `every` until cancelled.
///
/// Cancels the handler once renewal is refused, or once `deadline` passes
/// without a successful renewal, since another dispatcher may reclaim the
/// job from then on.
async fn heartbeat(
    leases: LeaseManager,
    clock: Arc<dyn Clock>,
    job_id: JobId,
    lease_id: LeaseId,
    mut deadline: DateTime<Utc>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let attempted_at = clock.now();
        match leases.renew(job_id, lease_id).await {
            Ok(true) => deadline = attempted_at + leases.lease_duration(),
            Ok(false) => {
                tracing::warn!("Lease on job {} is no longer held; cancelling handler", job_id);
                cancel.cancel();
                return;
            }
            Err(e) if clock.now() >= deadline => {
                tracing::error!(
                    "Lease on job {} expired at {} without renewal ({}); cancelling handler",
                    job_id,
                    deadline,
                    e
                );
                cancel.cancel();
                return;
            }
            Err(e) => tracing::warn!("Failed to renew lease on job {}: {}", job_id, e),
        }
    }
}
