//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use coursehub_core::config::WorkerConfig;
use coursehub_core::error::AppError;
use coursehub_core::result::AppResult;
use coursehub_core::traits::{Clock, ManualClock};
use coursehub_core::types::{JobId, LeaseId};
use coursehub_database::{JobStore, MemoryJobStore, WriteGuard};
use coursehub_entity::job::{JobRecord, JobStatus};
use coursehub_worker::{Dispatcher, HandlerError, HandlerRegistry, JobHandler, JobService, PollOutcome};

/// Handler types registered by [`TestApp::new`].
pub const RECORD: &str = "record";
pub const FAIL: &str = "always_fail";
pub const REJECT: &str = "reject";
pub const PANIC: &str = "panic";
pub const GATE: &str = "gate";

/// Test scheduler context
pub struct TestApp {
    /// Shared record store
    pub store: Arc<FlakyStore>,
    /// Clock every component reads
    pub clock: ManualClock,
    /// Job service over `store`
    pub service: Arc<JobService>,
    /// Worker configuration
    pub config: WorkerConfig,
    /// Succeeds and records each payload it sees
    pub recorder: Recorder,
    /// Blocks until released or cancelled
    pub gate: Gate,
    /// Runs of the always-failing handler
    pub failures: Arc<AtomicUsize>,
}

impl TestApp {
    /// Create a test application with default worker settings
    pub fn new() -> Self {
        Self::with_config(WorkerConfig::default())
    }

    /// Create a test application with custom worker settings
    pub fn with_config(config: WorkerConfig) -> Self {
        let clock = ManualClock::new(Utc::now());
        let store = Arc::new(FlakyStore::default());
        let recorder = Recorder::default();
        let gate = Gate::default();
        let failures = Arc::new(AtomicUsize::new(0));

        let mut registry = HandlerRegistry::new();
        let r = recorder.clone();
        registry.register(RECORD, move || r.clone());
        let g = gate.clone();
        registry.register(GATE, move || g.clone());
        let f = Arc::clone(&failures);
        registry.register(FAIL, move || AlwaysFail {
            runs: Arc::clone(&f),
        });
        registry.register(REJECT, || Reject);
        registry.register(PANIC, || Panics);

        let service = Arc::new(JobService::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(clock.clone()),
            &config,
        ));

        Self {
            store,
            clock,
            service,
            config,
            recorder,
            gate,
            failures,
        }
    }

    /// A new dispatcher instance sharing this app's store
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(Arc::clone(&self.service), self.config.clone())
    }

    /// A job service with its own lease manager over the same store and clock
    pub fn second_service(&self) -> Arc<JobService> {
        Arc::new(JobService::new(
            self.store.clone(),
            Arc::clone(self.service.registry()),
            Arc::new(self.clock.clone()),
            &self.config,
        ))
    }

    /// Poll once and wait for the claimed job (if any) to finish
    pub async fn tick(&self, dispatcher: &Dispatcher) -> PollOutcome {
        let outcome = dispatcher.poll_once().await;
        assert!(
            dispatcher.wait_idle(Duration::from_secs(5)).await,
            "dispatcher did not go idle"
        );
        outcome
    }

    /// Current stored state of a job
    pub async fn job(&self, id: JobId) -> JobRecord {
        self.service
            .get_job_by_id(id)
            .await
            .expect("store reachable")
            .expect("job exists")
    }

    /// Now, as seen by the scheduler
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Memory store that can be switched off to simulate an outage
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryJobStore,
    down: AtomicBool,
}

impl FlakyStore {
    /// Make every call fail until [`FlakyStore::recover`]
    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    /// Serve calls again
    pub fn recover(&self) {
        self.down.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(AppError::database("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn insert(&self, job: &JobRecord) -> AppResult<()> {
        self.check()?;
        self.inner.insert(job).await
    }

    async fn get_by_id(&self, id: JobId) -> AppResult<Option<JobRecord>> {
        self.check()?;
        self.inner.get_by_id(id).await
    }

    async fn get_by_name(&self, job_name: &str) -> AppResult<Vec<JobRecord>> {
        self.check()?;
        self.inner.get_by_name(job_name).await
    }

    async fn claim_next_due(
        &self,
        now: DateTime<Utc>,
        lease_id: LeaseId,
        lease_duration: chrono::Duration,
    ) -> AppResult<Option<JobRecord>> {
        self.check()?;
        self.inner.claim_next_due(now, lease_id, lease_duration).await
    }

    async fn save(&self, job: &JobRecord, guard: WriteGuard) -> AppResult<bool> {
        self.check()?;
        self.inner.save(job, guard).await
    }

    async fn renew_lease(
        &self,
        id: JobId,
        lease_id: LeaseId,
        expires_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.check()?;
        self.inner.renew_lease(id, lease_id, expires_at).await
    }

    async fn count_by_status(&self, status: JobStatus) -> AppResult<u64> {
        self.check()?;
        self.inner.count_by_status(status).await
    }
}

/// Succeeds, remembering every payload
#[derive(Clone, Default)]
pub struct Recorder {
    pub payloads: Arc<Mutex<Vec<Value>>>,
}

impl Recorder {
    pub fn runs(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }
}

#[async_trait]
impl JobHandler for Recorder {
    async fn execute(&self, payload: &Value, _cancel: CancellationToken) -> Result<(), HandlerError> {
        self.payloads.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Blocks until released, or fails once cancelled
#[derive(Clone, Default)]
pub struct Gate {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
    pub interrupted: Arc<AtomicBool>,
}

#[async_trait]
impl JobHandler for Gate {
    async fn execute(&self, _payload: &Value, cancel: CancellationToken) -> Result<(), HandlerError> {
        self.started.notify_one();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.interrupted.store(true, Ordering::SeqCst);
                Err(HandlerError::transient("interrupted"))
            }
            _ = self.release.notified() => Ok(()),
        }
    }
}

/// Always reports a transient failure
pub struct AlwaysFail {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for AlwaysFail {
    async fn execute(&self, _payload: &Value, _cancel: CancellationToken) -> Result<(), HandlerError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Err(HandlerError::transient(format!("upstream unavailable (run {run})")))
    }
}

/// Always reports a permanent failure
pub struct Reject;

#[async_trait]
impl JobHandler for Reject {
    async fn execute(&self, _payload: &Value, _cancel: CancellationToken) -> Result<(), HandlerError> {
        Err(HandlerError::permanent("malformed payload"))
    }
}

/// Panics mid-execution
pub struct Panics;

#[async_trait]
impl JobHandler for Panics {
    async fn execute(&self, _payload: &Value, _cancel: CancellationToken) -> Result<(), HandlerError> {
        panic!("handler bug")
    }
}
