//! Integration tests for cancellation of pending and running jobs.

use std::sync::atomic::Ordering;
use std::time::Duration;

use coursehub_core::config::WorkerConfig;
use coursehub_entity::job::JobStatus;
use coursehub_worker::PollOutcome;

use crate::helpers::{self, TestApp};

#[tokio::test]
async fn test_cancelled_pending_job_never_claimed() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::RECORD, None, None).await.unwrap();

    assert!(app.service.cancel_job(job.id).await.unwrap());
    assert_eq!(app.job(job.id).await.status, JobStatus::Cancelled);

    let dispatcher = app.dispatcher();
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);
    app.clock.advance(chrono::Duration::days(365));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);
    assert_eq!(app.recorder.runs(), 0);
}

#[tokio::test]
async fn test_cancelled_job_cannot_be_requeued() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::RECORD, None, None).await.unwrap();
    assert!(app.service.cancel_job(job.id).await.unwrap());

    let err = app
        .service
        .update_job_status(job.id, JobStatus::Cancelled, JobStatus::Pending)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    assert_eq!(app.tick(&app.dispatcher()).await, PollOutcome::Idle);
    assert_eq!(app.recorder.runs(), 0);
    assert_eq!(app.job(job.id).await.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_refused_while_processing() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::GATE, None, None).await.unwrap();
    let dispatcher = app.dispatcher();

    dispatcher.poll_once().await;
    app.gate.started.notified().await;

    assert!(!app.service.cancel_job(job.id).await.unwrap());
    assert_eq!(app.job(job.id).await.status, JobStatus::Processing);

    app.gate.release.notify_one();
    assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(app.job(job.id).await.status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_forced_cancel_interrupts_handler_and_discards_result() {
    let app = TestApp::with_config(WorkerConfig {
        lease_duration_seconds: 30,
        lease_renewal_seconds: 1,
        ..WorkerConfig::default()
    });
    let job = app.service.add_job(helpers::GATE, None, None).await.unwrap();
    let dispatcher = app.dispatcher();

    assert_eq!(dispatcher.poll_once().await, PollOutcome::Claimed(job.id));
    app.gate.started.notified().await;

    assert!(
        app.service
            .update_job_status(job.id, JobStatus::Processing, JobStatus::Cancelled)
            .await
            .unwrap()
    );

    // The next heartbeat finds the lease gone and cancels the handler.
    assert!(dispatcher.wait_idle(Duration::from_secs(10)).await);
    assert!(app.gate.interrupted.load(Ordering::SeqCst));

    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.retry_count, 0);
    assert!(stored.error_message.is_none());
    assert!(stored.lease.is_none());
}

#[tokio::test]
async fn test_cancel_terminal_job_is_noop() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::RECORD, None, None).await.unwrap();
    app.tick(&app.dispatcher()).await;
    let before = app.job(job.id).await;

    assert!(!app.service.cancel_job(job.id).await.unwrap());
    assert_eq!(app.job(job.id).await, before);
}

#[tokio::test(start_paused = true)]
async fn test_handler_interrupted_when_lease_lapses_during_outage() {
    let app = TestApp::with_config(WorkerConfig {
        lease_duration_seconds: 30,
        lease_renewal_seconds: 1,
        ..WorkerConfig::default()
    });
    let job = app.service.add_job(helpers::GATE, None, None).await.unwrap();
    let dispatcher = app.dispatcher();

    assert_eq!(dispatcher.poll_once().await, PollOutcome::Claimed(job.id));
    app.gate.started.notified().await;

    // Renewals fail from here on, and the lease runs out.
    app.store.go_down();
    app.clock.advance(chrono::Duration::seconds(31));

    assert!(dispatcher.wait_idle(Duration::from_secs(10)).await);
    assert!(app.gate.interrupted.load(Ordering::SeqCst));

    app.store.recover();
    let reclaimed = app.second_service().leases().acquire().await.unwrap();
    assert_eq!(reclaimed.map(|c| c.job.id), Some(job.id));
}
