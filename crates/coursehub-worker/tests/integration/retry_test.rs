//! Integration tests for failure handling and bounded retries.

use std::sync::atomic::Ordering;

use chrono::Duration;

use coursehub_entity::job::JobStatus;
use coursehub_worker::{JobCreateParams, PollOutcome};

use crate::helpers::{self, TestApp};

#[tokio::test]
async fn test_failing_job_retries_then_fails() {
    let app = TestApp::new();
    let job = app
        .service
        .enqueue(JobCreateParams {
            handler_type: helpers::FAIL.to_string(),
            max_retries: Some(2),
            ..JobCreateParams::default()
        })
        .await
        .unwrap();
    let dispatcher = app.dispatcher();

    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));
    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.scheduled_at, app.now() + Duration::seconds(10));
    assert_eq!(stored.error_message.as_deref(), Some("upstream unavailable (run 1)"));

    // Not due until the backoff has elapsed.
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);
    app.clock.advance(Duration::seconds(10));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));
    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.scheduled_at, app.now() + Duration::seconds(20));

    app.clock.advance(Duration::seconds(20));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));
    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert!(stored.lease.is_none());
    assert_eq!(stored.error_message.as_deref(), Some("upstream unavailable (run 3)"));
    assert_eq!(app.failures.load(Ordering::SeqCst), 3);

    app.clock.advance(Duration::days(30));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);
    assert_eq!(app.failures.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_count_never_exceeds_budget() {
    let app = TestApp::new();
    let job = app
        .service
        .enqueue(JobCreateParams {
            handler_type: helpers::FAIL.to_string(),
            max_retries: Some(4),
            ..JobCreateParams::default()
        })
        .await
        .unwrap();
    let dispatcher = app.dispatcher();

    for _ in 0..10 {
        app.tick(&dispatcher).await;
        let stored = app.job(job.id).await;
        assert!(stored.retry_count <= stored.max_retries);
        app.clock.advance(Duration::hours(2));
    }
    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_count, 4);
    assert_eq!(app.failures.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::REJECT, None, None).await.unwrap();

    app.tick(&app.dispatcher()).await;

    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.error_message.as_deref(), Some("malformed payload"));
}

#[tokio::test]
async fn test_panicking_handler_is_retried() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::PANIC, None, None).await.unwrap();
    let dispatcher = app.dispatcher();

    app.tick(&dispatcher).await;

    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.error_message.as_deref(), Some("Handler panicked: handler bug"));
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn test_manual_retry_of_failed_job() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::REJECT, None, None).await.unwrap();
    let dispatcher = app.dispatcher();
    app.tick(&dispatcher).await;
    assert_eq!(app.job(job.id).await.status, JobStatus::Failed);

    assert!(app.service.retry_job(job.id).await.unwrap());
    assert!(!app.service.retry_job(job.id).await.unwrap());

    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.scheduled_at, app.now());
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));
}

#[tokio::test]
async fn test_completed_one_time_job_runs_once() {
    let app = TestApp::new();
    let job = app.service.add_job(helpers::RECORD, None, None).await.unwrap();
    let dispatcher = app.dispatcher();
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));
    assert_eq!(app.job(job.id).await.status, JobStatus::Completed);

    let err = app
        .service
        .update_job_status(job.id, JobStatus::Completed, JobStatus::Pending)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(!app.service.retry_job(job.id).await.unwrap());

    app.clock.advance(Duration::days(1));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);
    assert_eq!(app.recorder.runs(), 1);
}
