//! Integration tests for the dispatch loop: claiming, completion and backpressure.

use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use coursehub_core::config::WorkerConfig;
use coursehub_entity::job::{JobRecord, JobStatus, NewJob};
use coursehub_worker::PollOutcome;

use crate::helpers::{self, TestApp};

#[tokio::test]
async fn test_one_time_job_runs_to_completion() {
    let app = TestApp::new();
    let job = app
        .service
        .add_job(helpers::RECORD, Some(json!({ "user_id": 42 })), Some(app.now()))
        .await
        .unwrap();

    let dispatcher = app.dispatcher();
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));

    let stored = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.completed_at, Some(app.now()));
    assert_eq!(stored.started_at, Some(app.now()));
    assert!(stored.lease.is_none());
    assert_eq!(app.recorder.runs(), 1);
    assert_eq!(app.recorder.payloads.lock().unwrap()[0], json!({ "user_id": 42 }));

    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);
    assert_eq!(app.recorder.runs(), 1);
}

#[tokio::test]
async fn test_future_job_waits_for_its_time() {
    let app = TestApp::new();
    let job = app
        .service
        .add_job(helpers::RECORD, None, Some(app.now() + chrono::Duration::minutes(5)))
        .await
        .unwrap();

    let dispatcher = app.dispatcher();
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Idle);

    app.clock.advance(chrono::Duration::minutes(5));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(job.id));
    assert_eq!(app.job(job.id).await.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_earliest_due_job_claimed_first() {
    let app = TestApp::new();
    let later = app
        .service
        .add_job(helpers::RECORD, Some(json!("later")), Some(app.now() - chrono::Duration::seconds(1)))
        .await
        .unwrap();
    let earlier = app
        .service
        .add_job(helpers::RECORD, Some(json!("earlier")), Some(app.now() - chrono::Duration::seconds(30)))
        .await
        .unwrap();

    let dispatcher = app.dispatcher();
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(earlier.id));
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(later.id));
}

#[tokio::test]
async fn test_unregistered_handler_fails_without_retry() {
    let app = TestApp::new();
    let job = NewJob {
        handler_type: "retired_handler".to_string(),
        job_name: "retired_handler".to_string(),
        payload: serde_json::Value::Null,
        scheduled_at: app.now(),
        max_retries: 5,
        interval_seconds: Some(60),
    }
    .into_record(app.now());
    coursehub_database::JobStore::insert(app.store.as_ref(), &job)
        .await
        .unwrap();

    app.tick(&app.dispatcher()).await;

    let stored: JobRecord = app.job(job.id).await;
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert!(
        stored
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("retired_handler"))
    );
}

#[tokio::test]
async fn test_saturated_pool_stops_claiming() {
    let app = TestApp::with_config(WorkerConfig {
        concurrency: 1,
        ..WorkerConfig::default()
    });
    let first = app
        .service
        .add_job(helpers::GATE, None, Some(app.now() - chrono::Duration::seconds(1)))
        .await
        .unwrap();
    let second = app.service.add_job(helpers::RECORD, None, None).await.unwrap();

    let dispatcher = app.dispatcher();
    assert_eq!(dispatcher.poll_once().await, PollOutcome::Claimed(first.id));
    app.gate.started.notified().await;

    assert_eq!(dispatcher.poll_once().await, PollOutcome::Saturated);
    assert_eq!(dispatcher.in_flight(), 1);
    assert_eq!(app.job(second.id).await.status, JobStatus::Pending);

    app.gate.release.notify_one();
    assert!(dispatcher.wait_idle(Duration::from_secs(5)).await);
    assert_eq!(app.tick(&dispatcher).await, PollOutcome::Claimed(second.id));

    let stats = app.service.stats().await.unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_run_drains_queue_and_stops_on_shutdown() {
    let app = TestApp::with_config(WorkerConfig {
        poll_interval_seconds: 1,
        ..WorkerConfig::default()
    });
    for n in 0..5 {
        app.service
            .add_job(helpers::RECORD, Some(json!(n)), None)
            .await
            .unwrap();
    }

    let dispatcher = app.dispatcher();
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run(rx).await }
    });

    for _ in 0..200 {
        if app.service.stats().await.unwrap().completed == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(app.service.stats().await.unwrap().completed, 5);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("dispatcher stopped")
        .unwrap();
    assert_eq!(dispatcher.in_flight(), 0);
}
