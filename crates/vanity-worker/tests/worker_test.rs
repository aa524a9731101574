//! End-to-end tests for the worker loop and process controller.
//!
//! These tests spawn shell scripts in place of the miner and run against
//! the in-memory queue.
#![cfg(unix)]

mod common;

use common::{expected_result, payload, script, wait_for_file, FlakyAckQueue, TestWorker};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use vanity_core::FailureReason;
use vanity_jobs::{JobQueue, JobState};
use vanity_worker::{ControllerConfig, ExecutionOutcome, ProcessController, ZERO_ADDRESS};

#[tokio::test]
async fn test_result_completes_job() {
    let mut worker = TestWorker::new(script("found.sh"));
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.result, Some(expected_result()));
    assert!(record.failure.is_none());

    let args = std::fs::read_to_string(worker.device_path("args")).expect("args not written");
    let args: Vec<&str> = args.lines().collect();
    let device_id = worker.device_dir.path().display().to_string();
    assert_eq!(
        args,
        vec![
            payload().deployer_address.as_str(),
            ZERO_ADDRESS,
            payload().init_code_hash.as_str(),
            device_id.as_str(),
            "",
        ]
    );

    let threshold = std::fs::read_to_string(worker.device_path("threshold")).unwrap();
    assert_eq!(threshold.trim(), "8");

    let stats = worker.stop().await;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_job_threshold_reaches_miner() {
    let mut worker = TestWorker::new(script("found.sh"));
    let job_id = worker.enqueue(payload().with_min_leading_bs(10)).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Completed);

    let threshold = std::fs::read_to_string(worker.device_path("threshold")).unwrap();
    assert_eq!(threshold.trim(), "10");
    worker.stop().await;
}

#[tokio::test]
async fn test_marker_split_across_writes() {
    let mut worker = TestWorker::new(script("split.sh"));
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.result, Some(expected_result()));
    worker.stop().await;
}

#[tokio::test]
async fn test_clean_exit_without_result_fails() {
    let mut worker = TestWorker::new(script("no_result.sh"));
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Failed);
    assert!(record.result.is_none());
    let failure = record.failure.expect("failure recorded");
    assert_eq!(failure.reason, FailureReason::NoResultFound);

    let stats = worker.stop().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 0);
}

#[tokio::test]
async fn test_abnormal_exit_fails() {
    let mut worker = TestWorker::new(script("crash.sh"));
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    let failure = record.failure.expect("failure recorded");
    assert_eq!(failure.reason, FailureReason::ProcessNonzeroExit);
    assert!(failure.message.contains('3'), "{}", failure.message);
    worker.stop().await;
}

#[tokio::test]
async fn test_deadline_interrupts_miner() {
    let mut worker = TestWorker::with_timing(
        script("hang.sh"),
        Duration::from_millis(300),
        Duration::from_secs(5),
    );
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(
        record.failure.expect("failure recorded").reason,
        FailureReason::Timeout
    );
    assert!(
        worker.device_path("interrupted").exists(),
        "miner did not receive SIGINT"
    );
    worker.stop().await;
}

#[tokio::test]
async fn test_ignored_interrupt_is_followed_by_kill() {
    let mut worker = TestWorker::with_timing(
        script("stubborn.sh"),
        Duration::from_millis(200),
        Duration::from_millis(300),
    );
    let started = Instant::now();
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(
        record.failure.expect("failure recorded").reason,
        FailureReason::Timeout
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    worker.stop().await;
}

#[tokio::test]
async fn test_result_wins_over_interrupted_exit() {
    let mut worker = TestWorker::new(script("found_then_hang.sh"));
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.result, Some(expected_result()));
    worker.stop().await;
}

#[tokio::test]
async fn test_unterminated_result_completes_before_deadline() {
    let mut worker = TestWorker::with_timing(
        script("found_no_newline_then_hang.sh"),
        Duration::from_secs(10),
        Duration::from_secs(5),
    );
    let started = Instant::now();
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.result, Some(expected_result()));
    assert!(started.elapsed() < Duration::from_secs(5));
    worker.stop().await;
}

#[tokio::test]
async fn test_ack_is_retried_after_broker_error() {
    let mut worker = TestWorker::with_queue(
        script("found.sh"),
        Duration::from_secs(30),
        Duration::from_secs(5),
        |queue| Arc::new(FlakyAckQueue::new(queue, 1)) as Arc<dyn JobQueue>,
    );
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    assert_eq!(record.state, JobState::Completed);
    assert_eq!(record.result, Some(expected_result()));

    let stats = worker.stop().await;
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn test_missing_binary_fails_immediately() {
    let mut worker = TestWorker::with_timing(
        "/nonexistent/vanity-miner".into(),
        Duration::from_secs(60),
        Duration::from_secs(5),
    );
    let started = Instant::now();
    let job_id = worker.enqueue(payload()).await;

    let record = worker.wait_terminal(&job_id).await;
    let failure = record.failure.expect("failure recorded");
    assert_eq!(failure.reason, FailureReason::SpawnError);
    assert!(started.elapsed() < Duration::from_secs(5));
    worker.stop().await;
}

#[tokio::test]
async fn test_jobs_run_one_at_a_time() {
    let mut worker = TestWorker::new(script("exclusive.sh"));
    let mut job_ids = Vec::new();
    for _ in 0..3 {
        job_ids.push(worker.enqueue(payload()).await);
    }

    for job_id in &job_ids {
        let record = worker.wait_terminal(job_id).await;
        assert_eq!(record.state, JobState::Completed);
    }
    assert!(
        !worker.device_path("overlap").exists(),
        "two miners ran on one device"
    );

    let stats = worker.stop().await;
    assert_eq!(stats.completed, 3);
}

#[tokio::test]
async fn test_shutdown_releases_running_job() {
    let mut worker = TestWorker::new(script("hang.sh"));
    let job_id = worker.enqueue(payload()).await;
    wait_for_file(&worker.device_path("started")).await;

    let stats = worker.stop().await;

    assert_eq!(stats.released, 1);
    assert_eq!(stats.completed + stats.failed, 0);
    assert!(
        worker.device_path("interrupted").exists(),
        "miner did not receive SIGINT"
    );

    let record = worker.queue.get_job(&job_id).await.unwrap().expect("job exists");
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.attempts, 0);
}

#[tokio::test]
async fn test_controller_cancel_before_start() {
    let controller = ProcessController::new(ControllerConfig {
        miner_path: script("hang.sh"),
        device_id: tempfile::tempdir().unwrap().path().display().to_string(),
        interrupt_grace: Duration::from_millis(300),
        flush_timeout: Duration::from_millis(200),
    });
    let (_cancel_tx, cancel_rx) = watch::channel(true);

    let outcome = controller
        .run(&payload(), 8, Duration::from_secs(30), cancel_rx)
        .await;
    assert_eq!(outcome, ExecutionOutcome::Cancelled);
}
