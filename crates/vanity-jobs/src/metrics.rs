//! Metrics for job queue and compute process monitoring.
//!
//! Recorded through the `metrics` facade; installing an exporter is left
//! to the embedding binary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "vanity_jobs_enqueued_total";
    /// Total jobs leased by a worker.
    pub const JOBS_LEASED_TOTAL: &str = "vanity_jobs_leased_total";
    /// Total jobs completed with a result.
    pub const JOBS_COMPLETED_TOTAL: &str = "vanity_jobs_completed_total";
    /// Total jobs failed.
    pub const JOBS_FAILED_TOTAL: &str = "vanity_jobs_failed_total";
    /// Total expired leases recovered.
    pub const JOBS_STALLED_TOTAL: &str = "vanity_jobs_stalled_total";
    /// Total jobs released back to waiting on shutdown.
    pub const JOBS_RELEASED_TOTAL: &str = "vanity_jobs_released_total";
    /// Total failed lease renewals.
    pub const LEASE_RENEWALS_FAILED_TOTAL: &str = "vanity_lease_renewals_failed_total";

    /// Compute process run time in seconds.
    pub const PROCESS_DURATION_SECONDS: &str = "vanity_process_duration_seconds";
    /// Compute processes currently running.
    pub const PROCESSES_ACTIVE: &str = "vanity_processes_active";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_LEASED_TOTAL,
        "Total number of jobs leased for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed with a result"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_counter!(
        names::JOBS_STALLED_TOTAL,
        "Total number of expired leases recovered"
    );
    describe_counter!(
        names::JOBS_RELEASED_TOTAL,
        "Total number of jobs released back to the waiting set"
    );
    describe_counter!(
        names::LEASE_RENEWALS_FAILED_TOTAL,
        "Total number of failed lease renewals"
    );
    describe_histogram!(
        names::PROCESS_DURATION_SECONDS,
        "Compute process run time in seconds"
    );
    describe_gauge!(
        names::PROCESSES_ACTIVE,
        "Number of compute processes currently running"
    );
}

/// Job metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, priority: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "priority" => priority.to_string()
        )
        .increment(1);
    }

    /// Record a job leased.
    pub fn job_leased(queue: &str, device_id: &str) {
        counter!(
            names::JOBS_LEASED_TOTAL,
            "queue" => queue.to_string(),
            "device_id" => device_id.to_string()
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    /// Record a job failed.
    pub fn job_failed(queue: &str, reason: &str) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);
    }

    /// Record an expired lease.
    pub fn job_stalled(queue: &str, outcome: &str) {
        counter!(
            names::JOBS_STALLED_TOTAL,
            "queue" => queue.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }

    /// Record a job released.
    pub fn job_released(queue: &str) {
        counter!(
            names::JOBS_RELEASED_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(1);
    }

    /// Record a failed lease renewal.
    pub fn lease_renewal_failed(queue: &str) {
        counter!(
            names::LEASE_RENEWALS_FAILED_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(1);
    }
}

/// Compute process metrics recorder.
#[derive(Clone)]
pub struct ProcessMetrics;

impl ProcessMetrics {
    /// Record a process start.
    pub fn process_started(device_id: &str) {
        gauge!(
            names::PROCESSES_ACTIVE,
            "device_id" => device_id.to_string()
        )
        .increment(1.0);
    }

    /// Record a process end and its run time.
    pub fn process_finished(device_id: &str, outcome: &str, duration: Duration) {
        gauge!(
            names::PROCESSES_ACTIVE,
            "device_id" => device_id.to_string()
        )
        .decrement(1.0);

        histogram!(
            names::PROCESS_DURATION_SECONDS,
            "device_id" => device_id.to_string(),
            "outcome" => outcome.to_string()
        )
        .record(duration.as_secs_f64());
    }
}
