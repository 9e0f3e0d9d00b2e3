//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus recorder initialization
//! - Job lifecycle counters, gauge and duration histogram
//! - Rendering for the `/metrics` endpoint

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use mediaferry_core::JobStatus;
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobs_submitted_total", "Download jobs accepted for processing");
    describe_counter!("jobs_started_total", "Download jobs whose runner began executing");
    describe_counter!(
        "jobs_finished_total",
        "Download jobs that left the running state, by final status"
    );
    describe_gauge!("jobs_running", "Download jobs currently executing");
    describe_histogram!(
        "job_duration_seconds",
        "Wall-clock time from runner start to final status"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

pub fn record_job_submitted() {
    counter!("jobs_submitted_total").increment(1);
}

pub fn record_job_started() {
    counter!("jobs_started_total").increment(1);
    gauge!("jobs_running").increment(1.0);
}

/// Record a runner leaving the running state.
///
/// `status` is the job's final status; `None` when the job vanished or was
/// taken over before the runner could write one.
pub fn record_job_finished(status: Option<JobStatus>, elapsed: Duration) {
    let label = status.map(JobStatus::as_str).unwrap_or("abandoned");
    counter!("jobs_finished_total", "status" => label).increment(1);
    gauge!("jobs_running").decrement(1.0);
    histogram!("job_duration_seconds", "status" => label).record(elapsed.as_secs_f64());
}
