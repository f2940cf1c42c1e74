//! Prometheus metrics for the worker.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config(format!("metrics exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_TOTAL: &str = "reel_jobs_total";
    pub const STAGE_DURATION_SECONDS: &str = "reel_stage_duration_seconds";
    pub const IDENTITIES_CREATED_TOTAL: &str = "reel_identities_created_total";
    pub const FRAMES_COMPOSITED_TOTAL: &str = "reel_frames_composited_total";
}

/// Record a finished job.
pub fn record_job(job_type: &str, status: &str) {
    let labels = [("type", job_type.to_string()), ("status", status.to_string())];
    counter!(names::JOBS_TOTAL, &labels).increment(1);
}

pub fn record_stage_duration(stage: &str, duration_secs: f64) {
    let labels = [("stage", stage.to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_identities_created(count: usize) {
    counter!(names::IDENTITIES_CREATED_TOTAL).increment(count as u64);
}

pub fn record_frames_composited(count: u64) {
    counter!(names::FRAMES_COMPOSITED_TOTAL).increment(count);
}
