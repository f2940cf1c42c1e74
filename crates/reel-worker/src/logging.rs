//! Structured job logging.
//!
//! Every event carries the job and video IDs so a reel can be traced from
//! upload to output in aggregated logs.

use tracing::{error, info, warn, Span};

use reel_models::{JobId, JobStage, VideoId};

use crate::error::WorkerError;

#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    video_id: String,
    operation: &'static str,
}

impl JobLogger {
    /// `operation` is the job type name, e.g. `highlight_render`.
    pub fn new(job_id: &JobId, video_id: &VideoId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            video_id: video_id.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, source: &str) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = self.operation,
            source,
            "Job started"
        );
    }

    pub fn log_stage(&self, stage: JobStage) {
        info!(job_id = %self.job_id, stage = stage.as_str(), "Entering stage");
    }

    /// A scene was fully composited and progress persisted.
    pub fn log_scene(&self, scene: usize, progress: f64) {
        info!(
            job_id = %self.job_id,
            scene,
            progress = format!("{:.1}", progress),
            "Scene composited"
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, operation = self.operation, "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, operation = self.operation, "{}", message);
    }

    pub fn log_failure(&self, err: &WorkerError) {
        error!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = self.operation,
            kind = err.kind().as_str(),
            "Job failed: {}", err
        );
    }

    pub fn log_completion(&self, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = self.operation,
            elapsed_secs,
            "Job completed"
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span for everything logged while the job runs.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            video_id = %self.video_id,
            operation = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, &VideoId::from("v1"), "highlight_render");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "highlight_render");
    }
}
