//! Job records and the per-job state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::{IdentityId, VideoId};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
///
/// `pending -> in_progress -> {completed, failed}`; both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// A pending job may fail before it starts (e.g. its video record is missing).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline stage a job is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Queued,
    Extraction,
    Clustering,
    IdentityLookup,
    Segmentation,
    Composition,
    Compilation,
    Captioning,
    Finished,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Queued => "queued",
            JobStage::Extraction => "extraction",
            JobStage::Clustering => "clustering",
            JobStage::IdentityLookup => "identity_lookup",
            JobStage::Segmentation => "segmentation",
            JobStage::Composition => "composition",
            JobStage::Compilation => "compilation",
            JobStage::Captioning => "captioning",
            JobStage::Finished => "finished",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Sample the video and cluster the people in it; no output video
    IdentityDetection,
    /// Full pipeline producing the vertical highlight reel
    HighlightRender,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::IdentityDetection => "identity_detection",
            JobType::HighlightRender => "highlight_render",
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A processing job, owned exclusively by the orchestrator once created.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    pub video_id: VideoId,

    pub job_type: JobType,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub stage: JobStage,

    /// Percentage in [0, 100]; never decreases within a run
    #[serde(default)]
    pub progress: f64,

    /// Identities the user wants to follow
    #[serde(default)]
    pub selected_identities: Vec<IdentityId>,

    /// Burn transcribed captions into the deliverable
    #[serde(default)]
    pub captions: bool,

    /// Output video, set only when the job completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_video_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job for a video.
    pub fn new(video_id: VideoId, job_type: JobType) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            video_id,
            job_type,
            status: JobStatus::Pending,
            stage: JobStage::Queued,
            progress: 0.0,
            selected_identities: Vec::new(),
            captions: false,
            processed_video_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Set the identities to follow.
    pub fn with_selection(mut self, selected: Vec<IdentityId>) -> Self {
        self.selected_identities = selected;
        self
    }

    /// Request caption burn-in.
    pub fn with_captions(mut self, captions: bool) -> Self {
        self.captions = captions;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Begin executing: `pending -> in_progress`, progress reset for the new run.
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::InProgress)?;
        self.progress = 0.0;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// Record the stage now executing.
    pub fn enter_stage(&mut self, stage: JobStage) {
        self.stage = stage;
        self.updated_at = Utc::now();
    }

    /// Record progress, clamped to [0, 100] and never lower than before.
    ///
    /// Returns the value actually stored.
    pub fn record_progress(&mut self, value: f64) -> f64 {
        let value = if value.is_finite() { value.clamp(0.0, 100.0) } else { 0.0 };
        if value > self.progress {
            self.progress = value;
            self.updated_at = Utc::now();
        }
        self.progress
    }

    /// Mark completed, optionally with the produced video.
    pub fn complete(&mut self, output: Option<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Completed)?;
        self.stage = JobStage::Finished;
        self.progress = 100.0;
        self.processed_video_path = output;
        self.finished_at = Some(self.updated_at);
        Ok(())
    }

    /// Mark failed. Any previously referenced output is dropped.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(JobStatus::Failed)?;
        self.processed_video_path = None;
        self.error_message = Some(error.into());
        self.finished_at = Some(self.updated_at);
        Ok(())
    }
}
