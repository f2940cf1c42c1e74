//! Uploaded video records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Generate a new random video ID.
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

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Uploaded, nothing has run yet
    #[default]
    Uploaded,
    /// A job is working on this video
    Processing,
    /// A processed video is available
    Completed,
    /// The last job for this video failed
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Uploaded => "uploaded",
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded video, readable as a local file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Video {
    pub id: VideoId,

    /// Local path of the uploaded source file
    pub upload_path: String,

    /// Path of the processed deliverable, set only on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_path: Option<String>,

    #[serde(default)]
    pub status: VideoStatus,

    pub created_at: DateTime<Utc>,
}

impl Video {
    /// Create a freshly uploaded video record.
    pub fn new(upload_path: impl Into<String>) -> Self {
        Self {
            id: VideoId::new(),
            upload_path: upload_path.into(),
            processed_path: None,
            status: VideoStatus::Uploaded,
            created_at: Utc::now(),
        }
    }

    /// Use a specific ID.
    pub fn with_id(mut self, id: VideoId) -> Self {
        self.id = id;
        self
    }
}
