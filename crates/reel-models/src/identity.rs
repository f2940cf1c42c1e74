//! Identities and the fitted projection used to match embeddings against them.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::VideoId;

/// Layout version of [`ProjectionParams`]. Records with another version are rejected.
pub const PROJECTION_VERSION: u32 = 1;

/// Identifier of an identity, stable for a given video and cluster label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct IdentityId(pub String);

impl IdentityId {
    /// Derive the ID for cluster `label` of `video_id`.
    pub fn for_label(video_id: &VideoId, label: u32) -> Self {
        Self(format!("{}-identity-{}", video_id.as_str(), label))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One recurring on-screen person in a video.
///
/// Written once by the clustering stage; only `thumbnail_path` may change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Identity {
    pub id: IdentityId,

    pub video_id: VideoId,

    /// Cluster label, unique within the video
    pub label: u32,

    /// Representative embedding in the reduced space of the video's projection
    pub embedding: Vec<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,

    /// Number of sampled detections assigned to this identity
    pub member_count: usize,

    /// Timestamp (seconds) of the earliest sampled appearance
    pub first_seen: f64,

    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(video_id: VideoId, label: u32, embedding: Vec<f64>) -> Self {
        Self {
            id: IdentityId::for_label(&video_id, label),
            video_id,
            label,
            embedding,
            thumbnail_path: None,
            member_count: 0,
            first_seen: 0.0,
            created_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Failure to project an embedding into a fitted space.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("projection version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("embedding has {found} dimensions, projection expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("malformed projection parameters: {0}")]
    Malformed(String),
}

/// Fitted standardize-then-reduce parameters for one video.
///
/// `project(x) = components · ((x - mean) / scale)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectionParams {
    pub version: u32,

    /// Per-feature mean of the fitted embeddings
    pub mean: Vec<f64>,

    /// Per-feature standard deviation; zero-variance features are stored as 1.0
    pub scale: Vec<f64>,

    /// Principal axes, one row of `input_dim` values per output dimension
    pub components: Vec<Vec<f64>>,
}

impl ProjectionParams {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>, components: Vec<Vec<f64>>) -> Self {
        Self {
            version: PROJECTION_VERSION,
            mean,
            scale,
            components,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn output_dim(&self) -> usize {
        self.components.len()
    }

    /// Check internal consistency of a loaded record.
    pub fn validate(&self) -> Result<(), ProjectionError> {
        if self.version != PROJECTION_VERSION {
            return Err(ProjectionError::VersionMismatch {
                expected: PROJECTION_VERSION,
                found: self.version,
            });
        }
        let dim = self.input_dim();
        if dim == 0 || self.scale.len() != dim {
            return Err(ProjectionError::Malformed(format!(
                "mean has {} values, scale has {}",
                dim,
                self.scale.len()
            )));
        }
        if let Some(row) = self.components.iter().find(|row| row.len() != dim) {
            return Err(ProjectionError::Malformed(format!(
                "component row has {} values, expected {}",
                row.len(),
                dim
            )));
        }
        Ok(())
    }

    /// Standardize a raw embedding with the fitted scaler.
    pub fn standardize(&self, embedding: &[f32]) -> Result<Vec<f64>, ProjectionError> {
        self.validate()?;
        if embedding.len() != self.input_dim() {
            return Err(ProjectionError::DimensionMismatch {
                expected: self.input_dim(),
                found: embedding.len(),
            });
        }
        Ok(embedding
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&x, (&m, &s))| (x as f64 - m) / s)
            .collect())
    }

    /// Project a raw embedding into the reduced space.
    pub fn project(&self, embedding: &[f32]) -> Result<Vec<f64>, ProjectionError> {
        let z = self.standardize(embedding)?;
        Ok(self
            .components
            .iter()
            .map(|axis| axis.iter().zip(&z).map(|(a, b)| a * b).sum())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProjectionParams {
        ProjectionParams::new(
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0, 1.0],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 1.0]],
        )
    }

    #[test]
    fn test_project() {
        let projected = params().project(&[2.0, 4.0, 5.0]).unwrap();
        assert_eq!(projected, vec![1.0, 3.0]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let err = params().project(&[1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            ProjectionError::DimensionMismatch {
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut p = params();
        p.version = 99;
        assert!(matches!(
            p.project(&[0.0, 0.0, 0.0]),
            Err(ProjectionError::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn test_identity_id_is_deterministic() {
        let video = VideoId::from("v1");
        assert_eq!(IdentityId::for_label(&video, 2), IdentityId::for_label(&video, 2));
        assert_eq!(IdentityId::for_label(&video, 2).as_str(), "v1-identity-2");
    }
}
