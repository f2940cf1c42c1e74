//! Shared data models for the highlight reel pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their lifecycle and stages
//! - Uploaded videos
//! - Identities and the fitted projection used to match them
//! - Detections, scenes and timed caption segments
//! - Encoding and canvas configuration

pub mod caption;
pub mod detection;
pub mod encoding;
pub mod identity;
pub mod job;
pub mod scene;
pub mod video;

// Re-export common types
pub use caption::TimedSegment;
pub use detection::{BoundingBox, Detection};
pub use encoding::{CanvasSize, EncodingConfig};
pub use identity::{Identity, IdentityId, ProjectionError, ProjectionParams, PROJECTION_VERSION};
pub use job::{InvalidTransition, Job, JobId, JobStage, JobStatus, JobType};
pub use scene::Scene;
pub use video::{Video, VideoId, VideoStatus};
