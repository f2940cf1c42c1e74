//! Pluggable model capabilities.
//!
//! Detector and speech-to-text internals live outside this workspace; the
//! pipeline only sees these traits.

use async_trait::async_trait;
use std::path::Path;

use reel_models::{Detection, TimedSegment};

use crate::error::MediaResult;
use crate::frames::Frame;

/// Face detection with optional embeddings.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detect faces in one frame. An empty list is a valid answer.
    async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Speech-to-text over a whole video file.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, video: &Path) -> MediaResult<Vec<TimedSegment>>;

    fn name(&self) -> &'static str;
}
