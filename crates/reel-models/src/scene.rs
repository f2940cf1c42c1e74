//! Scene intervals.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A time interval of visually continuous content, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    pub start: f64,
    pub end: f64,
}

impl Scene {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Source frame range `[first, last)` covered by this scene at `fps`.
    ///
    /// Both bounds round to the nearest frame, so adjacent scenes share their
    /// boundary frame index and never overlap.
    pub fn frame_range(&self, fps: f64, total_frames: u64) -> std::ops::Range<u64> {
        let first = ((self.start * fps).round().max(0.0) as u64).min(total_frames);
        let last = ((self.end * fps).round().max(0.0) as u64).min(total_frames);
        first..last.max(first)
    }
}
