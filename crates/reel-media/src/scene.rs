//! Scene segmentation by grayscale frame differencing.
//!
//! # Algorithm
//!
//! 1. Convert each (downscaled) frame to 8-bit luma
//! 2. Score consecutive frames by mean absolute luma difference (0-255)
//! 3. Start a new scene when the score exceeds the threshold and more than
//!    `min_scene_frames` source frames have passed since the last cut
//! 4. Convert cut frame indices to times; the last scene ends at the duration

use image::imageops;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reel_models::Scene;

use crate::error::MediaResult;
use crate::frames::{Frame, FrameStream};

/// Scene segmentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    /// Mean absolute luma difference that marks a cut (0-255 scale)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Minimum scene length in source frames
    #[serde(default = "default_min_scene_frames")]
    pub min_scene_frames: u64,

    /// Frames are downscaled to this size before scoring
    #[serde(default = "default_analysis_size")]
    pub analysis_size: (u32, u32),
}

fn default_threshold() -> f64 {
    30.0
}
fn default_min_scene_frames() -> u64 {
    15
}
fn default_analysis_size() -> (u32, u32) {
    (160, 90)
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            min_scene_frames: default_min_scene_frames(),
            analysis_size: default_analysis_size(),
        }
    }
}

/// Incremental scene segmenter fed one frame at a time, in order.
pub struct SceneSegmenter {
    config: SceneConfig,
    fps: f64,
    prev_luma: Option<Vec<u8>>,
    /// Source frame indices where scenes start; always begins with 0
    boundaries: Vec<u64>,
    frames_seen: u64,
}

impl SceneSegmenter {
    pub fn new(config: SceneConfig, fps: f64) -> Self {
        Self {
            config,
            fps,
            prev_luma: None,
            boundaries: vec![0],
            frames_seen: 0,
        }
    }

    /// Score a frame against its predecessor. Returns the start index of a new scene if one begins here.
    pub fn push(&mut self, frame: &Frame) -> Option<u64> {
        let luma = imageops::grayscale(&frame.image).into_raw();
        self.frames_seen += 1;

        let cut = match &self.prev_luma {
            Some(prev) => {
                let score = mean_abs_diff(prev, &luma);
                let last = self.boundaries.last().copied().unwrap_or(0);
                let elapsed = frame.index.saturating_sub(last);

                if score > self.config.threshold {
                    if elapsed > self.config.min_scene_frames {
                        debug!(frame = frame.index, score, "Scene cut");
                        Some(frame.index)
                    } else {
                        debug!(
                            frame = frame.index,
                            score, elapsed, "Ignoring cut too close to previous boundary"
                        );
                        None
                    }
                } else {
                    None
                }
            }
            None => None,
        };

        if let Some(index) = cut {
            self.boundaries.push(index);
        }
        self.prev_luma = Some(luma);
        cut
    }

    /// Contiguous scenes covering `[0, duration]`; a single scene when no cut was found.
    pub fn finish(self, duration: f64) -> Vec<Scene> {
        let duration = duration.max(0.0);

        let mut starts: Vec<f64> = vec![0.0];
        if self.fps > 0.0 {
            for &index in self.boundaries.iter().skip(1) {
                let t = index as f64 / self.fps;
                if t > *starts.last().unwrap_or(&0.0) && t < duration {
                    starts.push(t);
                }
            }
        }

        let scenes: Vec<Scene> = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(duration);
                Scene::new(start, end)
            })
            .collect();

        info!(
            scenes = scenes.len(),
            frames = self.frames_seen,
            "Segmented timeline"
        );
        scenes
    }
}

/// Mean absolute difference of two luma planes; planes of different size count as a full cut.
fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 255.0;
    }
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as i16 - y as i16).unsigned_abs() as u64)
        .sum();
    total as f64 / a.len() as f64
}

/// Segment an in-memory frame sequence.
pub fn segment_frames(frames: &[Frame], fps: f64, duration: f64, config: &SceneConfig) -> Vec<Scene> {
    let mut segmenter = SceneSegmenter::new(config.clone(), fps);
    for frame in frames {
        segmenter.push(frame);
    }
    segmenter.finish(duration)
}

/// Segment by draining a frame stream.
pub async fn segment_stream(
    stream: &mut dyn FrameStream,
    fps: f64,
    duration: f64,
    config: &SceneConfig,
) -> MediaResult<Vec<Scene>> {
    let mut segmenter = SceneSegmenter::new(config.clone(), fps);
    while let Some(frame) = stream.next_frame().await? {
        segmenter.push(&frame);
    }
    Ok(segmenter.finish(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(index: u64, fps: f64, value: u8) -> Frame {
        Frame::new(
            index,
            index as f64 / fps,
            RgbImage::from_pixel(16, 9, Rgb([value, value, value])),
        )
    }

    fn frames(values: &[(u8, u64)], fps: f64) -> Vec<Frame> {
        let mut out = Vec::new();
        for &(value, count) in values {
            for _ in 0..count {
                let index = out.len() as u64;
                out.push(solid(index, fps, value));
            }
        }
        out
    }

    fn assert_covers(scenes: &[Scene], duration: f64) {
        assert_eq!(scenes.first().unwrap().start, 0.0);
        assert_eq!(scenes.last().unwrap().end, duration);
        for pair in scenes.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start < pair[0].end);
        }
    }

    #[test]
    fn test_three_scenes() {
        let fps = 30.0;
        let frames = frames(&[(0, 30), (255, 30), (128, 30)], fps);
        let scenes = segment_frames(&frames, fps, 3.0, &SceneConfig::default());

        assert_eq!(scenes.len(), 3);
        assert_eq!(scenes[0], Scene::new(0.0, 1.0));
        assert_eq!(scenes[1], Scene::new(1.0, 2.0));
        assert_eq!(scenes[2], Scene::new(2.0, 3.0));
    }

    #[test]
    fn test_flash_shorter_than_floor_is_ignored() {
        let fps = 30.0;
        // Cut into the flash is accepted, the cut back out is only 3 frames later
        let frames = frames(&[(0, 30), (255, 3), (0, 30)], fps);
        let scenes = segment_frames(&frames, fps, 2.1, &SceneConfig::default());

        assert_eq!(scenes.len(), 2);
        assert_covers(&scenes, 2.1);
    }

    #[test]
    fn test_cut_must_exceed_floor() {
        let fps = 30.0;
        let config = SceneConfig::default();

        // Cut lands exactly `min_scene_frames` after the start
        let frames_at_floor = frames(&[(0, 15), (255, 30)], fps);
        let scenes = segment_frames(&frames_at_floor, fps, 1.5, &config);
        assert_eq!(scenes, vec![Scene::new(0.0, 1.5)]);

        let frames_past_floor = frames(&[(0, 16), (255, 30)], fps);
        let scenes = segment_frames(&frames_past_floor, fps, 46.0 / fps, &config);
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[1].start, 16.0 / fps);
    }

    #[test]
    fn test_no_cut_yields_single_scene() {
        let fps = 25.0;
        let frames = frames(&[(40, 100)], fps);
        let scenes = segment_frames(&frames, fps, 4.0, &SceneConfig::default());
        assert_eq!(scenes, vec![Scene::new(0.0, 4.0)]);
    }

    #[test]
    fn test_empty_input_yields_single_scene() {
        let scenes = segment_frames(&[], 30.0, 10.0, &SceneConfig::default());
        assert_eq!(scenes, vec![Scene::new(0.0, 10.0)]);
    }

    #[test]
    fn test_scenes_always_tile_the_duration() {
        // Deterministic pseudo-random brightness sequence
        let fps = 24.0;
        let mut state: u32 = 12345;
        let mut values = Vec::new();
        for _ in 0..40 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            values.push(((state >> 16) % 256) as u8);
        }

        for min_scene_frames in [1, 5, 15] {
            let config = SceneConfig {
                min_scene_frames,
                ..Default::default()
            };
            let frames: Vec<Frame> = values
                .iter()
                .enumerate()
                .map(|(i, &v)| solid(i as u64 * 6, fps, v))
                .collect();
            let duration = 240.0 / fps;
            let scenes = segment_frames(&frames, fps, duration, &config);
            assert_covers(&scenes, duration);
        }
    }

    #[test]
    fn test_mean_abs_diff() {
        assert_eq!(mean_abs_diff(&[0, 10], &[10, 0]), 10.0);
        assert_eq!(mean_abs_diff(&[0], &[0, 0]), 255.0);
    }
}
