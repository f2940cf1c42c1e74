//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reel_identity::{ClusteringConfig, MergeRule};
use reel_media::SceneConfig;
use reel_models::{CanvasSize, EncodingConfig};

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Work directory for thumbnails and rendered output
    pub work_dir: PathBuf,
    /// Output canvas
    pub canvas: CanvasSize,
    /// Keep every N-th frame when sampling faces for clustering
    pub sample_stride: u64,
    /// Faces smaller than this on either side are ignored for clustering
    pub min_face_size: f64,
    /// Bounding box padding applied before cropping into a slot
    pub padding_ratio: f64,
    /// Upper bound on the reduced-space distance of a runtime identity match
    pub match_max_distance: Option<f64>,
    /// FFmpeg timeout per invocation
    pub ffmpeg_timeout: Duration,
    pub clustering: ClusteringConfig,
    pub scene: SceneConfig,
    pub encoding: EncodingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/reel"),
            canvas: CanvasSize::default(),
            sample_stride: 25,
            min_face_size: 60.0,
            padding_ratio: reel_media::compositor::DEFAULT_PADDING_RATIO,
            match_max_distance: None,
            ffmpeg_timeout: Duration::from_secs(3600),
            clustering: ClusteringConfig::default(),
            scene: SceneConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }
}

/// `None` when unset; a value that is set but does not parse is an error.
fn env_parse<T>(key: &str) -> WorkerResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| WorkerError::config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

/// Parse a JSON list of merge rules, e.g. `[{"min_cosine":0.9}]`. An empty list disables merging.
pub fn parse_merge_rules(raw: &str) -> WorkerResult<Vec<MergeRule>> {
    serde_json::from_str(raw).map_err(|e| WorkerError::config(format!("REEL_MERGE_RULES: {}", e)))
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are rejected.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let mut clustering = defaults.clustering.clone();
        if let Some(v) = env_parse("REEL_CLUSTER_MIN_SIZE")? {
            clustering.min_cluster_size = v;
        }
        if let Some(v) = env_parse("REEL_CLUSTER_MIN_SAMPLES")? {
            clustering.min_samples = v;
        }
        if let Some(v) = env_parse("REEL_CLUSTER_EPSILON")? {
            clustering.selection_epsilon = v;
        }
        if let Some(v) = env_parse("REEL_PCA_COMPONENTS")? {
            clustering.components = v;
        }
        if let Ok(raw) = std::env::var("REEL_MERGE_RULES") {
            clustering.merge.rules = parse_merge_rules(&raw)?;
        }

        let mut scene = defaults.scene.clone();
        if let Some(v) = env_parse("REEL_SCENE_THRESHOLD")? {
            scene.threshold = v;
        }
        if let Some(v) = env_parse("REEL_SCENE_MIN_FRAMES")? {
            scene.min_scene_frames = v;
        }

        let mut encoding = defaults.encoding.clone();
        if let Some(crf) = env_parse("REEL_CRF")? {
            encoding = encoding.with_crf(crf);
        }
        if let Ok(preset) = std::env::var("REEL_PRESET") {
            encoding.preset = preset;
        }
        if env_parse::<bool>("REEL_USE_NVENC")?.unwrap_or(false) {
            encoding = encoding.with_nvenc();
        }

        let canvas = match (env_parse("REEL_CANVAS_WIDTH")?, env_parse("REEL_CANVAS_HEIGHT")?) {
            (Some(w), Some(h)) => CanvasSize::new(w, h),
            (None, None) => defaults.canvas,
            _ => {
                return Err(WorkerError::config(
                    "REEL_CANVAS_WIDTH and REEL_CANVAS_HEIGHT must be set together",
                ))
            }
        };

        Ok(Self {
            work_dir: std::env::var("REEL_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            canvas,
            sample_stride: env_parse("REEL_SAMPLE_STRIDE")?.unwrap_or(defaults.sample_stride),
            min_face_size: env_parse("REEL_MIN_FACE_SIZE")?.unwrap_or(defaults.min_face_size),
            padding_ratio: env_parse("REEL_PADDING_RATIO")?.unwrap_or(defaults.padding_ratio),
            match_max_distance: env_parse("REEL_MATCH_MAX_DISTANCE")?,
            ffmpeg_timeout: Duration::from_secs(
                env_parse("REEL_FFMPEG_TIMEOUT")?.unwrap_or(defaults.ffmpeg_timeout.as_secs()),
            ),
            clustering,
            scene,
            encoding,
        })
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.canvas.width < 2 || self.canvas.height < 2 {
            return Err(WorkerError::config(format!(
                "canvas {}x{} is too small",
                self.canvas.width, self.canvas.height
            )));
        }
        if self.canvas.width % 2 != 0 || self.canvas.height % 2 != 0 {
            return Err(WorkerError::config("canvas dimensions must be even for yuv420p"));
        }
        if self.sample_stride == 0 {
            return Err(WorkerError::config("sample stride must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.clustering.temporal_weight) {
            return Err(WorkerError::config("temporal weight must be within [0, 1]"));
        }
        if self.padding_ratio < 0.0 || !self.padding_ratio.is_finite() {
            return Err(WorkerError::config("padding ratio must be non-negative"));
        }
        Ok(())
    }

    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("processed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.sample_stride, 25);
        assert_eq!(config.canvas, CanvasSize::new(1080, 1920));
        assert_eq!(config.min_face_size, 60.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_odd_canvas() {
        let config = WorkerConfig {
            canvas: CanvasSize::new(1081, 1920),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_rules_from_json() {
        let rules = parse_merge_rules(r#"[{"min_cosine": 0.9}, {"max_l2": 0.4, "min_overlap": 0.8}]"#).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], MergeRule::cosine_above(0.9));

        let err = parse_merge_rules("{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("REEL_MERGE_RULES"));

        assert!(parse_merge_rules("[]").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_env_is_rejected() {
        std::env::set_var("REEL_MERGE_RULES", "{not json");
        let result = WorkerConfig::from_env();
        std::env::remove_var("REEL_MERGE_RULES");
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("REEL_MERGE_RULES"));

        std::env::set_var("REEL_TEST_STRIDE", "every other");
        let parsed = env_parse::<u64>("REEL_TEST_STRIDE");
        std::env::set_var("REEL_TEST_STRIDE", " 4 ");
        assert_eq!(env_parse::<u64>("REEL_TEST_STRIDE").unwrap(), Some(4));
        std::env::remove_var("REEL_TEST_STRIDE");
        assert!(parsed.is_err());
        assert_eq!(env_parse::<u64>("REEL_TEST_STRIDE").unwrap(), None);
    }

    #[test]
    fn test_validate_rejects_zero_stride() {
        let config = WorkerConfig {
            sample_stride: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
