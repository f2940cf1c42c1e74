//! Parsing of FFmpeg `-progress` key/value blocks.

use serde::{Deserialize, Serialize};

/// State accumulated from `-progress` output; one snapshot per block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub fps: f64,
    /// Output position in milliseconds
    pub out_time_ms: i64,
    /// Multiple of realtime
    pub speed: f64,
    /// Set by the final `progress=end` block
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fold one `key=value` line into the state.
    ///
    /// Returns `true` when the line closes a block, i.e. a snapshot is ready.
    pub fn apply(&mut self, line: &str) -> bool {
        let Some((key, value)) = line.trim().split_once('=') else {
            return false;
        };
        match key {
            // Both keys carry microseconds
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.out_time_ms = us / 1000;
                }
            }
            "frame" => self.frame = value.parse().unwrap_or(self.frame),
            "fps" => self.fps = value.parse().unwrap_or(self.fps),
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                    self.speed = speed;
                }
            }
            "progress" => {
                self.is_complete = value == "end";
                return true;
            }
            _ => {}
        }
        false
    }

    /// Output position as a share of `duration` seconds, in percent.
    pub fn percent_of(&self, duration: f64) -> f64 {
        if !(duration > 0.0) {
            return 0.0;
        }
        (self.out_time_ms as f64 / (duration * 1000.0) * 100.0).clamp(0.0, 100.0)
    }
}
