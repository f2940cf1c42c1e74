//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Video file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Exact frame rate: frame count over duration when both are known
    pub fps: f64,
    /// Container-declared rate, possibly rounded
    pub nominal_fps: f64,
    /// Number of decodable video frames
    pub frame_count: u64,
    /// Whether the file carries an audio stream
    pub has_audio: bool,
    /// Video codec
    pub codec: String,
}

impl VideoInfo {
    /// Timestamp in seconds of source frame `index`.
    pub fn timestamp(&self, index: u64) -> f64 {
        if self.fps > 0.0 {
            index as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Probe a video file for information.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Build [`VideoInfo`] from raw `ffprobe -print_format json` output.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video("No video stream found"))?;
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let stream_duration = parse_positive(video_stream.duration.as_deref());
    let format_duration = parse_positive(probe.format.duration.as_deref());
    let duration = stream_duration
        .or(format_duration)
        .ok_or_else(|| MediaError::invalid_video("Video has no duration"))?;

    let nb_frames = video_stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&n| n > 0);

    let avg = video_stream.avg_frame_rate.as_deref().and_then(parse_frame_rate);
    let nominal = video_stream.r_frame_rate.as_deref().and_then(parse_frame_rate);

    let fps = exact_fps(nb_frames, duration, avg, nominal)
        .ok_or_else(|| MediaError::invalid_video("Unable to determine frame rate"))?;

    let frame_count = nb_frames.unwrap_or_else(|| (duration * fps).round() as u64);
    if frame_count == 0 {
        return Err(MediaError::invalid_video("Video has no frames"));
    }

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_video("Video stream has no dimensions"));
    }

    debug!(
        duration,
        fps,
        frame_count,
        has_audio,
        "Probed video {}x{}",
        width,
        height
    );

    Ok(VideoInfo {
        duration,
        width,
        height,
        fps,
        nominal_fps: nominal.or(avg).unwrap_or(fps),
        frame_count,
        has_audio,
        codec: video_stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Choose the encode rate: `nb_frames / duration`, then the average rate, then the nominal one.
pub fn exact_fps(
    nb_frames: Option<u64>,
    duration: f64,
    avg_frame_rate: Option<f64>,
    r_frame_rate: Option<f64>,
) -> Option<f64> {
    if let Some(frames) = nb_frames {
        if duration > 0.0 {
            return Some(frames as f64 / duration);
        }
    }

    if let Some(avg) = avg_frame_rate {
        warn!(avg, "Frame count unavailable, using average frame rate");
        return Some(avg);
    }

    if let Some(nominal) = r_frame_rate {
        warn!(nominal, "Frame count unavailable, using nominal frame rate");
        return Some(nominal);
    }

    None
}

fn parse_positive(s: Option<&str>) -> Option<f64> {
    s.and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse frame rate string (e.g., "30/1" or "29.97"). Zero rates ("0/0") yield `None`.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let rate = if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den <= 0.0 {
            return None;
        }
        num / den
    } else {
        s.parse().ok()?
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}
