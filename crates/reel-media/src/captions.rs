//! Caption pipeline: timed text to SRT and back, and subtitle burn-in.

use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

use reel_models::{EncodingConfig, TimedSegment};

use crate::capability::Transcriber;
use crate::error::{MediaError, MediaResult};
use crate::io::VideoIo;

/// Format seconds as an SRT timestamp `HH:MM:SS,mmm`, rounded to the millisecond.
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        ms
    )
}

/// Parse an SRT timestamp `HH:MM:SS,mmm` (a `.` separator is also accepted).
pub fn parse_srt_timestamp(timestamp: &str) -> MediaResult<f64> {
    let invalid = || MediaError::Subtitle(format!("invalid timestamp '{}'", timestamp));

    let parts: Vec<&str> = timestamp.trim().split([':', ',', '.']).collect();
    if parts.len() != 4 {
        return Err(invalid());
    }

    let mut values = [0u64; 4];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part.parse().map_err(|_| invalid())?;
    }
    let [hours, minutes, seconds, millis] = values;
    if minutes >= 60 || seconds >= 60 || millis >= 1000 {
        return Err(invalid());
    }

    let total_ms = ((hours * 60 + minutes) * 60 + seconds) * 1000 + millis;
    Ok(total_ms as f64 / 1000.0)
}

/// Render segments as an SRT document. Empty-text segments are skipped.
pub fn segments_to_srt(segments: &[TimedSegment]) -> String {
    let mut out = String::new();
    let mut sequence = 1;
    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            sequence,
            format_srt_timestamp(segment.start),
            format_srt_timestamp(segment.end.max(segment.start)),
            text
        );
        sequence += 1;
    }
    out
}

/// Parse an SRT document into segments.
pub fn parse_srt(content: &str) -> MediaResult<Vec<TimedSegment>> {
    let normalized = content.replace("\r\n", "\n");
    let normalized = normalized.trim_start_matches('\u{feff}');
    let mut segments = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.is_empty() {
            continue;
        }

        // The sequence number line is optional in the wild
        let timing_idx = if lines[0].contains("-->") { 0 } else { 1 };
        let Some(timing) = lines.get(timing_idx) else {
            continue;
        };
        let (start, end) = timing
            .split_once("-->")
            .ok_or_else(|| MediaError::Subtitle(format!("missing timing line in block '{}'", block.trim())))?;

        segments.push(TimedSegment {
            start: parse_srt_timestamp(start)?,
            end: parse_srt_timestamp(end)?,
            text: lines[timing_idx + 1..].join("\n"),
        });
    }

    Ok(segments)
}

/// FFmpeg `subtitles` filter for a file path, escaped for the filtergraph parser.
pub fn subtitles_filter(path: &Path) -> String {
    let escaped = path
        .to_string_lossy()
        .replace('\\', "\\\\\\\\")
        .replace(':', "\\\\:")
        .replace('\'', "\\\\\\'")
        .replace(',', "\\,")
        .replace('[', "\\[")
        .replace(']', "\\]");
    format!("subtitles={}", escaped)
}

/// Transcribe `input`, write its SRT next to `output`, and burn the captions in.
///
/// Returns the number of caption segments. With no speech the input is copied
/// to `output` unchanged.
pub async fn burn_captions(
    io: &dyn VideoIo,
    transcriber: &dyn Transcriber,
    input: &Path,
    output: &Path,
    encoding: &EncodingConfig,
) -> MediaResult<usize> {
    let segments = transcriber.transcribe(input).await?;
    let srt = segments_to_srt(&segments);
    let count = parse_srt(&srt)?.len();

    if count == 0 {
        warn!("No speech transcribed, skipping caption burn-in");
        tokio::fs::copy(input, output).await?;
        return Ok(0);
    }

    let srt_path = output.with_extension("srt");
    tokio::fs::write(&srt_path, srt).await?;

    info!(segments = count, transcriber = transcriber.name(), "Burning captions");
    let result = io.burn_subtitles(input, &srt_path, output, encoding).await;
    let _ = tokio::fs::remove_file(&srt_path).await;
    result?;

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_srt_timestamp() {
        assert_eq!(parse_srt_timestamp("00:00:00,000").unwrap(), 0.0);
        assert_eq!(parse_srt_timestamp("00:00:02,500").unwrap(), 2.5);
        assert_eq!(parse_srt_timestamp("00:01:30,250").unwrap(), 90.25);
        assert_eq!(parse_srt_timestamp("01:00:00,000").unwrap(), 3600.0);
        assert!(parse_srt_timestamp("00:61:00,000").is_err());
        assert!(parse_srt_timestamp("garbage").is_err());
    }

    #[test]
    fn test_format_srt_timestamp() {
        assert_eq!(format_srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_srt_timestamp(3661.002), "01:01:01,002");
        assert_eq!(format_srt_timestamp(59.9996), "00:01:00,000");
        assert_eq!(format_srt_timestamp(-1.0), "00:00:00,000");
    }

    #[test]
    fn test_srt_round_trip_within_a_millisecond() {
        let segments = vec![
            TimedSegment::new(0.0, 1.2344, "Hello"),
            TimedSegment::new(1.2344, 4.9996, "two\nlines"),
            TimedSegment::new(3599.9991, 3723.456, "late"),
        ];

        let recovered = parse_srt(&segments_to_srt(&segments)).unwrap();
        assert_eq!(recovered.len(), segments.len());
        for (a, b) in segments.iter().zip(&recovered) {
            assert!((a.start - b.start).abs() <= 0.001, "{} vs {}", a.start, b.start);
            assert!((a.end - b.end).abs() <= 0.001);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn test_empty_segments_are_dropped() {
        let srt = segments_to_srt(&[
            TimedSegment::new(0.0, 1.0, "  "),
            TimedSegment::new(1.0, 2.0, "kept"),
        ]);
        assert!(srt.starts_with("1\n00:00:01,000 --> 00:00:02,000\nkept"));
    }

    #[test]
    fn test_parse_srt_with_crlf_and_no_sequence() {
        let content = "\u{feff}00:00:01,000 --> 00:00:02,000\r\nhi\r\n\r\n";
        let segments = parse_srt(content).unwrap();
        assert_eq!(segments, vec![TimedSegment::new(1.0, 2.0, "hi")]);
    }

    #[test]
    fn test_subtitles_filter_escapes_path() {
        let filter = subtitles_filter(Path::new("/tmp/a:b,c.srt"));
        assert_eq!(filter, "subtitles=/tmp/a\\\\:b\\,c.srt");
    }
}
