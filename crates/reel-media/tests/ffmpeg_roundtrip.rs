//! End-to-end checks against real FFmpeg binaries.

use std::path::Path;
use std::process::Command;

use reel_media::{
    FfmpegVideoIo, FrameCompositor, FrameExtractor, FrameRequest, LayoutTemplate, VideoCompiler,
    VideoIo,
};
use reel_models::{CanvasSize, EncodingConfig};
use std::sync::Arc;

/// 2 s of 320x180 test pattern at 30000/1001 fps with a sine tone.
fn make_source(path: &Path) {
    let status = Command::new("ffmpeg")
        .args([
            "-y", "-v", "error",
            "-f", "lavfi", "-i", "testsrc=size=320x180:rate=30000/1001:duration=2",
            "-f", "lavfi", "-i", "sine=frequency=440:duration=2",
            "-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "aac", "-shortest",
        ])
        .arg(path)
        .status()
        .expect("ffmpeg runs");
    assert!(status.success());
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_probe_extract_and_recompile() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    make_source(&source);

    let io = Arc::new(FfmpegVideoIo::new());
    let info = io.probe(&source).await.unwrap();
    assert!(info.has_audio);
    assert!((info.fps - 29.97).abs() < 0.05);

    let extractor = FrameExtractor::new(io.clone());
    let all = extractor.collect(&source, &info, FrameRequest::every(1)).await.unwrap();
    assert_eq!(all.len() as u64, info.frame_count);

    let sampled = extractor.collect(&source, &info, FrameRequest::every(25)).await.unwrap();
    let indices: Vec<u64> = sampled.iter().map(|f| f.index).collect();
    assert_eq!(indices, vec![0, 25, 50]);

    let canvas = CanvasSize::new(180, 320);
    let compositor = FrameCompositor::new(canvas, 0.2);
    let template = LayoutTemplate::for_count(0, canvas);
    let frames = all.iter().map(|f| compositor.compose(&f.image, &[], &template));

    let output = dir.path().join("reel.mp4");
    VideoCompiler::new(canvas, EncodingConfig::default())
        .compile(io.as_ref(), frames.collect::<Vec<_>>(), &source, &info, &output)
        .await
        .unwrap();

    let compiled = io.probe(&output).await.unwrap();
    assert_eq!((compiled.width, compiled.height), (180, 320));
    assert!(compiled.has_audio);
    assert!((compiled.duration - info.duration).abs() < 0.1);
}

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_corrupt_container_fails_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let bogus = dir.path().join("bogus.mp4");
    std::fs::write(&bogus, b"definitely not a video").unwrap();

    let io = FfmpegVideoIo::new();
    let err = io.probe(&bogus).await.unwrap_err();
    assert!(err.is_input_failure());
}
