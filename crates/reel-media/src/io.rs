//! The seam between the pipeline and the video toolchain.
//!
//! [`VideoIo`] covers everything the pipeline needs from a container: probing,
//! decoding to RGB frames, encoding RGB frames with the source audio, and burning
//! subtitles. [`FfmpegVideoIo`] drives the `ffmpeg`/`ffprobe` binaries.

use async_trait::async_trait;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use reel_models::EncodingConfig;

use crate::captions::subtitles_filter;
use crate::command::{collect_stderr, FfmpegCommand, FfmpegRunner, STDIN, STDOUT};
use crate::error::{MediaError, MediaResult};
use crate::frames::{Frame, FrameRequest, FrameStream};
use crate::probe::{probe_video, VideoInfo};

/// Parameters for encoding a stream of canvas frames.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub output: PathBuf,
    /// File whose audio track is muxed into the output unmodified
    pub audio_source: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    /// Exact output frame rate
    pub fps: f64,
    pub encoding: EncodingConfig,
}

/// Consumer of encoded frames. `finish` must be called for the output to be valid.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()>;

    /// Flush and close the output; fails if the encoder did not exit cleanly.
    async fn finish(&mut self) -> MediaResult<PathBuf>;

    /// Stop encoding and remove whatever was written.
    async fn abort(&mut self);

    fn frames_written(&self) -> u64;
}

/// Container-level operations used by the pipeline.
#[async_trait]
pub trait VideoIo: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    async fn frames(
        &self,
        path: &Path,
        info: &VideoInfo,
        request: FrameRequest,
    ) -> MediaResult<Box<dyn FrameStream>>;

    async fn encoder(&self, request: EncodeRequest) -> MediaResult<Box<dyn FrameSink>>;

    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        output: &Path,
        encoding: &EncodingConfig,
    ) -> MediaResult<()>;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

/// [`VideoIo`] backed by the FFmpeg command line tools.
#[derive(Default)]
pub struct FfmpegVideoIo {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
}

impl FfmpegVideoIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort long-running FFmpeg invocations when the signal flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    fn runner(&self) -> FfmpegRunner {
        let mut runner = FfmpegRunner::new();
        if let Some(rx) = &self.cancel_rx {
            runner = runner.with_cancel(rx.clone());
        }
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }
        runner
    }
}

/// Decode filter keeping every `stride`-th frame, optionally scaled.
fn decode_filter(request: &FrameRequest) -> Option<String> {
    let mut filters = Vec::new();
    if request.stride > 1 {
        filters.push(format!("select='not(mod(n\\,{}))'", request.stride));
    }
    if let Some((w, h)) = request.size {
        filters.push(format!("scale={}:{}", w, h));
    }
    (!filters.is_empty()).then(|| filters.join(","))
}

#[async_trait]
impl VideoIo for FfmpegVideoIo {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path).await
    }

    async fn frames(
        &self,
        path: &Path,
        info: &VideoInfo,
        request: FrameRequest,
    ) -> MediaResult<Box<dyn FrameStream>> {
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let (width, height) = request.output_size(info);
        let mut cmd = FfmpegCommand::new(path, STDOUT)
            .input_arg("-noautorotate")
            .without_progress()
            .output_args(["-an", "-sn", "-fps_mode", "passthrough"]);
        if let Some(filter) = decode_filter(&request) {
            cmd = cmd.video_filter(filter);
        }
        let cmd = cmd.raw_rgb_output();

        let mut child = cmd.spawn(Stdio::null(), Stdio::piped())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdout not captured"))?;
        let stderr = tokio::spawn(collect_stderr(child.stderr.take()));

        Ok(Box::new(FfmpegFrameStream {
            child: Some(child),
            stdout,
            stderr: Some(stderr),
            width,
            height,
            stride: request.stride.max(1),
            fps: info.fps,
            position: 0,
        }))
    }

    async fn encoder(&self, request: EncodeRequest) -> MediaResult<Box<dyn FrameSink>> {
        if !(request.fps.is_finite() && request.fps > 0.0) {
            return Err(MediaError::internal(format!("invalid encode fps {}", request.fps)));
        }
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = FfmpegCommand::new(STDIN, &request.output)
            .without_progress()
            .input_args([
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgb24".to_string(),
                "-s".to_string(),
                format!("{}x{}", request.width, request.height),
                "-framerate".to_string(),
                format!("{:.9}", request.fps),
            ]);

        cmd = match &request.audio_source {
            Some(source) => cmd.add_input(source).map("0:v").map("1:a?"),
            None => cmd.map("0:v"),
        };

        let cmd = cmd
            .output_args(request.encoding.video_args())
            .output_args(request.encoding.audio_args())
            .output_args(request.encoding.extra_args.clone())
            .output_args(["-movflags", "+faststart"]);

        let mut child = cmd.spawn(Stdio::piped(), Stdio::null())?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stdin not captured"))?;
        let stderr = tokio::spawn(collect_stderr(child.stderr.take()));

        info!(
            fps = request.fps,
            width = request.width,
            height = request.height,
            "Encoding to {}",
            request.output.display()
        );

        Ok(Box::new(FfmpegFrameSink {
            child: Some(child),
            stdin: Some(stdin),
            stderr: Some(stderr),
            output: request.output,
            frame_len: request.width as usize * request.height as usize * 3,
            written: 0,
        }))
    }

    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        output: &Path,
        encoding: &EncodingConfig,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(input, output)
            .video_filter(subtitles_filter(subtitles))
            .map("0:v")
            .map("0:a?")
            .output_args(encoding.video_args())
            .audio_codec("copy");

        let duration = probe_video(input).await.map(|info| info.duration).unwrap_or(0.0);
        let runner = self.runner();
        let run = runner.run_with_progress(&cmd, move |progress| {
            debug!(
                percent = progress.percent_of(duration),
                speed = progress.speed,
                "Caption burn-in progress"
            );
        });
        if let Err(e) = run.await {
            let _ = tokio::fs::remove_file(output).await;
            return Err(e);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Raw RGB frames read from an FFmpeg child's stdout.
struct FfmpegFrameStream {
    child: Option<Child>,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<Option<String>>>,
    width: u32,
    height: u32,
    stride: u64,
    fps: f64,
    /// Frames yielded so far
    position: u64,
}

impl FfmpegFrameStream {
    /// Reap the decoder once stdout is exhausted; a failing exit means a corrupt input.
    async fn finish(&mut self) -> MediaResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => None,
        };

        if !status.success() {
            return Err(MediaError::InvalidVideo(format!(
                "decoder exited with {:?}: {}",
                status.code(),
                stderr.unwrap_or_default()
            )));
        }
        if self.position == 0 {
            return Err(MediaError::invalid_video("no frames could be decoded"));
        }
        debug!(frames = self.position, "Frame stream finished");
        Ok(())
    }
}

#[async_trait]
impl FrameStream for FfmpegFrameStream {
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.child.is_none() {
            return Ok(None);
        }

        let frame_len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            let n = self.stdout.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            self.finish().await?;
            return Ok(None);
        }
        if filled < frame_len {
            if let Some(mut child) = self.child.take() {
                let _ = child.kill().await;
            }
            return Err(MediaError::InvalidVideo(format!(
                "truncated frame: {} of {} bytes",
                filled, frame_len
            )));
        }

        let index = self.position * self.stride;
        self.position += 1;
        let timestamp = if self.fps > 0.0 { index as f64 / self.fps } else { 0.0 };
        Frame::from_rgb(index, timestamp, self.width, self.height, buf).map(Some)
    }
}

/// Raw RGB frames written to an FFmpeg child's stdin.
struct FfmpegFrameSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<Option<String>>>,
    output: PathBuf,
    frame_len: usize,
    written: u64,
}

#[async_trait]
impl FrameSink for FfmpegFrameSink {
    async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        if frame.as_raw().len() != self.frame_len {
            return Err(MediaError::internal(format!(
                "frame is {}x{}, encoder expects {} bytes",
                frame.width(),
                frame.height(),
                self.frame_len
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::internal("encoder already closed"))?;

        if let Err(e) = stdin.write_all(frame.as_raw()).await {
            // A closed pipe means the encoder died; its exit status carries the reason
            warn!("Encoder pipe closed after {} frames: {}", self.written, e);
            self.stdin = None;
            return Err(self.finish().await.err().unwrap_or(MediaError::Io(e)));
        }
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> MediaResult<PathBuf> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().await?;
        }
        let Some(mut child) = self.child.take() else {
            return Err(MediaError::internal("encoder already finished"));
        };

        let status = child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => None,
        };

        if !status.success() {
            let _ = tokio::fs::remove_file(&self.output).await;
            return Err(MediaError::ffmpeg_failed(
                "encoder exited with non-zero status",
                stderr,
                status.code(),
            ));
        }

        debug!(frames = self.written, "Encoder finished {}", self.output.display());
        Ok(self.output.clone())
    }

    async fn abort(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
        if let Err(e) = tokio::fs::remove_file(&self.output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial output {}: {}", self.output.display(), e);
            }
        }
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}
