//! Video Compiler: canvas frames plus the original audio into one file.

use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::info;

use reel_models::{CanvasSize, EncodingConfig};

use crate::error::{MediaError, MediaResult};
use crate::io::{EncodeRequest, FrameSink, VideoIo};
use crate::probe::VideoInfo;

/// Encodes composited frames at the source's exact frame rate.
#[derive(Debug, Clone)]
pub struct VideoCompiler {
    canvas: CanvasSize,
    encoding: EncodingConfig,
}

impl VideoCompiler {
    pub fn new(canvas: CanvasSize, encoding: EncodingConfig) -> Self {
        Self { canvas, encoding }
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }

    /// Open a streaming encoder for `source`'s timeline.
    ///
    /// Uses `source_info.fps`, the exact rate, and muxes the source audio when present.
    pub async fn encoder(
        &self,
        io: &dyn VideoIo,
        source: &Path,
        source_info: &VideoInfo,
        output: &Path,
    ) -> MediaResult<Box<dyn FrameSink>> {
        if !(source_info.fps.is_finite() && source_info.fps > 0.0) {
            return Err(MediaError::invalid_video(format!(
                "cannot encode at {} fps",
                source_info.fps
            )));
        }

        let request = EncodeRequest {
            output: output.to_path_buf(),
            audio_source: source_info.has_audio.then(|| source.to_path_buf()),
            width: self.canvas.width,
            height: self.canvas.height,
            fps: source_info.fps,
            encoding: self.encoding.clone(),
        };
        io.encoder(request).await
    }

    /// Encode a complete frame sequence. On error nothing is left at `output`.
    pub async fn compile<I>(
        &self,
        io: &dyn VideoIo,
        frames: I,
        source: &Path,
        source_info: &VideoInfo,
        output: &Path,
    ) -> MediaResult<PathBuf>
    where
        I: IntoIterator<Item = RgbImage> + Send,
        I::IntoIter: Send,
    {
        let mut sink = self.encoder(io, source, source_info, output).await?;

        for frame in frames {
            if let Err(e) = sink.write_frame(&frame).await {
                sink.abort().await;
                return Err(e);
            }
        }

        let written = sink.frames_written();
        let path = match sink.finish().await {
            Ok(path) => path,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };
        info!(
            frames = written,
            fps = source_info.fps,
            "Compiled {}",
            path.display()
        );
        Ok(path)
    }
}

impl Default for VideoCompiler {
    fn default() -> Self {
        Self::new(CanvasSize::default(), EncodingConfig::default())
    }
}
