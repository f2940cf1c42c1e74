//! Decoded frames and the Frame Extractor.

use async_trait::async_trait;
use image::RgbImage;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::io::VideoIo;
use crate::probe::VideoInfo;

/// One decoded frame. Never persisted.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Source frame number
    pub index: u64,
    /// Presentation time in seconds
    pub timestamp: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, timestamp: f64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Wrap a packed RGB buffer.
    pub fn from_rgb(index: u64, timestamp: f64, width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            MediaError::internal(format!("RGB buffer does not match {}x{}", width, height))
        })?;
        Ok(Self::new(index, timestamp, image))
    }
}

/// Which frames to decode and at what size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRequest {
    /// Keep every `stride`-th frame; 1 keeps all of them
    pub stride: u64,
    /// Downscale to this size when set
    pub size: Option<(u32, u32)>,
}

impl FrameRequest {
    pub fn every(stride: u64) -> Self {
        Self {
            stride: stride.max(1),
            size: None,
        }
    }

    pub fn scaled(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    /// Output frame dimensions for a source of the given size.
    pub fn output_size(&self, info: &VideoInfo) -> (u32, u32) {
        self.size.unwrap_or((info.width, info.height))
    }
}

impl Default for FrameRequest {
    fn default() -> Self {
        Self::every(1)
    }
}

/// Ordered, index-aligned frame source.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// Frames held in memory, yielded in order.
pub struct MemoryFrameStream {
    frames: VecDeque<Frame>,
}

impl MemoryFrameStream {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }
}

#[async_trait]
impl FrameStream for MemoryFrameStream {
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Decodes a video into ordered frames at a configurable stride.
#[derive(Clone)]
pub struct FrameExtractor {
    io: Arc<dyn VideoIo>,
}

impl FrameExtractor {
    pub fn new(io: Arc<dyn VideoIo>) -> Self {
        Self { io }
    }

    /// Open a stream of frames. Frame `k` of the stream is source frame `k * stride`.
    pub async fn stream(
        &self,
        path: &Path,
        info: &VideoInfo,
        request: FrameRequest,
    ) -> MediaResult<Box<dyn FrameStream>> {
        debug!(
            stride = request.stride,
            size = ?request.size,
            "Opening frame stream for {}",
            path.display()
        );
        self.io.frames(path, info, request).await
    }

    /// Decode all requested frames into memory.
    pub async fn collect(
        &self,
        path: &Path,
        info: &VideoInfo,
        request: FrameRequest,
    ) -> MediaResult<Vec<Frame>> {
        let mut stream = self.stream(path, info, request).await?;
        let expected = info.frame_count.div_ceil(request.stride.max(1));
        let mut frames = Vec::with_capacity(expected as usize);
        while let Some(frame) = stream.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }
}
