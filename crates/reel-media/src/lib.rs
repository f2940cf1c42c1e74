//! FFmpeg CLI plumbing and pixel stages for the highlight reel pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with cancellation and progress parsing
//! - Exact frame-rate probing
//! - Frame extraction, scene segmentation, layout selection and composition
//! - Streaming re-encode with the original audio, SRT captions and burn-in
//! - The `VideoIo`, `FaceDetector` and `Transcriber` seams

pub mod capability;
pub mod captions;
pub mod command;
pub mod compiler;
pub mod compositor;
pub mod error;
pub mod frames;
pub mod io;
pub mod layout;
pub mod probe;
pub mod progress;
pub mod scene;
pub mod thumbnail;

pub use capability::{FaceDetector, Transcriber};
pub use captions::{burn_captions, parse_srt, segments_to_srt};
pub use command::{FfmpegCommand, FfmpegRunner};
pub use compiler::VideoCompiler;
pub use compositor::FrameCompositor;
pub use error::{MediaError, MediaResult};
pub use frames::{Frame, FrameExtractor, FrameRequest, FrameStream, MemoryFrameStream};
pub use io::{EncodeRequest, FfmpegVideoIo, FrameSink, VideoIo};
pub use layout::{prioritize, select_layout, LayoutDecision, LayoutKind, LayoutTemplate, Slot};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use scene::{segment_frames, segment_stream, SceneConfig, SceneSegmenter};
pub use thumbnail::{face_crop, write_identity_thumbnail};
