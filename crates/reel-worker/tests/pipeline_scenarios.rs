//! End-to-end job runs over a synthetic video, a scripted detector and an
//! in-memory store. No FFmpeg needed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tokio::sync::watch;

use reel_media::{
    EncodeRequest, FaceDetector, Frame, FrameCompositor, FrameRequest, FrameSink, FrameStream,
    LayoutKind, LayoutTemplate, MediaError, MediaResult, MemoryFrameStream, Transcriber, VideoInfo,
    VideoIo,
};
use reel_models::{
    BoundingBox, CanvasSize, Detection, EncodingConfig, Identity, IdentityId, Job, JobId,
    JobStage, JobStatus, JobType, TimedSegment, Video, VideoId, VideoStatus,
};
use reel_worker::{
    Capabilities, ErrorKind, IdentitySet, JobOutcome, JobStore, MemoryStore, Pipeline,
    RenderReport, StoreResult, WorkerConfig,
};

const FPS: f64 = 10.0;
const FRAMES: u64 = 100;
const WIDTH: u32 = 160;
const HEIGHT: u32 = 90;
/// First frame of each scene
const CUTS: [u64; 3] = [0, 33, 66];
const DIM: usize = 16;

fn scene_of(index: u64) -> usize {
    CUTS.iter().rposition(|&c| index >= c).unwrap_or(0)
}

fn source_frame(index: u64) -> RgbImage {
    let value = if scene_of(index) == 1 { 200 } else { 30 };
    let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([value, value, value]));
    // Some texture so crops differ from the background and from each other
    for x in 0..WIDTH {
        image.put_pixel(x, (index % HEIGHT as u64) as u32, Rgb([value / 2, 90, 160]));
        for y in (0..HEIGHT).filter(|y| (x + y) % 9 == 0) {
            image.put_pixel(x, y, Rgb([x as u8, value / 3, 40]));
        }
    }
    image
}

fn info() -> VideoInfo {
    VideoInfo {
        duration: FRAMES as f64 / FPS,
        width: WIDTH,
        height: HEIGHT,
        fps: FPS,
        nominal_fps: FPS,
        frame_count: FRAMES,
        has_audio: true,
        codec: "h264".into(),
    }
}

#[derive(Default)]
struct Encoded {
    request: Option<EncodeRequest>,
    frames: Vec<RgbImage>,
    aborted: bool,
    subtitles: Option<String>,
}

/// In-memory video: frames are generated, encoded frames are recorded.
struct SyntheticIo {
    encoded: Arc<Mutex<Encoded>>,
    corrupt: bool,
    fail_encode_after: Option<usize>,
    /// Full-resolution decodes stop after this many frames even though the
    /// reported `VideoInfo` says `FRAMES`
    decoded_frames: Option<u64>,
}

impl SyntheticIo {
    fn new() -> Self {
        Self {
            encoded: Arc::new(Mutex::new(Encoded::default())),
            corrupt: false,
            fail_encode_after: None,
            decoded_frames: None,
        }
    }
}

#[async_trait]
impl VideoIo for SyntheticIo {
    async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
        if self.corrupt {
            return Err(MediaError::invalid_video("moov atom not found"));
        }
        Ok(info())
    }

    async fn frames(
        &self,
        _path: &Path,
        _info: &VideoInfo,
        request: FrameRequest,
    ) -> MediaResult<Box<dyn FrameStream>> {
        let last = match (request.size, self.decoded_frames) {
            (None, Some(n)) => n.min(FRAMES),
            _ => FRAMES,
        };
        let frames: Vec<Frame> = (0..last)
            .step_by(request.stride.max(1) as usize)
            .map(|index| {
                let mut image = source_frame(index);
                if let Some((w, h)) = request.size {
                    image = imageops::resize(&image, w, h, FilterType::Nearest);
                }
                Frame::new(index, index as f64 / FPS, image)
            })
            .collect();
        Ok(Box::new(MemoryFrameStream::new(frames)))
    }

    async fn encoder(&self, request: EncodeRequest) -> MediaResult<Box<dyn FrameSink>> {
        self.encoded.lock().unwrap().request = Some(request.clone());
        Ok(Box::new(RecordingSink {
            encoded: self.encoded.clone(),
            output: request.output,
            fail_after: self.fail_encode_after,
            written: 0,
        }))
    }

    async fn burn_subtitles(
        &self,
        input: &Path,
        subtitles: &Path,
        output: &Path,
        _encoding: &EncodingConfig,
    ) -> MediaResult<()> {
        let srt = tokio::fs::read_to_string(subtitles).await?;
        self.encoded.lock().unwrap().subtitles = Some(srt);
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}

struct RecordingSink {
    encoded: Arc<Mutex<Encoded>>,
    output: PathBuf,
    fail_after: Option<usize>,
    written: u64,
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn write_frame(&mut self, frame: &RgbImage) -> MediaResult<()> {
        let mut encoded = self.encoded.lock().unwrap();
        if Some(encoded.frames.len()) == self.fail_after {
            return Err(MediaError::ffmpeg_failed("broken pipe", None, Some(1)));
        }
        encoded.frames.push(frame.clone());
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> MediaResult<PathBuf> {
        tokio::fs::write(&self.output, b"synthetic mp4").await?;
        Ok(self.output.clone())
    }

    async fn abort(&mut self) {
        self.encoded.lock().unwrap().aborted = true;
        let _ = tokio::fs::remove_file(&self.output).await;
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

/// Small deterministic jitter in `[-0.05, 0.05)`.
fn jitter(seed: u64) -> f32 {
    let x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    ((x >> 33) % 1000) as f32 / 10000.0 - 0.05
}

fn embedding(sign: f32, seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|j| {
            let base = if j % 2 == 0 { sign } else { -sign };
            base + jitter(seed * 31 + j as u64)
        })
        .collect()
}

/// Row `row` of the 16x16 Sylvester-Hadamard matrix plus jitter. Distinct rows
/// differ in half of their dimensions and have zero cosine similarity.
fn hadamard_embedding(row: usize, seed: u64) -> Vec<f32> {
    (0..DIM)
        .map(|j| {
            let base = if (row & j).count_ones() % 2 == 0 { 1.0 } else { -1.0 };
            base + jitter(seed * 31 + j as u64)
        })
        .collect()
}

/// Five people side by side for the whole video, most confident first.
const CROWD: usize = 5;

fn crowd_box(person: usize) -> BoundingBox {
    BoundingBox::new(5.0 + 30.0 * person as f64, 5.0 + 10.0 * person as f64, 25.0, 25.0)
}

fn crowd_confidence(person: usize) -> f64 {
    0.95 - 0.05 * person as f64
}

enum Cast {
    Nobody,
    /// Person A is on screen throughout; person B sits out the middle scene
    Pair,
    Crowd,
}

struct ScriptedDetector {
    cast: Cast,
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>> {
        match self.cast {
            Cast::Nobody => return Ok(Vec::new()),
            Cast::Crowd => {
                return Ok((0..CROWD)
                    .map(|person| {
                        Detection::new(crowd_box(person), crowd_confidence(person))
                            .with_embedding(hadamard_embedding(person + 1, frame.index * 8 + person as u64))
                    })
                    .collect())
            }
            Cast::Pair => {}
        }
        let mut faces = vec![Detection::new(BoundingBox::new(10.0, 10.0, 40.0, 40.0), 0.9)
            .with_embedding(embedding(1.0, frame.index * 2))];
        if scene_of(frame.index) != 1 {
            faces.push(
                Detection::new(BoundingBox::new(100.0, 20.0, 40.0, 40.0), 0.8)
                    .with_embedding(embedding(-1.0, frame.index * 2 + 1)),
            );
        }
        // A box without an embedding is never clustered
        faces.push(Detection::new(BoundingBox::new(60.0, 50.0, 30.0, 30.0), 0.99));
        Ok(faces)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedTranscriber;

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _video: &Path) -> MediaResult<Vec<TimedSegment>> {
        Ok(vec![
            TimedSegment::new(0.5, 2.25, "hello there"),
            TimedSegment::new(4.0, 6.123, "second line"),
        ])
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Delegates to [`MemoryStore`] and records every progress checkpoint.
struct RecordingStore {
    inner: MemoryStore,
    progress: Mutex<Vec<f64>>,
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn get_job(&self, id: &JobId) -> StoreResult<Job> {
        self.inner.get_job(id).await
    }

    async fn get_video(&self, id: &VideoId) -> StoreResult<Video> {
        self.inner.get_video(id).await
    }

    async fn start(&self, id: &JobId) -> StoreResult<Job> {
        self.inner.start(id).await
    }

    async fn checkpoint(&self, id: &JobId, stage: JobStage, progress: Option<f64>) -> StoreResult<f64> {
        let stored = self.inner.checkpoint(id, stage, progress).await?;
        if progress.is_some() {
            self.progress.lock().unwrap().push(stored);
        }
        Ok(stored)
    }

    async fn complete(&self, id: &JobId, processed_path: Option<String>) -> StoreResult<Job> {
        self.inner.complete(id, processed_path).await
    }

    async fn fail(&self, id: &JobId, message: &str) -> StoreResult<Job> {
        self.inner.fail(id, message).await
    }

    async fn save_identities(&self, video_id: &VideoId, set: IdentitySet) -> StoreResult<()> {
        self.inner.save_identities(video_id, set).await
    }

    async fn load_identities(&self, video_id: &VideoId) -> StoreResult<Option<IdentitySet>> {
        self.inner.load_identities(video_id).await
    }

    async fn update_thumbnail(&self, id: &IdentityId, path: String) -> StoreResult<()> {
        self.inner.update_thumbnail(id, path).await
    }
}

struct Harness {
    work: tempfile::TempDir,
    config: WorkerConfig,
    io: Arc<SyntheticIo>,
    store: Arc<RecordingStore>,
    video: Video,
}

impl Harness {
    async fn new(io: SyntheticIo) -> Self {
        let work = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            work_dir: work.path().to_path_buf(),
            canvas: CanvasSize::new(108, 192),
            sample_stride: 2,
            min_face_size: 20.0,
            ..Default::default()
        };
        let store = Arc::new(RecordingStore {
            inner: MemoryStore::new(),
            progress: Mutex::new(Vec::new()),
        });
        let video = Video::new("/uploads/interview.mp4");
        store.inner.insert_video(video.clone()).await;

        Self {
            work,
            config,
            io: Arc::new(io),
            store,
            video,
        }
    }

    fn pipeline(&self, capabilities: Capabilities) -> Pipeline {
        Pipeline::new(
            self.config.clone(),
            self.io.clone(),
            self.store.clone(),
            Arc::new(capabilities),
        )
    }

    async fn job(&self, job_type: JobType, selected: Vec<IdentityId>, captions: bool) -> Job {
        let job = Job::new(self.video.id.clone(), job_type)
            .with_selection(selected)
            .with_captions(captions);
        self.store.inner.insert_job(job.clone()).await.unwrap();
        job
    }

    async fn detect(&self, pipeline: &Pipeline) -> Vec<Identity> {
        let job = self.job(JobType::IdentityDetection, Vec::new(), false).await;
        match pipeline.run(&job.id).await.unwrap() {
            JobOutcome::Identities(report) => report.identities,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

fn people() -> Capabilities {
    Capabilities::new(Arc::new(ScriptedDetector { cast: Cast::Pair }))
}

fn nobody() -> Capabilities {
    Capabilities::new(Arc::new(ScriptedDetector { cast: Cast::Nobody }))
}

fn crowd() -> Capabilities {
    Capabilities::new(Arc::new(ScriptedDetector { cast: Cast::Crowd }))
}

fn rendered(outcome: JobOutcome) -> RenderReport {
    match outcome {
        JobOutcome::Rendered(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_no_faces_renders_full_frames() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(nobody());
    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;

    let report = match pipeline.run(&job.id).await.unwrap() {
        JobOutcome::Rendered(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    let stored = harness.store.get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress, 100.0);

    let identities = harness.store.load_identities(&harness.video.id).await.unwrap().unwrap();
    assert!(identities.identities.is_empty());
    assert_eq!(report.identities, 0);
    assert!(report.decisions.iter().all(|d| d.kind == LayoutKind::FullFrame));

    let compositor = FrameCompositor::new(harness.config.canvas, harness.config.padding_ratio);
    let encoded = harness.io.encoded.lock().unwrap();
    assert_eq!(encoded.frames.len() as u64, FRAMES);
    for (index, frame) in encoded.frames.iter().enumerate() {
        assert_eq!(*frame, compositor.fit_full_frame(&source_frame(index as u64)));
    }

    let request = encoded.request.as_ref().unwrap();
    assert_eq!(request.fps, FPS);
    assert_eq!((request.width, request.height), (108, 192));
    assert!(request.audio_source.is_some());

    let video = harness.store.get_video(&harness.video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Completed);
    let output = PathBuf::from(video.processed_path.unwrap());
    assert_eq!(output, report.output);
    assert!(output.exists());
}

#[tokio::test]
async fn test_two_people_three_scenes() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(people());

    let identities = harness.detect(&pipeline).await;
    assert_eq!(identities.len(), 2);
    let thumbnails = harness
        .work
        .path()
        .join("thumbnails")
        .join(harness.video.id.as_str());
    for identity in &identities {
        let thumbnail = Path::new(identity.thumbnail_path.as_deref().unwrap());
        assert!(thumbnail.exists());
        assert_eq!(thumbnail.parent(), Some(thumbnails.as_path()));
    }
    let video = harness.store.get_video(&harness.video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Uploaded);
    assert!(video.processed_path.is_none());

    // Both selected: both present, one absent from the middle scene
    let all: Vec<IdentityId> = identities.iter().map(|i| i.id.clone()).collect();
    let job = harness.job(JobType::HighlightRender, all, false).await;
    let report = match pipeline.run(&job.id).await.unwrap() {
        JobOutcome::Rendered(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(report.scenes.len(), 3);
    assert_eq!(report.decisions.len(), 3);
    let kinds: Vec<LayoutKind> = report.decisions.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![LayoutKind::Dual, LayoutKind::Single, LayoutKind::Dual]);

    // A is on screen throughout, so it has the larger cluster; its detections
    // are also the more confident (0.9 vs 0.8), which gives it the top slot
    let a = identities.iter().max_by_key(|i| i.member_count).unwrap();
    assert_eq!(report.decisions[0].identities[0], a.id);
    assert_eq!(report.decisions[1].identities, vec![a.id.clone()]);

    // Identities are reused, never re-clustered
    let stored = harness.store.load_identities(&harness.video.id).await.unwrap().unwrap();
    assert_eq!(stored.identities.len(), 2);

    let encoded = harness.io.encoded.lock().unwrap();
    assert_eq!(encoded.frames.len() as u64, FRAMES);
    assert!(encoded.frames.iter().all(|f| f.dimensions() == (108, 192)));
}

#[tokio::test]
async fn test_selection_limits_layout() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(people());
    let identities = harness.detect(&pipeline).await;

    let b = identities.iter().min_by_key(|i| i.member_count).unwrap();
    let job = harness.job(JobType::HighlightRender, vec![b.id.clone()], false).await;
    let report = match pipeline.run(&job.id).await.unwrap() {
        JobOutcome::Rendered(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };

    let kinds: Vec<LayoutKind> = report.decisions.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![LayoutKind::Single, LayoutKind::FullFrame, LayoutKind::Single]);
}

#[tokio::test]
async fn test_render_clusters_when_no_identities_are_stored() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(people());

    // Nothing selected yet, so every scene is full frame
    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;
    let report = match pipeline.run(&job.id).await.unwrap() {
        JobOutcome::Rendered(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(report.identities, 2);
    assert_eq!(report.decisions.len(), 3);
    assert!(report.decisions.iter().all(|d| d.identities.is_empty()));

    let stored = harness.store.load_identities(&harness.video.id).await.unwrap().unwrap();
    assert_eq!(stored.identities.len(), 2);
    assert!(stored.projection.is_some());
}

#[tokio::test]
async fn test_progress_is_checkpointed_per_scene() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(nobody());
    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;
    pipeline.run(&job.id).await.unwrap();

    let progress = harness.store.progress.lock().unwrap().clone();
    assert_eq!(progress.len(), 3);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress[0], 33.0);
    assert_eq!(*progress.last().unwrap(), 100.0);
}

#[tokio::test]
async fn test_clustering_is_deterministic() {
    let first = Harness::new(SyntheticIo::new()).await;
    let second = Harness::new(SyntheticIo::new()).await;

    let a = first.detect(&first.pipeline(people())).await;
    let b = second.detect(&second.pipeline(people())).await;

    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.label, y.label);
        assert_eq!(x.member_count, y.member_count);
        assert_eq!(x.first_seen, y.first_seen);
        assert_eq!(x.embedding, y.embedding);
    }
}

#[tokio::test]
async fn test_corrupt_source_fails_job_and_video() {
    let io = SyntheticIo {
        corrupt: true,
        ..SyntheticIo::new()
    };
    let harness = Harness::new(io).await;
    let pipeline = harness.pipeline(people());
    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let stored = harness.store.get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.processed_video_path.is_none());
    assert!(stored.error_message.is_some());

    let video = harness.store.get_video(&harness.video.id).await.unwrap();
    assert_eq!(video.status, VideoStatus::Failed);
    assert!(video.processed_path.is_none());
}

#[tokio::test]
async fn test_encode_failure_leaves_no_output() {
    let io = SyntheticIo {
        fail_encode_after: Some(40),
        ..SyntheticIo::new()
    };
    let harness = Harness::new(io).await;
    let pipeline = harness.pipeline(nobody());
    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encode);

    let encoded = harness.io.encoded.lock().unwrap();
    assert!(encoded.aborted);
    let output = encoded.request.as_ref().unwrap().output.clone();
    assert!(!output.exists());
    drop(encoded);

    let stored = harness.store.get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.processed_video_path.is_none());
}

#[tokio::test]
async fn test_missing_projection_is_fatal() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let identity = Identity::new(harness.video.id.clone(), 0, vec![0.5; 4]);
    harness
        .store
        .save_identities(
            &harness.video.id,
            IdentitySet {
                projection: None,
                identities: vec![identity.clone()],
            },
        )
        .await
        .unwrap();

    let pipeline = harness.pipeline(people());
    let job = harness.job(JobType::HighlightRender, vec![identity.id], false).await;
    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingProjection);
    assert_eq!(
        harness.store.get_job(&job.id).await.unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn test_captions_are_burned_in() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(nobody().with_transcriber(Arc::new(ScriptedTranscriber)));
    let job = harness.job(JobType::HighlightRender, Vec::new(), true).await;

    let report = match pipeline.run(&job.id).await.unwrap() {
        JobOutcome::Rendered(report) => report,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(report.caption_segments, 2);
    assert!(report.output.exists());

    let encoded = harness.io.encoded.lock().unwrap();
    let srt = encoded.subtitles.as_deref().unwrap();
    assert!(srt.contains("00:00:00,500 --> 00:00:02,250"));
    assert!(srt.contains("00:00:04,000 --> 00:00:06,123"));

    let compiled = encoded.request.as_ref().unwrap().output.clone();
    assert!(!compiled.exists());
}

#[tokio::test]
async fn test_captions_without_transcriber_fail() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(nobody());
    let job = harness.job(JobType::HighlightRender, Vec::new(), true).await;

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[tokio::test]
async fn test_cancelled_job_fails() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let (tx, rx) = watch::channel(false);
    let pipeline = harness.pipeline(people()).with_cancel(rx);
    tx.send(true).unwrap();

    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;
    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(
        harness.store.get_job(&job.id).await.unwrap().status,
        JobStatus::Failed
    );
}

#[tokio::test]
async fn test_finished_job_cannot_rerun() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(nobody());
    let job = harness.job(JobType::IdentityDetection, Vec::new(), false).await;
    pipeline.run(&job.id).await.unwrap();

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);
    // Still completed
    assert_eq!(
        harness.store.get_job(&job.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn test_job_for_deleted_video_is_failed() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(nobody());
    let job = harness.job(JobType::HighlightRender, Vec::new(), false).await;
    harness.store.inner.remove_video(&harness.video.id).await.unwrap();

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Store);

    let stored = harness.store.get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error_message.unwrap().contains("video not found"));
    assert!(harness.io.encoded.lock().unwrap().request.is_none());
}

#[tokio::test]
async fn test_single_selection_is_laid_out_from_each_scene_start() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(people());
    let identities = harness.detect(&pipeline).await;
    let a = identities.iter().max_by_key(|i| i.member_count).unwrap();

    let job = harness.job(JobType::HighlightRender, vec![a.id.clone()], false).await;
    let report = rendered(pipeline.run(&job.id).await.unwrap());

    assert_eq!(report.decisions.len(), report.scenes.len());
    for decision in &report.decisions {
        assert_eq!(decision.kind, LayoutKind::Single);
        assert_eq!(decision.identities, vec![a.id.clone()]);
    }

    // A's box at each scene's first frame fills the canvas for the whole scene
    let compositor = FrameCompositor::new(harness.config.canvas, harness.config.padding_ratio);
    let template = LayoutTemplate::for_count(1, harness.config.canvas);
    let a_box = BoundingBox::new(10.0, 10.0, 40.0, 40.0);
    let encoded = harness.io.encoded.lock().unwrap();
    for index in [0, 32, 33, 65, 66, 99] {
        let expected = compositor.compose(&source_frame(index), &[a_box], &template);
        assert_eq!(encoded.frames[index as usize], expected, "frame {}", index);
    }
}

#[tokio::test]
async fn test_crowd_keeps_four_most_confident_in_grid() {
    let harness = Harness::new(SyntheticIo::new()).await;
    let pipeline = harness.pipeline(crowd());
    let identities = harness.detect(&pipeline).await;
    assert_eq!(identities.len(), CROWD);

    let all: Vec<IdentityId> = identities.iter().map(|i| i.id.clone()).collect();
    let job = harness.job(JobType::HighlightRender, all, false).await;
    let report = rendered(pipeline.run(&job.id).await.unwrap());

    assert_eq!(report.decisions.len(), report.scenes.len());
    let shown = report.decisions[0].identities.clone();
    assert_eq!(shown.len(), 4);
    assert_eq!(shown.iter().collect::<HashSet<_>>().len(), 4);
    for decision in &report.decisions {
        assert_eq!(decision.kind, LayoutKind::Grid);
        assert_eq!(decision.identities, shown);
    }

    // Slots hold the four most confident people, most confident first;
    // the fifth is dropped
    let compositor = FrameCompositor::new(harness.config.canvas, harness.config.padding_ratio);
    let template = LayoutTemplate::for_count(CROWD, harness.config.canvas);
    assert_eq!(template.kind, LayoutKind::Grid);
    let boxes: Vec<BoundingBox> = (0..4).map(crowd_box).collect();
    let encoded = harness.io.encoded.lock().unwrap();
    for cut in CUTS {
        let expected = compositor.compose(&source_frame(cut), &boxes, &template);
        assert_eq!(encoded.frames[cut as usize], expected, "frame {}", cut);
    }
}

#[tokio::test]
async fn test_short_decode_still_reports_every_scene() {
    let io = SyntheticIo {
        decoded_frames: Some(50),
        ..SyntheticIo::new()
    };
    let harness = Harness::new(io).await;
    let pipeline = harness.pipeline(people());
    let identities = harness.detect(&pipeline).await;
    assert_eq!(identities.len(), 2);

    let all: Vec<IdentityId> = identities.iter().map(|i| i.id.clone()).collect();
    let job = harness.job(JobType::HighlightRender, all, false).await;
    let report = rendered(pipeline.run(&job.id).await.unwrap());

    // The last scene starts at frame 66, after the decode ran out
    assert_eq!(report.frames, 50);
    assert_eq!(report.scenes.len(), 3);
    assert_eq!(report.decisions.len(), 3);
    let kinds: Vec<LayoutKind> = report.decisions.iter().map(|d| d.kind).collect();
    assert_eq!(kinds, vec![LayoutKind::Dual, LayoutKind::Single, LayoutKind::FullFrame]);
    assert!(report.decisions[2].identities.is_empty());
    assert_eq!(report.decisions[2].scene_index, 2);
}
