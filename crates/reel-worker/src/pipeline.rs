//! Job Orchestrator: runs the stages of one job in order and owns its status.
//!
//! Stages run strictly sequentially:
//!
//! 1. extraction (sampled frames through the detector)
//! 2. clustering, or identity lookup when the video was already clustered
//! 3. segmentation
//! 4. composition, streamed frame by frame into the encoder
//! 5. compilation, then captioning when requested
//!
//! Only [`Pipeline::run`] moves the job between statuses. Stage functions
//! return a [`WorkerError`] whose [`ErrorKind`](crate::error::ErrorKind)
//! tells the caller what went wrong; every error is fatal for the job.

use std::collections::HashSet;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use reel_identity::{EmbeddingSample, IdentityClusterer, IdentityMatcher};
use reel_media::{
    burn_captions, face_crop, prioritize, segment_stream, write_identity_thumbnail, Frame,
    FrameCompositor, FrameExtractor, FrameRequest, FrameSink, LayoutDecision, LayoutKind,
    LayoutTemplate, VideoCompiler, VideoInfo, VideoIo,
};
use reel_models::{BoundingBox, Identity, IdentityId, Job, JobId, JobStage, JobType, Scene, Video};

use crate::capabilities::Capabilities;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::store::{IdentitySet, JobStore};

/// Result of an identity detection job.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityReport {
    pub identities: Vec<Identity>,
    /// Embeddings that passed the size filter
    pub samples: usize,
    /// Samples left out of every identity
    pub noise: usize,
    /// Identities were already stored for the video
    pub reused: bool,
}

/// Result of a highlight render job.
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub output: PathBuf,
    pub scenes: Vec<Scene>,
    /// One per scene, in scene order
    pub decisions: Vec<LayoutDecision>,
    pub frames: u64,
    pub identities: usize,
    pub caption_segments: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobOutcome {
    Identities(IdentityReport),
    Rendered(RenderReport),
}

impl JobOutcome {
    fn processed_path(&self) -> Option<String> {
        match self {
            JobOutcome::Identities(_) => None,
            JobOutcome::Rendered(report) => Some(report.output.to_string_lossy().into_owned()),
        }
    }
}

/// Identities for a video plus how they were obtained.
struct ClusterRun {
    set: IdentitySet,
    samples: usize,
    noise: usize,
    reused: bool,
}

/// Layout fixed at a scene's first frame and applied to all of its frames.
struct SceneLayout {
    scene_index: usize,
    template: LayoutTemplate,
    boxes: Vec<BoundingBox>,
}

pub struct Pipeline {
    config: WorkerConfig,
    io: Arc<dyn VideoIo>,
    store: Arc<dyn JobStore>,
    capabilities: Arc<Capabilities>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    pub fn new(
        config: WorkerConfig,
        io: Arc<dyn VideoIo>,
        store: Arc<dyn JobStore>,
        capabilities: Arc<Capabilities>,
    ) -> Self {
        Self {
            config,
            io,
            store,
            capabilities,
            cancel: None,
        }
    }

    /// Checked between scenes and between sampled frames; `true` cancels the job.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Execute a pending job to a terminal status.
    ///
    /// On failure the job and its video are marked failed, partial output is
    /// removed, and the original error is returned. Nothing is retried.
    pub async fn run(&self, job_id: &JobId) -> WorkerResult<JobOutcome> {
        let job = self.store.get_job(job_id).await?;
        let logger = JobLogger::new(&job.id, &job.video_id, job.job_type.as_str());
        let span = logger.create_span();

        async move {
            let (job, video) = match self.begin(&job).await {
                Ok(started) => started,
                // Finished jobs are left as they are
                Err(e) if job.status.is_terminal() => return Err(e),
                Err(e) => return Err(self.record_failure(&job, &logger, e).await),
            };
            logger.log_start(&video.upload_path);

            let started = Instant::now();
            let result = match job.job_type {
                JobType::IdentityDetection => self
                    .detect_identities(&job, &video)
                    .await
                    .map(JobOutcome::Identities),
                JobType::HighlightRender => self.render(&job, &video).await.map(JobOutcome::Rendered),
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fail(&job, &video, &logger, e).await),
            };

            if let Err(e) = self.store.complete(&job.id, outcome.processed_path()).await {
                return Err(self.fail(&job, &video, &logger, e.into()).await);
            }

            metrics::record_job(job.job_type.as_str(), "completed");
            logger.log_completion(started.elapsed().as_secs_f64());
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Load the video and move the job to `in_progress`.
    async fn begin(&self, job: &Job) -> WorkerResult<(Job, Video)> {
        let video = self.store.get_video(&job.video_id).await?;
        let job = self.store.start(&job.id).await?;
        Ok((job, video))
    }

    /// Remove partial output, then record the failure.
    async fn fail(&self, job: &Job, video: &Video, logger: &JobLogger, error: WorkerError) -> WorkerError {
        if job.job_type == JobType::HighlightRender {
            let (compiled, output) = self.output_paths(job, video);
            for path in [compiled, output] {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!("Removed partial output {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                }
            }
        }

        self.record_failure(job, logger, error).await
    }

    async fn record_failure(&self, job: &Job, logger: &JobLogger, error: WorkerError) -> WorkerError {
        logger.log_failure(&error);
        if let Err(store_err) = self.store.fail(&job.id, &error.to_string()).await {
            logger.log_warning(&format!("could not record failure: {}", store_err));
        }
        metrics::record_job(job.job_type.as_str(), "failed");
        error
    }

    /// Sample the video and cluster the people in it, or return the identities
    /// already stored for the video.
    pub async fn detect_identities(&self, job: &Job, video: &Video) -> WorkerResult<IdentityReport> {
        let logger = JobLogger::new(&job.id, &video.id, JobType::IdentityDetection.as_str());

        if let Some(set) = self.lookup(job, &logger).await? {
            return Ok(IdentityReport {
                identities: set.identities,
                samples: 0,
                noise: 0,
                reused: true,
            });
        }

        let source = PathBuf::from(&video.upload_path);
        let info = self.io.probe(&source).await.map_err(WorkerError::from_read)?;
        let run = self.cluster(job, video, &source, &info, &logger).await?;

        Ok(IdentityReport {
            identities: run.set.identities,
            samples: run.samples,
            noise: run.noise,
            reused: run.reused,
        })
    }

    /// Produce the vertical highlight reel for a job's selected identities.
    pub async fn render(&self, job: &Job, video: &Video) -> WorkerResult<RenderReport> {
        let logger = JobLogger::new(&job.id, &video.id, JobType::HighlightRender.as_str());

        if job.captions && self.capabilities.transcriber.is_none() {
            return Err(WorkerError::config(
                "captions requested but no transcriber is configured",
            ));
        }

        let source = PathBuf::from(&video.upload_path);
        let info = self.io.probe(&source).await.map_err(WorkerError::from_read)?;
        info!(
            fps = info.fps,
            duration = info.duration,
            frames = info.frame_count,
            audio = info.has_audio,
            "Probed source"
        );

        let run = match self.lookup(job, &logger).await? {
            Some(set) => ClusterRun {
                set,
                samples: 0,
                noise: 0,
                reused: true,
            },
            None => self.cluster(job, video, &source, &info, &logger).await?,
        };
        let matcher = self.matcher(&run.set)?;
        let selected: HashSet<IdentityId> = job.selected_identities.iter().cloned().collect();

        let scenes = self.segment(job, &source, &info, &logger).await?;

        let (compiled, output) = self.output_paths(job, video);
        if let Some(dir) = output.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        self.enter_stage(job, &logger, JobStage::Composition).await?;
        let stage_started = Instant::now();
        let compiler = VideoCompiler::new(self.config.canvas, self.config.encoding.clone());
        let mut sink = compiler
            .encoder(self.io.as_ref(), &source, &info, &compiled)
            .await
            .map_err(WorkerError::from_write)?;

        let composed = self
            .compose(job, &logger, &source, &info, &scenes, matcher.as_ref(), &selected, sink.as_mut())
            .await;
        let (decisions, frames) = match composed {
            Ok(v) => v,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };
        metrics::record_stage_duration(JobStage::Composition.as_str(), stage_started.elapsed().as_secs_f64());
        metrics::record_frames_composited(frames);

        self.enter_stage(job, &logger, JobStage::Compilation).await?;
        let stage_started = Instant::now();
        sink.finish().await.map_err(WorkerError::from_write)?;
        metrics::record_stage_duration(JobStage::Compilation.as_str(), stage_started.elapsed().as_secs_f64());

        let caption_segments = match (&self.capabilities.transcriber, job.captions) {
            (Some(transcriber), true) => {
                self.enter_stage(job, &logger, JobStage::Captioning).await?;
                let stage_started = Instant::now();
                let count = burn_captions(
                    self.io.as_ref(),
                    transcriber.as_ref(),
                    &compiled,
                    &output,
                    compiler.encoding(),
                )
                .await
                .map_err(WorkerError::from_write)?;
                tokio::fs::remove_file(&compiled).await?;
                metrics::record_stage_duration(
                    JobStage::Captioning.as_str(),
                    stage_started.elapsed().as_secs_f64(),
                );
                count
            }
            _ => {
                tokio::fs::rename(&compiled, &output).await?;
                0
            }
        };

        logger.log_progress(&format!(
            "rendered {} frames over {} scenes to {}",
            frames,
            scenes.len(),
            output.display()
        ));

        Ok(RenderReport {
            output,
            scenes,
            decisions,
            frames,
            identities: run.set.identities.len(),
            caption_segments,
        })
    }

    async fn lookup(&self, job: &Job, logger: &JobLogger) -> WorkerResult<Option<IdentitySet>> {
        self.enter_stage(job, logger, JobStage::IdentityLookup).await?;
        let set = self.store.load_identities(&job.video_id).await?;
        if let Some(set) = &set {
            info!(identities = set.identities.len(), "Using stored identities");
        }
        Ok(set)
    }

    /// Extraction and clustering. Identities are written once, with thumbnails.
    async fn cluster(
        &self,
        job: &Job,
        video: &Video,
        source: &Path,
        info: &VideoInfo,
        logger: &JobLogger,
    ) -> WorkerResult<ClusterRun> {
        self.enter_stage(job, logger, JobStage::Extraction).await?;
        let stage_started = Instant::now();
        let (samples, crops) = self.sample_faces(source, info).await?;
        metrics::record_stage_duration(JobStage::Extraction.as_str(), stage_started.elapsed().as_secs_f64());

        self.enter_stage(job, logger, JobStage::Clustering).await?;
        let stage_started = Instant::now();
        let sample_count = samples.len();
        let clusterer = IdentityClusterer::new(self.config.clustering.clone());
        let outcome = tokio::task::spawn_blocking(move || clusterer.cluster(&samples))
            .await
            .map_err(|e| WorkerError::internal(format!("clustering task failed: {}", e)))??;

        if outcome.is_empty() {
            logger.log_warning(&format!(
                "no identities from {} samples, scenes fall back to the full frame",
                sample_count
            ));
        }

        let mut identities = Vec::with_capacity(outcome.identities.len());
        for clustered in outcome.identities {
            let label = clustered.label;
            let crop = crops.get(clustered.representative).ok_or_else(|| {
                WorkerError::internal(format!("representative {} has no crop", clustered.representative))
            })?;
            let mut identity = clustered.into_identity(&video.id);
            match write_identity_thumbnail(crop, &self.config.work_dir, &video.id, label).await {
                Ok(path) => identity.thumbnail_path = Some(path.to_string_lossy().into_owned()),
                Err(e) => logger.log_warning(&format!("thumbnail for identity {}: {}", label, e)),
            }
            identities.push(identity);
        }

        let set = IdentitySet {
            projection: outcome.projection,
            identities,
        };
        self.store.save_identities(&video.id, set.clone()).await?;

        metrics::record_identities_created(set.identities.len());
        metrics::record_stage_duration(JobStage::Clustering.as_str(), stage_started.elapsed().as_secs_f64());
        info!(
            identities = set.identities.len(),
            samples = sample_count,
            noise = outcome.noise,
            raw_clusters = outcome.raw_clusters,
            "Clustered identities"
        );

        Ok(ClusterRun {
            set,
            samples: sample_count,
            noise: outcome.noise,
            reused: false,
        })
    }

    /// Run the detector over every `sample_stride`-th frame. Positions are
    /// normalised sampling ordinals in `[0, 1)`.
    async fn sample_faces(
        &self,
        source: &Path,
        info: &VideoInfo,
    ) -> WorkerResult<(Vec<EmbeddingSample>, Vec<RgbImage>)> {
        let extractor = FrameExtractor::new(Arc::clone(&self.io));
        let mut stream = extractor
            .stream(source, info, FrameRequest::every(self.config.sample_stride))
            .await
            .map_err(WorkerError::from_read)?;

        let mut samples = Vec::new();
        let mut crops = Vec::new();
        let mut sampled: u64 = 0;
        let mut too_small = 0usize;
        let mut without_embedding = 0usize;

        while let Some(frame) = stream.next_frame().await.map_err(WorkerError::from_read)? {
            self.ensure_not_cancelled()?;
            let detections = self
                .capabilities
                .detector
                .detect(&frame)
                .await
                .map_err(WorkerError::from_read)?;

            for detection in detections {
                let Some(embedding) = detection.embedding else {
                    without_embedding += 1;
                    continue;
                };
                if detection.bbox.min_side() < self.config.min_face_size {
                    too_small += 1;
                    continue;
                }
                let Some(crop) = face_crop(&frame.image, &detection.bbox) else {
                    continue;
                };
                samples.push(EmbeddingSample::new(frame.timestamp, sampled as f64, embedding));
                crops.push(crop);
            }
            sampled += 1;
        }

        let denominator = sampled.max(1) as f64;
        for sample in &mut samples {
            sample.position /= denominator;
        }

        info!(
            sampled_frames = sampled,
            samples = samples.len(),
            too_small,
            without_embedding,
            detector = self.capabilities.detector.name(),
            "Sampled faces"
        );
        Ok((samples, crops))
    }

    fn matcher(&self, set: &IdentitySet) -> WorkerResult<Option<IdentityMatcher>> {
        if set.identities.is_empty() {
            return Ok(None);
        }
        let projection = set.projection.clone().ok_or_else(|| {
            WorkerError::missing_projection(format!(
                "{} identities are stored without a projection",
                set.identities.len()
            ))
        })?;
        let matcher = IdentityMatcher::new(projection, set.identities.clone(), self.config.match_max_distance)?;
        Ok(Some(matcher))
    }

    async fn segment(
        &self,
        job: &Job,
        source: &Path,
        info: &VideoInfo,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<Scene>> {
        self.enter_stage(job, logger, JobStage::Segmentation).await?;
        let stage_started = Instant::now();
        let (width, height) = self.config.scene.analysis_size;
        let extractor = FrameExtractor::new(Arc::clone(&self.io));
        let mut stream = extractor
            .stream(source, info, FrameRequest::every(1).scaled(width, height))
            .await
            .map_err(WorkerError::from_read)?;
        let scenes = segment_stream(stream.as_mut(), info.fps, info.duration, &self.config.scene)
            .await
            .map_err(WorkerError::from_read)?;
        metrics::record_stage_duration(JobStage::Segmentation.as_str(), stage_started.elapsed().as_secs_f64());
        self.ensure_not_cancelled()?;
        Ok(scenes)
    }

    /// Stream every source frame through its scene's layout into `sink`.
    ///
    /// Returns one decision per scene and the number of frames written.
    #[allow(clippy::too_many_arguments)]
    async fn compose(
        &self,
        job: &Job,
        logger: &JobLogger,
        source: &Path,
        info: &VideoInfo,
        scenes: &[Scene],
        matcher: Option<&IdentityMatcher>,
        selected: &HashSet<IdentityId>,
        sink: &mut dyn FrameSink,
    ) -> WorkerResult<(Vec<LayoutDecision>, u64)> {
        let total_frames = total_frames(info);
        let ranges: Vec<Range<u64>> = scenes
            .iter()
            .map(|scene| scene.frame_range(info.fps, total_frames))
            .collect();

        let compositor = FrameCompositor::new(self.config.canvas, self.config.padding_ratio);
        let extractor = FrameExtractor::new(Arc::clone(&self.io));
        let mut stream = extractor
            .stream(source, info, FrameRequest::every(1))
            .await
            .map_err(WorkerError::from_read)?;

        let mut decisions = Vec::with_capacity(scenes.len());
        let mut layout: Option<SceneLayout> = None;
        let mut written: u64 = 0;

        while let Some(frame) = stream.next_frame().await.map_err(WorkerError::from_read)? {
            let from = layout.as_ref().map_or(0, |l| l.scene_index);
            let scene_index = scene_at(&ranges, frame.index, from);

            let current = match layout.take() {
                Some(l) if l.scene_index == scene_index => l,
                _ => {
                    let (decision, next) = self.decide(scene_index, &frame, matcher, selected).await?;
                    debug!(
                        scene = scene_index,
                        layout = decision.kind.as_str(),
                        identities = decision.identities.len(),
                        "Scene layout"
                    );
                    decisions.push(decision);
                    next
                }
            };

            let canvas = render_frame(&compositor, &current, frame.image).await?;
            sink.write_frame(&canvas).await.map_err(WorkerError::from_write)?;
            written += 1;

            let scene_done = ranges
                .get(scene_index)
                .is_some_and(|range| frame.index + 1 >= range.end && scene_index + 1 < ranges.len());
            layout = Some(current);

            if scene_done {
                self.scene_checkpoint(job, logger, scene_index, written, total_frames).await?;
            }
        }

        if let Some(last) = &layout {
            self.scene_checkpoint(job, logger, last.scene_index, written, total_frames).await?;
        }

        let decided = decisions.len();
        let decisions = with_undecoded_scenes(decisions, scenes.len());
        if decided < decisions.len() {
            logger.log_warning(&format!(
                "{} of {} scenes had no decoded frames and are reported as full frame",
                decisions.len() - decided,
                decisions.len()
            ));
        }
        Ok((decisions, written))
    }

    /// Detect and match at a scene's first frame, keeping selected identities only.
    async fn decide(
        &self,
        scene_index: usize,
        frame: &Frame,
        matcher: Option<&IdentityMatcher>,
        selected: &HashSet<IdentityId>,
    ) -> WorkerResult<(LayoutDecision, SceneLayout)> {
        let mut active: Vec<(IdentityId, BoundingBox, f64)> = Vec::new();

        if let Some(matcher) = matcher.filter(|_| !selected.is_empty()) {
            let detections = self
                .capabilities
                .detector
                .detect(frame)
                .await
                .map_err(WorkerError::from_read)?;

            for detection in detections {
                let Some(embedding) = detection.embedding.as_deref() else {
                    continue;
                };
                let Some(matched) = matcher.match_embedding(embedding)? else {
                    continue;
                };
                if !selected.contains(&matched.identity_id) {
                    continue;
                }
                // One box per identity: the most confident detection wins
                match active.iter_mut().find(|(id, _, _)| *id == matched.identity_id) {
                    Some(slot) if detection.confidence > slot.2 => {
                        *slot = (matched.identity_id, detection.bbox, detection.confidence)
                    }
                    Some(_) => {}
                    None => active.push((matched.identity_id, detection.bbox, detection.confidence)),
                }
            }
        }

        let active = prioritize(active, |(_, _, confidence)| *confidence);
        let template = LayoutTemplate::for_count(active.len(), self.config.canvas);
        let decision = LayoutDecision {
            scene_index,
            kind: template.kind,
            identities: active.iter().map(|(id, _, _)| id.clone()).collect(),
        };
        let layout = SceneLayout {
            scene_index,
            template,
            boxes: active.into_iter().map(|(_, bbox, _)| bbox).collect(),
        };
        Ok((decision, layout))
    }

    async fn scene_checkpoint(
        &self,
        job: &Job,
        logger: &JobLogger,
        scene_index: usize,
        written: u64,
        total_frames: u64,
    ) -> WorkerResult<()> {
        let progress = written as f64 * 100.0 / total_frames.max(1) as f64;
        let stored = self
            .store
            .checkpoint(&job.id, JobStage::Composition, Some(progress))
            .await?;
        logger.log_scene(scene_index, stored);
        self.ensure_not_cancelled()
    }

    async fn enter_stage(&self, job: &Job, logger: &JobLogger, stage: JobStage) -> WorkerResult<()> {
        self.ensure_not_cancelled()?;
        logger.log_stage(stage);
        self.store.checkpoint(&job.id, stage, None).await?;
        Ok(())
    }

    fn ensure_not_cancelled(&self) -> WorkerResult<()> {
        match &self.cancel {
            Some(rx) if *rx.borrow() => Err(WorkerError::Cancelled),
            _ => Ok(()),
        }
    }

    /// `(intermediate, final)` output paths of a render job.
    fn output_paths(&self, job: &Job, video: &Video) -> (PathBuf, PathBuf) {
        let dir = self.config.output_dir().join(video.id.as_str());
        (
            dir.join(format!("{}.compiled.mp4", job.id)),
            dir.join(format!("{}.mp4", job.id)),
        )
    }
}

/// Frame count used for scene ranges and progress; derived from the
/// duration when the container does not report one.
fn total_frames(info: &VideoInfo) -> u64 {
    if info.frame_count > 0 {
        info.frame_count
    } else {
        (info.duration * info.fps).round().max(0.0) as u64
    }
}

/// Index of the scene containing `index`, scanning forward from `from`.
/// Frames past the last range belong to the last scene.
fn scene_at(ranges: &[Range<u64>], index: u64, from: usize) -> usize {
    let mut i = from.min(ranges.len().saturating_sub(1));
    while i + 1 < ranges.len() && index >= ranges[i].end {
        i += 1;
    }
    i
}

/// One decision per scene. Scenes no decoded frame fell into (an empty
/// rounded range, or past the end of a short decode) get an empty full frame.
fn with_undecoded_scenes(decided: Vec<LayoutDecision>, scene_count: usize) -> Vec<LayoutDecision> {
    let mut decided = decided.into_iter().peekable();
    (0..scene_count)
        .map(|scene_index| {
            decided
                .next_if(|d| d.scene_index == scene_index)
                .unwrap_or_else(|| LayoutDecision {
                    scene_index,
                    kind: LayoutKind::FullFrame,
                    identities: Vec::new(),
                })
        })
        .collect()
}

async fn render_frame(
    compositor: &FrameCompositor,
    layout: &SceneLayout,
    image: RgbImage,
) -> WorkerResult<RgbImage> {
    let compositor = compositor.clone();
    let boxes = layout.boxes.clone();
    let template = layout.template.clone();
    tokio::task::spawn_blocking(move || {
        if boxes.is_empty() {
            compositor.fit_full_frame(&image)
        } else {
            compositor.compose(&image, &boxes, &template)
        }
    })
    .await
    .map_err(|e| WorkerError::internal(format!("composition task failed: {}", e)))
}
