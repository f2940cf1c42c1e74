//! Persistence of jobs, videos and per-video identities.
//!
//! Every write that touches both a job and its video happens under one lock
//! (or one transaction in a database-backed store), so readers never see a
//! job status that disagrees with its video.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use reel_models::{
    Identity, IdentityId, InvalidTransition, Job, JobId, JobStage, ProjectionParams, Video,
    VideoId, VideoStatus,
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("video not found: {0}")]
    VideoNotFound(VideoId),

    #[error("identity not found: {0}")]
    IdentityNotFound(IdentityId),

    #[error("identities for video {0} were already written")]
    IdentitiesExist(VideoId),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// The clustering result persisted for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySet {
    /// Needed to project new embeddings; `None` only when nothing was sampled
    pub projection: Option<ProjectionParams>,
    pub identities: Vec<Identity>,
}

impl IdentitySet {
    pub fn empty() -> Self {
        Self {
            projection: None,
            identities: Vec::new(),
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, id: &JobId) -> StoreResult<Job>;

    async fn get_video(&self, id: &VideoId) -> StoreResult<Video>;

    /// `pending -> in_progress` for the job and `processing` for its video.
    async fn start(&self, id: &JobId) -> StoreResult<Job>;

    /// Record the current stage and, optionally, progress. Returns the stored progress.
    async fn checkpoint(&self, id: &JobId, stage: JobStage, progress: Option<f64>) -> StoreResult<f64>;

    /// Complete the job. With an output path the video becomes `completed`
    /// and references it; otherwise the video returns to `uploaded`.
    async fn complete(&self, id: &JobId, processed_path: Option<String>) -> StoreResult<Job>;

    /// Fail the job and, when it still exists, its video; any processed
    /// reference is dropped. A pending job may fail without having started.
    async fn fail(&self, id: &JobId, message: &str) -> StoreResult<Job>;

    /// Write a video's identities and projection. Allowed once per video.
    async fn save_identities(&self, video_id: &VideoId, set: IdentitySet) -> StoreResult<()>;

    /// `None` when the video was never clustered.
    async fn load_identities(&self, video_id: &VideoId) -> StoreResult<Option<IdentitySet>>;

    /// The only mutation allowed on a written identity.
    async fn update_thumbnail(&self, id: &IdentityId, path: String) -> StoreResult<()>;
}

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    videos: HashMap<VideoId, Video>,
    identities: HashMap<VideoId, IdentitySet>,
}

impl State {
    fn job_and_video(&mut self, id: &JobId) -> StoreResult<(&mut Job, &mut Video)> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;
        let video = self
            .videos
            .get_mut(&job.video_id)
            .ok_or_else(|| StoreError::VideoNotFound(job.video_id.clone()))?;
        Ok((job, video))
    }
}

/// In-process store for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_video(&self, video: Video) {
        self.state.write().await.videos.insert(video.id.clone(), video);
    }

    /// Delete a video record; its jobs stay behind.
    pub async fn remove_video(&self, id: &VideoId) -> Option<Video> {
        self.state.write().await.videos.remove(id)
    }

    pub async fn insert_job(&self, job: Job) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.videos.contains_key(&job.video_id) {
            return Err(StoreError::VideoNotFound(job.video_id.clone()));
        }
        state.jobs.insert(job.id.clone(), job);
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get_job(&self, id: &JobId) -> StoreResult<Job> {
        self.state
            .read()
            .await
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(id.clone()))
    }

    async fn get_video(&self, id: &VideoId) -> StoreResult<Video> {
        self.state
            .read()
            .await
            .videos
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::VideoNotFound(id.clone()))
    }

    async fn start(&self, id: &JobId) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let (job, video) = state.job_and_video(id)?;
        job.start()?;
        video.status = VideoStatus::Processing;
        Ok(job.clone())
    }

    async fn checkpoint(&self, id: &JobId, stage: JobStage, progress: Option<f64>) -> StoreResult<f64> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;
        job.enter_stage(stage);
        Ok(match progress {
            Some(value) => job.record_progress(value),
            None => job.progress,
        })
    }

    async fn complete(&self, id: &JobId, processed_path: Option<String>) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let (job, video) = state.job_and_video(id)?;
        job.complete(processed_path.clone())?;
        match processed_path {
            Some(path) => {
                video.status = VideoStatus::Completed;
                video.processed_path = Some(path);
            }
            None => video.status = VideoStatus::Uploaded,
        }
        Ok(job.clone())
    }

    async fn fail(&self, id: &JobId, message: &str) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::JobNotFound(id.clone()))?;
        job.fail(message)?;
        let job = job.clone();
        if let Some(video) = state.videos.get_mut(&job.video_id) {
            video.status = VideoStatus::Failed;
        }
        Ok(job)
    }

    async fn save_identities(&self, video_id: &VideoId, set: IdentitySet) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if !state.videos.contains_key(video_id) {
            return Err(StoreError::VideoNotFound(video_id.clone()));
        }
        if state.identities.contains_key(video_id) {
            return Err(StoreError::IdentitiesExist(video_id.clone()));
        }
        state.identities.insert(video_id.clone(), set);
        Ok(())
    }

    async fn load_identities(&self, video_id: &VideoId) -> StoreResult<Option<IdentitySet>> {
        Ok(self.state.read().await.identities.get(video_id).cloned())
    }

    async fn update_thumbnail(&self, id: &IdentityId, path: String) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let identity = state
            .identities
            .values_mut()
            .flat_map(|set| set.identities.iter_mut())
            .find(|identity| &identity.id == id)
            .ok_or_else(|| StoreError::IdentityNotFound(id.clone()))?;
        identity.thumbnail_path = Some(path);
        Ok(())
    }
}
