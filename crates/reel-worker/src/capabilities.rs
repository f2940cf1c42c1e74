//! Model capabilities shared by every job a worker runs.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use reel_media::{FaceDetector, Transcriber};

use crate::error::WorkerResult;

/// Detector and optional transcriber handed to each job by reference.
#[derive(Clone)]
pub struct Capabilities {
    pub detector: Arc<dyn FaceDetector>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

impl Capabilities {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            detector,
            transcriber: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("detector", &self.detector.name())
            .field("transcriber", &self.transcriber.as_ref().map(|t| t.name()))
            .finish()
    }
}

/// Loads [`Capabilities`] once per worker process.
///
/// Owned by the worker; concurrent first callers wait on the same initialisation.
#[derive(Default)]
pub struct CapabilityRegistry {
    cell: OnceCell<Arc<Capabilities>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> WorkerResult<Arc<Capabilities>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = WorkerResult<Capabilities>>,
    {
        let caps = self
            .cell
            .get_or_try_init(|| async {
                let caps = init().await?;
                info!(?caps, "Loaded model capabilities");
                Ok::<_, crate::error::WorkerError>(Arc::new(caps))
            })
            .await?;
        Ok(Arc::clone(caps))
    }

    pub fn get(&self) -> Option<Arc<Capabilities>> {
        self.cell.get().cloned()
    }
}
