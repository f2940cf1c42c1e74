//! Speech-to-text over HTTP.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use reel_media::{MediaError, MediaResult, Transcriber};
use reel_models::TimedSegment;

use crate::client::{MlClientConfig, MlHttp};
use crate::error::{MlError, MlResult};
use crate::types::{TranscribeRequest, TranscribeResponse};

/// Client for the speech-to-text service. The service reads the video from
/// a path both sides can see.
#[derive(Debug, Clone)]
pub struct TranscriptionClient {
    http: MlHttp,
    base_url: String,
    language: Option<String>,
}

impl TranscriptionClient {
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        Ok(Self {
            http: MlHttp::new(config)?,
            base_url: config.transcription_url.trim_end_matches('/').to_string(),
            language: None,
        })
    }

    pub fn from_env() -> MlResult<Self> {
        Self::new(&MlClientConfig::from_env())
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub async fn health_check(&self) -> MlResult<bool> {
        self.http.health_check(&self.base_url).await
    }

    pub async fn transcribe_file(&self, video: &Path) -> MlResult<Vec<TimedSegment>> {
        let request = TranscribeRequest {
            input_path: video.to_string_lossy().into_owned(),
            language: self.language.clone(),
        };

        let url = format!("{}/transcribe", self.base_url);
        let response: TranscribeResponse = self.http.post_json(&url, &request).await?;

        if let Some(bad) = response
            .segments
            .iter()
            .find(|s| !(s.start.is_finite() && s.end.is_finite()) || s.end < s.start)
        {
            return Err(MlError::InvalidResponse(format!(
                "segment {:.3}-{:.3} is not a valid interval",
                bad.start, bad.end
            )));
        }

        info!(
            segments = response.segments.len(),
            language = response.language.as_deref().unwrap_or("unknown"),
            "Transcribed {}",
            video.display()
        );
        Ok(response.segments)
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, video: &Path) -> MediaResult<Vec<TimedSegment>> {
        self.transcribe_file(video)
            .await
            .map_err(|e| MediaError::transcription_failed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http-transcriber"
    }
}
