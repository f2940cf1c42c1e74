//! Face detection over HTTP.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use tracing::debug;

use reel_media::{FaceDetector, Frame, MediaError, MediaResult};
use reel_models::Detection;

use crate::client::{MlClientConfig, MlHttp};
use crate::error::{MlError, MlResult};
use crate::types::{DetectRequest, DetectResponse};

/// Client for the face detection and embedding service.
#[derive(Debug, Clone)]
pub struct DetectionClient {
    http: MlHttp,
    base_url: String,
    jpeg_quality: u8,
}

impl DetectionClient {
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        Ok(Self {
            http: MlHttp::new(config)?,
            base_url: config.detection_url.trim_end_matches('/').to_string(),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        })
    }

    pub fn from_env() -> MlResult<Self> {
        Self::new(&MlClientConfig::from_env())
    }

    pub async fn health_check(&self) -> MlResult<bool> {
        self.http.health_check(&self.base_url).await
    }

    /// Send one frame and return the faces found in it.
    pub async fn detect_frame(&self, frame: &Frame) -> MlResult<Vec<Detection>> {
        let image = frame.image.clone();
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality))
            .await
            .map_err(|e| MlError::Encode(e.to_string()))??;

        let request = DetectRequest {
            image: STANDARD.encode(jpeg),
            width: frame.image.width(),
            height: frame.image.height(),
            frame_index: frame.index,
            timestamp: frame.timestamp,
        };

        let url = format!("{}/detect", self.base_url);
        let response: DetectResponse = self.http.post_json(&url, &request).await?;

        debug!(
            frame = frame.index,
            faces = response.faces.len(),
            "Detection response"
        );
        Ok(response.faces.into_iter().map(Detection::from).collect())
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> MlResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| MlError::Encode(e.to_string()))?;
    Ok(buf)
}

#[async_trait]
impl FaceDetector for DetectionClient {
    async fn detect(&self, frame: &Frame) -> MediaResult<Vec<Detection>> {
        self.detect_frame(frame)
            .await
            .map_err(|e| MediaError::detection_failed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http-detector"
    }
}
