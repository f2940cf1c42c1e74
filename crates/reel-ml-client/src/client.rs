//! Shared HTTP plumbing for the ML services.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MlError, MlResult};
use crate::types::HealthResponse;

/// Configuration for ML clients.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL of the detection/embedding service
    pub detection_url: String,
    /// Base URL of the speech-to-text service
    pub transcription_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
    /// First retry delay, doubled per attempt
    pub retry_delay: Duration,
    /// JPEG quality for frames sent to the detector
    pub jpeg_quality: u8,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            detection_url: "http://localhost:8001".to_string(),
            transcription_url: "http://localhost:8002".to_string(),
            timeout: Duration::from_secs(300),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            jpeg_quality: 90,
        }
    }
}

impl MlClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            detection_url: std::env::var("ML_SERVICE_URL").unwrap_or(defaults.detection_url),
            transcription_url: std::env::var("STT_SERVICE_URL")
                .unwrap_or(defaults.transcription_url),
            timeout: Duration::from_secs(
                std::env::var("ML_SERVICE_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            max_retries: std::env::var("ML_SERVICE_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_delay: defaults.retry_delay,
            jpeg_quality: std::env::var("ML_JPEG_QUALITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jpeg_quality),
        }
    }
}

/// JSON-over-HTTP with retries for transient failures.
#[derive(Debug, Clone)]
pub struct MlHttp {
    http: Client,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl MlHttp {
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MlError::Network)?;

        Ok(Self {
            http,
            timeout: config.timeout,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    /// Check if a service is healthy.
    pub async fn health_check(&self, base_url: &str) -> MlResult<bool> {
        let url = format!("{}/health", base_url.trim_end_matches('/'));

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("ML service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ML service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// POST `body` as JSON and decode a JSON response.
    pub async fn post_json<B, R>(&self, url: &str, body: &B) -> MlResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!("POST {}", url);

        let bytes = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(status_error(status, body));
                }
                response.bytes().await.map_err(|e| self.classify(e))
            })
            .await?;

        serde_json::from_slice(&bytes)
            .map_err(|e| MlError::InvalidResponse(format!("{} returned malformed JSON: {}", url, e)))
    }

    fn classify(&self, e: reqwest::Error) -> MlError {
        if e.is_timeout() {
            MlError::Timeout(self.timeout.as_secs())
        } else {
            MlError::Network(e)
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MlResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MlResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.retry_delay * 2u32.pow(attempt);
                    warn!(
                        "ML request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(MlError::RequestFailed("Unknown error".to_string())))
    }
}

fn status_error(status: StatusCode, body: String) -> MlError {
    let message = format!("ML service returned {}: {}", status, body);
    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::TOO_MANY_REQUESTS => {
            MlError::ServiceUnavailable(message)
        }
        StatusCode::GATEWAY_TIMEOUT => MlError::Timeout(0),
        _ => MlError::RequestFailed(message),
    }
}
