//! ML service request/response types.

use serde::{Deserialize, Serialize};

use reel_models::{BoundingBox, Detection, TimedSegment};

/// One frame sent for face detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    /// Base64 JPEG
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
    pub timestamp: f64,
}

/// One detected face as returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    /// Corners `[x1, y1, x2, y2]` in frame pixels
    pub bbox: [f64; 4],
    #[serde(default = "default_score")]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<[f32; 2]>>,
}

fn default_score() -> f64 {
    1.0
}

impl From<DetectedFace> for Detection {
    fn from(face: DetectedFace) -> Self {
        let [x1, y1, x2, y2] = face.bbox;
        let mut detection = Detection::new(BoundingBox::from_corners(x1, y1, x2, y2), face.score);
        if let Some(embedding) = face.embedding {
            detection = detection.with_embedding(embedding);
        }
        if let Some(points) = face.landmarks {
            detection = detection.with_landmarks(points.into_iter().map(|[x, y]| (x, y)).collect());
        }
        detection
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectResponse {
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

/// Speech-to-text request for a video readable by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeRequest {
    pub input_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeResponse {
    #[serde(default)]
    pub segments: Vec<TimedSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}
