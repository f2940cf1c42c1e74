//! Clients for the external ML services.
//!
//! Face detection with embeddings and speech-to-text run as separate HTTP
//! services. These clients implement the `FaceDetector` and `Transcriber`
//! capabilities the pipeline consumes.

pub mod client;
pub mod detection;
pub mod error;
pub mod transcription;
pub mod types;

pub use client::{MlClientConfig, MlHttp};
pub use detection::DetectionClient;
pub use error::{MlError, MlResult};
pub use transcription::TranscriptionClient;
