//! Worker error types.

use thiserror::Error;

use reel_identity::IdentityError;
use reel_media::MediaError;

use crate::store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure classes of a job run. Every class is fatal for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unreadable or corrupt source video
    Io,
    /// Persisted projection absent or incompatible with the stored identities
    MissingProjection,
    /// Encoding, muxing or caption burn-in failed
    Encode,
    /// Detector or transcriber failed
    Detection,
    Store,
    Cancelled,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Io => "io",
            ErrorKind::MissingProjection => "missing_projection",
            ErrorKind::Encode => "encode",
            ErrorKind::Detection => "detection",
            ErrorKind::Store => "store",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Cannot read source video: {0}")]
    Input(#[source] MediaError),

    #[error("Encoding failed: {0}")]
    Encode(#[source] MediaError),

    #[error("Capability failed: {0}")]
    Capability(#[source] MediaError),

    #[error("Missing projection: {0}")]
    MissingProjection(String),

    #[error("Clustering failed: {0}")]
    Clustering(#[source] IdentityError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn missing_projection(msg: impl Into<String>) -> Self {
        Self::MissingProjection(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify a media error raised while reading the source.
    pub fn from_read(e: MediaError) -> Self {
        match e {
            MediaError::Cancelled => Self::Cancelled,
            e if e.is_input_failure() => Self::Input(e),
            MediaError::DetectionFailed(_) | MediaError::TranscriptionFailed(_) => Self::Capability(e),
            e => Self::Input(e),
        }
    }

    /// Classify a media error raised while producing output.
    pub fn from_write(e: MediaError) -> Self {
        match e {
            MediaError::Cancelled => Self::Cancelled,
            MediaError::DetectionFailed(_) | MediaError::TranscriptionFailed(_) => Self::Capability(e),
            e => Self::Encode(e),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Input(_) => ErrorKind::Io,
            WorkerError::Encode(_) => ErrorKind::Encode,
            WorkerError::Capability(_) => ErrorKind::Detection,
            WorkerError::MissingProjection(_) => ErrorKind::MissingProjection,
            WorkerError::Clustering(e) if e.is_projection_mismatch() => ErrorKind::MissingProjection,
            WorkerError::Clustering(_) => ErrorKind::Internal,
            WorkerError::Store(_) => ErrorKind::Store,
            WorkerError::Cancelled => ErrorKind::Cancelled,
            WorkerError::ConfigError(_) => ErrorKind::Config,
            WorkerError::Io(_) => ErrorKind::Io,
            WorkerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<IdentityError> for WorkerError {
    fn from(e: IdentityError) -> Self {
        if e.is_projection_mismatch() {
            Self::MissingProjection(e.to_string())
        } else {
            Self::Clustering(e)
        }
    }
}
