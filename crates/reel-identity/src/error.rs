//! Error types for identity clustering and matching.

use reel_models::ProjectionError;
use thiserror::Error;

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("embedding {index} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("embedding {0} is empty")]
    EmptyEmbedding(usize),

    #[error("embedding {0} contains non-finite values")]
    NonFinite(usize),

    #[error("identity {identity} has {found} dimensions, projection produces {expected}")]
    IdentityDimension {
        identity: String,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl IdentityError {
    /// Whether the failure comes from an incompatible fitted space rather than bad input.
    pub fn is_projection_mismatch(&self) -> bool {
        matches!(self, Self::Projection(_) | Self::IdentityDimension { .. })
    }
}
