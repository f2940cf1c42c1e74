//! Identity clustering for the highlight reel pipeline.
//!
//! Turns per-frame face embeddings into a small set of recurring on-screen
//! people, and later matches new embeddings against them in the same fitted
//! space.

pub mod clusterer;
pub mod config;
pub mod error;
pub mod hdbscan;
pub mod matcher;
pub mod merge;
pub mod pca;

pub use clusterer::{ClusteredIdentity, ClusteringOutcome, EmbeddingSample, IdentityClusterer};
pub use config::{ClusteringConfig, MergeRule, MergeThresholds};
pub use error::{IdentityError, IdentityResult};
pub use matcher::{IdentityMatch, IdentityMatcher};
pub use merge::{merge_clusters, ClusterSimilarity, ClusterSummary};
