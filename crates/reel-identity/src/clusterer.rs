//! Embeddings to identities.
//!
//! Pipeline: standardize, reduce with PCA, append a weighted temporal
//! feature, density-cluster, then merge clusters whose raw embeddings look
//! like the same person. Samples are put in a canonical order first, so the
//! partition depends only on the sample set and the configuration.

use std::cmp::Ordering;

use ndarray::{s, Array2, Axis};
use tracing::{debug, info};

use reel_models::{Identity, ProjectionParams, VideoId};

use crate::config::ClusteringConfig;
use crate::error::{IdentityError, IdentityResult};
use crate::hdbscan::{hdbscan, HdbscanParams};
use crate::merge::{merge_clusters, ClusterSummary};
use crate::pca::fit_projection;

/// One embedding collected from a sampled frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSample {
    /// Source timestamp in seconds
    pub timestamp: f64,
    /// Sampling position normalized to `[0, 1)`
    pub position: f64,
    pub embedding: Vec<f32>,
}

impl EmbeddingSample {
    pub fn new(timestamp: f64, position: f64, embedding: Vec<f32>) -> Self {
        Self {
            timestamp,
            position,
            embedding,
        }
    }
}

/// A final identity; indices refer to the input sample slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteredIdentity {
    /// Dense label ordered by first appearance
    pub label: u32,
    /// Mean of member embeddings in the reduced space
    pub centroid: Vec<f64>,
    pub members: Vec<usize>,
    /// Member closest to the centroid
    pub representative: usize,
    pub first_seen: f64,
}

impl ClusteredIdentity {
    pub fn into_identity(self, video_id: &VideoId) -> Identity {
        let mut identity = Identity::new(video_id.clone(), self.label, self.centroid);
        identity.member_count = self.members.len();
        identity.first_seen = self.first_seen;
        identity
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusteringOutcome {
    /// Fitted projection; `None` when there were no samples
    pub projection: Option<ProjectionParams>,
    pub identities: Vec<ClusteredIdentity>,
    /// Final label per input sample
    pub labels: Vec<Option<u32>>,
    pub noise: usize,
    /// Clusters found before the merge pass
    pub raw_clusters: usize,
}

impl ClusteringOutcome {
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

pub struct IdentityClusterer {
    config: ClusteringConfig,
}

impl IdentityClusterer {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Cluster sampled embeddings into identities.
    ///
    /// Zero samples or an all-noise result are ordinary outcomes with no
    /// identities. Malformed embeddings are errors.
    pub fn cluster(&self, samples: &[EmbeddingSample]) -> IdentityResult<ClusteringOutcome> {
        if samples.is_empty() {
            debug!("No embeddings to cluster");
            return Ok(ClusteringOutcome::default());
        }
        let dim = validate(samples)?;
        let n = samples.len();

        let order = canonical_order(samples);
        let raw = Array2::from_shape_fn((n, dim), |(i, j)| samples[order[i]].embedding[j] as f64);

        let (projection, reduced) = fit_projection(&raw, self.config.components);
        let features = self.with_temporal(&reduced, &order, samples);

        let params = HdbscanParams {
            min_cluster_size: self.config.min_cluster_size,
            min_samples: self.config.min_samples,
            selection_epsilon: self.config.selection_epsilon,
            allow_single_cluster: self.config.allow_single_cluster,
        };
        let density_labels = hdbscan(&features, &params);

        let raw_clusters = group_labels(&density_labels);
        let summaries: Vec<ClusterSummary> = raw_clusters
            .iter()
            .map(|members| ClusterSummary::from_rows(&raw, members))
            .collect();
        let merged = merge_clusters(&summaries, &self.config.merge);

        // Member rows are canonical, so the smallest row is the first appearance
        let mut groups: Vec<Vec<usize>> = merged
            .iter()
            .map(|group| {
                let mut rows: Vec<usize> = group
                    .iter()
                    .flat_map(|&c| raw_clusters[c].iter().copied())
                    .collect();
                rows.sort_unstable();
                rows
            })
            .collect();
        groups.sort_by_key(|rows| rows[0]);

        let mut labels = vec![None; n];
        let mut identities = Vec::with_capacity(groups.len());
        for (label, rows) in groups.iter().enumerate() {
            let label = label as u32;
            for &row in rows {
                labels[order[row]] = Some(label);
            }
            identities.push(self.summarize(label, rows, &reduced, &order, samples));
        }

        let noise = labels.iter().filter(|l| l.is_none()).count();
        info!(
            samples = n,
            dimensions = projection.output_dim(),
            raw_clusters = raw_clusters.len(),
            identities = identities.len(),
            noise,
            "Clustered embeddings"
        );

        Ok(ClusteringOutcome {
            projection: Some(projection),
            identities,
            labels,
            noise,
            raw_clusters: raw_clusters.len(),
        })
    }

    fn with_temporal(
        &self,
        reduced: &Array2<f64>,
        order: &[usize],
        samples: &[EmbeddingSample],
    ) -> Array2<f64> {
        let weight = self.config.temporal_weight.clamp(0.0, 1.0);
        let (n, k) = reduced.dim();
        let mut features = Array2::zeros((n, k + 1));
        features
            .slice_mut(s![.., ..k])
            .assign(&(reduced * (1.0 - weight)));
        for (row, &idx) in order.iter().enumerate() {
            features[[row, k]] = samples[idx].position * weight;
        }
        features
    }

    fn summarize(
        &self,
        label: u32,
        rows: &[usize],
        reduced: &Array2<f64>,
        order: &[usize],
        samples: &[EmbeddingSample],
    ) -> ClusteredIdentity {
        let members = reduced.select(Axis(0), rows);
        let centroid = members.mean_axis(Axis(0)).unwrap_or_default();

        let mut representative = rows[0];
        let mut best = f64::INFINITY;
        for (member, &row) in members.outer_iter().zip(rows) {
            let d: f64 = member
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();
            if d < best {
                best = d;
                representative = row;
            }
        }

        let first_seen = rows
            .iter()
            .map(|&row| samples[order[row]].timestamp)
            .fold(f64::INFINITY, f64::min);

        let mut member_indices: Vec<usize> = rows.iter().map(|&row| order[row]).collect();
        member_indices.sort_unstable();

        ClusteredIdentity {
            label,
            centroid: centroid.to_vec(),
            members: member_indices,
            representative: order[representative],
            first_seen,
        }
    }
}

impl Default for IdentityClusterer {
    fn default() -> Self {
        Self::new(ClusteringConfig::default())
    }
}

/// Check that every embedding is non-empty, finite and equally sized.
fn validate(samples: &[EmbeddingSample]) -> IdentityResult<usize> {
    let dim = samples[0].embedding.len();
    for (index, sample) in samples.iter().enumerate() {
        if sample.embedding.is_empty() {
            return Err(IdentityError::EmptyEmbedding(index));
        }
        if sample.embedding.len() != dim {
            return Err(IdentityError::DimensionMismatch {
                index,
                expected: dim,
                found: sample.embedding.len(),
            });
        }
        if sample.embedding.iter().any(|v| !v.is_finite()) || !sample.position.is_finite() {
            return Err(IdentityError::NonFinite(index));
        }
    }
    Ok(dim)
}

/// Sample indices sorted by position, then timestamp, then embedding bits.
fn canonical_order(samples: &[EmbeddingSample]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.sort_by(|&a, &b| {
        let (sa, sb) = (&samples[a], &samples[b]);
        sa.position
            .total_cmp(&sb.position)
            .then(sa.timestamp.total_cmp(&sb.timestamp))
            .then_with(|| {
                sa.embedding
                    .iter()
                    .zip(&sb.embedding)
                    .map(|(x, y)| x.total_cmp(y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
    });
    order
}

/// Rows per density label, clusters ordered by label.
fn group_labels(labels: &[Option<usize>]) -> Vec<Vec<usize>> {
    let count = labels.iter().flatten().max().map_or(0, |m| m + 1);
    let mut groups = vec![Vec::new(); count];
    for (row, label) in labels.iter().enumerate() {
        if let Some(label) = label {
            groups[*label].push(row);
        }
    }
    groups.retain(|g| !g.is_empty());
    groups
}
