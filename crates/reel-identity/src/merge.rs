//! Post-clustering merge of clusters that describe the same person.
//!
//! Similarity is measured on raw embeddings. Pairs that satisfy any
//! [`MergeThresholds`] rule are connected and the connected components become
//! the final groups, so the result does not depend on cluster order.

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::config::MergeThresholds;

/// Per-cluster statistics of raw embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSummary {
    pub centroid: Array1<f64>,
    /// Population standard deviation per dimension
    pub std: Array1<f64>,
}

impl ClusterSummary {
    /// Summarize the rows of `raw` listed in `members`.
    pub fn from_rows(raw: &Array2<f64>, members: &[usize]) -> Self {
        let rows = raw.select(Axis(0), members);
        let n = rows.nrows().max(1) as f64;
        let centroid = rows.sum_axis(Axis(0)) / n;
        let mut std = Array1::zeros(raw.ncols());
        for (j, column) in rows.axis_iter(Axis(1)).enumerate() {
            let var = column.iter().map(|v| (v - centroid[j]).powi(2)).sum::<f64>() / n;
            std[j] = var.sqrt();
        }
        Self { centroid, std }
    }
}

/// Similarity measures between two clusters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSimilarity {
    /// Cosine similarity of the centroids
    pub cosine: f64,
    /// Euclidean centroid distance divided by dimensionality
    pub l2: f64,
    /// Fraction of dimensions where `|mean_a - mean_b| < std_a + std_b`
    pub overlap: f64,
}

impl ClusterSimilarity {
    pub fn between(a: &ClusterSummary, b: &ClusterSummary) -> Self {
        let dim = a.centroid.len().max(1) as f64;

        let na = a.centroid.dot(&a.centroid).sqrt();
        let nb = b.centroid.dot(&b.centroid).sqrt();
        let cosine = if na > f64::EPSILON && nb > f64::EPSILON {
            a.centroid.dot(&b.centroid) / (na * nb)
        } else {
            0.0
        };

        let diff = &a.centroid - &b.centroid;
        let l2 = diff.dot(&diff).sqrt() / dim;

        let overlapping = diff
            .iter()
            .zip(a.std.iter().zip(b.std.iter()))
            .filter(|(d, (sa, sb))| d.abs() < *sa + *sb)
            .count();

        Self {
            cosine,
            l2,
            overlap: overlapping as f64 / dim,
        }
    }
}

/// Group cluster indices into connected components of the merge graph.
///
/// Each group is sorted and groups are ordered by their smallest index.
pub fn merge_clusters(summaries: &[ClusterSummary], thresholds: &MergeThresholds) -> Vec<Vec<usize>> {
    let mut sets = DisjointSet::new(summaries.len());

    for i in 0..summaries.len() {
        for j in (i + 1)..summaries.len() {
            let sim = ClusterSimilarity::between(&summaries[i], &summaries[j]);
            if thresholds.connects(&sim) {
                debug!(
                    a = i,
                    b = j,
                    cosine = sim.cosine,
                    l2 = sim.l2,
                    overlap = sim.overlap,
                    "Merging clusters"
                );
                sets.union(i, j);
            }
        }
    }

    sets.groups()
}

/// Union-find with path halving.
#[derive(Debug, Clone)]
pub(crate) struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Join two sets; the smaller root becomes the representative.
    pub(crate) fn union(&mut self, a: usize, b: usize) -> usize {
        let ra = self.find(a);
        let rb = self.find(b);
        let (keep, drop) = if ra <= rb { (ra, rb) } else { (rb, ra) };
        self.parent[drop] = keep;
        keep
    }

    pub(crate) fn groups(&mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            let root = self.find(i);
            by_root[root].push(i);
        }
        by_root.into_iter().filter(|g| !g.is_empty()).collect()
    }
}
