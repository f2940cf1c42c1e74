//! Clustering and merge configuration.

use serde::{Deserialize, Serialize};

use crate::merge::ClusterSimilarity;

/// One way two clusters may qualify as the same person.
///
/// Every bound that is set must hold; unset bounds are ignored. A rule with no
/// bounds never matches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MergeRule {
    /// Centroid cosine similarity must exceed this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cosine: Option<f64>,

    /// Centroid L2 distance divided by dimensionality must stay below this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_l2: Option<f64>,

    /// Fraction of dimensions whose distributions overlap must exceed this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_overlap: Option<f64>,
}

impl MergeRule {
    pub fn cosine_above(min: f64) -> Self {
        Self {
            min_cosine: Some(min),
            ..Default::default()
        }
    }

    pub fn overlap_above(min: f64) -> Self {
        Self {
            min_overlap: Some(min),
            ..Default::default()
        }
    }

    pub fn l2_below_and_overlap_above(max_l2: f64, min_overlap: f64) -> Self {
        Self {
            min_cosine: None,
            max_l2: Some(max_l2),
            min_overlap: Some(min_overlap),
        }
    }

    pub fn matches(&self, sim: &ClusterSimilarity) -> bool {
        if self.min_cosine.is_none() && self.max_l2.is_none() && self.min_overlap.is_none() {
            return false;
        }
        self.min_cosine.map_or(true, |min| sim.cosine > min)
            && self.max_l2.map_or(true, |max| sim.l2 < max)
            && self.min_overlap.map_or(true, |min| sim.overlap > min)
    }
}

/// Rules for connecting clusters in the merge graph; any matching rule connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeThresholds {
    pub rules: Vec<MergeRule>,
}

impl MergeThresholds {
    /// Never merge anything.
    pub fn none() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn connects(&self, sim: &ClusterSimilarity) -> bool {
        self.rules.iter().any(|rule| rule.matches(sim))
    }
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            rules: vec![
                MergeRule::cosine_above(0.85),
                MergeRule::l2_below_and_overlap_above(0.5, 0.7),
                MergeRule::overlap_above(0.9),
            ],
        }
    }
}

/// Identity clustering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Upper bound on reduced dimensions; also capped by sample and feature counts
    #[serde(default = "default_components")]
    pub components: usize,

    /// Weight of the normalized sampling position; reduced features get `1 - weight`
    #[serde(default = "default_temporal_weight")]
    pub temporal_weight: f64,

    /// Smallest group reported as a cluster
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Neighbourhood size, counting the point itself, for core distances
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Clusters that split below this distance are kept whole
    #[serde(default = "default_selection_epsilon")]
    pub selection_epsilon: f64,

    /// Allow the whole sample set to be reported as one cluster
    #[serde(default)]
    pub allow_single_cluster: bool,

    #[serde(default)]
    pub merge: MergeThresholds,
}

fn default_components() -> usize {
    20
}
fn default_temporal_weight() -> f64 {
    0.1
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_min_samples() -> usize {
    2
}
fn default_selection_epsilon() -> f64 {
    0.8
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            components: default_components(),
            temporal_weight: default_temporal_weight(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: default_min_samples(),
            selection_epsilon: default_selection_epsilon(),
            allow_single_cluster: false,
            merge: MergeThresholds::default(),
        }
    }
}
