//! Density-based hierarchical clustering (HDBSCAN) over dense points.
//!
//! Steps: core distances, mutual-reachability minimum spanning tree, single
//! linkage hierarchy, condensed tree, excess-of-mass selection, then an
//! optional epsilon pass that keeps clusters whole below a distance.
//! Every tie is broken by index so the labelling is deterministic.

use std::collections::VecDeque;

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

/// Distances are floored here before inversion into lambda values.
const MIN_DISTANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    /// Neighbourhood size for core distances, counting the point itself
    pub min_samples: usize,
    pub selection_epsilon: f64,
    pub allow_single_cluster: bool,
}

/// Cluster label per point; `None` is noise. Labels are dense from 0.
pub fn hdbscan(points: &Array2<f64>, params: &HdbscanParams) -> Vec<Option<usize>> {
    let n = points.nrows();
    let min_cluster_size = params.min_cluster_size.max(2);
    if n < 2 || n < min_cluster_size {
        return vec![None; n];
    }

    let distances = pairwise_distances(points);
    let core = core_distances(&distances, params.min_samples);
    let edges = spanning_tree(&distances, &core);
    let merges = single_linkage(n, edges);
    let tree = CondensedTree::build(n, &merges, min_cluster_size);

    let selected = tree.select(params.selection_epsilon, params.allow_single_cluster);
    tree.label(&selected, params.selection_epsilon)
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn pairwise_distances(points: &Array2<f64>) -> Vec<Vec<f64>> {
    let n = points.nrows();
    (0..n)
        .into_par_iter()
        .map(|i| {
            (0..n)
                .map(|j| euclidean(points.row(i), points.row(j)))
                .collect()
        })
        .collect()
}

fn core_distances(distances: &[Vec<f64>], min_samples: usize) -> Vec<f64> {
    distances
        .iter()
        .map(|row| {
            let mut sorted = row.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let k = min_samples.max(1).min(sorted.len()) - 1;
            sorted[k]
        })
        .collect()
}

/// Prim's algorithm over mutual-reachability distances, edges sorted by weight.
fn spanning_tree(distances: &[Vec<f64>], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = distances.len();
    let reach = |a: usize, b: usize| distances[a][b].max(core[a]).max(core[b]);

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut from = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let d = reach(current, j);
            if d < best[j] {
                best[j] = d;
                from[j] = current;
            }
        }

        let mut next = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            match next {
                Some(k) if best[k] <= best[j] => {}
                _ => next = Some(j),
            }
        }
        let Some(next) = next else { break };

        edges.push((from[next], next, best[next]));
        in_tree[next] = true;
        current = next;
    }

    edges.sort_by(|a, b| {
        a.2.total_cmp(&b.2)
            .then(a.0.min(a.1).cmp(&b.0.min(b.1)))
            .then(a.0.max(a.1).cmp(&b.0.max(b.1)))
    });
    edges
}

#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Agglomerate the sorted tree edges. Node `n + i` is created by `merges[i]`.
fn single_linkage(n: usize, edges: Vec<(usize, usize, f64)>) -> Vec<Merge> {
    let total = 2 * n - 1;
    let mut parent: Vec<usize> = (0..total).collect();
    let mut size = vec![1usize; total];
    let mut merges = Vec::with_capacity(n - 1);

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (a, b, distance) in edges {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let node = n + merges.len();
        size[node] = size[ra] + size[rb];
        parent[ra] = node;
        parent[rb] = node;
        merges.push(Merge {
            left: ra,
            right: rb,
            distance,
            size: size[node],
        });
    }
    merges
}

#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

/// Hierarchy of clusters of at least `min_cluster_size` points.
///
/// Points keep ids `0..n`; clusters are numbered from `n`, with `n` the root
/// and children always numbered above their parent.
#[derive(Debug)]
struct CondensedTree {
    points: usize,
    edges: Vec<CondensedEdge>,
    clusters: usize,
}

impl CondensedTree {
    fn build(n: usize, merges: &[Merge], min_cluster_size: usize) -> Self {
        let count = |node: usize| if node < n { 1 } else { merges[node - n].size };
        let leaves = |node: usize| {
            let mut out = Vec::new();
            let mut stack = vec![node];
            while let Some(x) = stack.pop() {
                if x < n {
                    out.push(x);
                } else {
                    stack.push(merges[x - n].right);
                    stack.push(merges[x - n].left);
                }
            }
            out
        };

        let root = 2 * n - 2;
        let mut relabel = vec![0usize; 2 * n - 1];
        relabel[root] = n;
        let mut next_label = n + 1;
        let mut edges = Vec::new();

        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            if node < n {
                continue;
            }
            let merge = merges[node - n];
            let lambda = 1.0 / merge.distance.max(MIN_DISTANCE);
            let cluster = relabel[node];
            let (left, right) = (merge.left, merge.right);
            let (left_count, right_count) = (count(left), count(right));

            let fall_out = |child: usize, edges: &mut Vec<CondensedEdge>| {
                for point in leaves(child) {
                    edges.push(CondensedEdge {
                        parent: cluster,
                        child: point,
                        lambda,
                        size: 1,
                    });
                }
            };

            match (left_count >= min_cluster_size, right_count >= min_cluster_size) {
                (true, true) => {
                    for (child, size) in [(left, left_count), (right, right_count)] {
                        relabel[child] = next_label;
                        edges.push(CondensedEdge {
                            parent: cluster,
                            child: next_label,
                            lambda,
                            size,
                        });
                        next_label += 1;
                        queue.push_back(child);
                    }
                }
                (false, false) => {
                    fall_out(left, &mut edges);
                    fall_out(right, &mut edges);
                }
                (true, false) => {
                    fall_out(right, &mut edges);
                    relabel[left] = cluster;
                    queue.push_back(left);
                }
                (false, true) => {
                    fall_out(left, &mut edges);
                    relabel[right] = cluster;
                    queue.push_back(right);
                }
            }
        }

        Self {
            points: n,
            edges,
            clusters: next_label - n,
        }
    }

    fn root(&self) -> usize {
        self.points
    }

    /// Lambda at which each cluster split off its parent; 0 for the root.
    fn births(&self) -> Vec<f64> {
        let mut birth = vec![0.0; self.clusters];
        for e in self.edges.iter().filter(|e| e.child >= self.points) {
            birth[e.child - self.points] = e.lambda;
        }
        birth
    }

    fn cluster_parents(&self) -> Vec<Option<usize>> {
        let mut parent = vec![None; self.clusters];
        for e in self.edges.iter().filter(|e| e.child >= self.points) {
            parent[e.child - self.points] = Some(e.parent);
        }
        parent
    }

    fn cluster_children(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.clusters];
        for e in self.edges.iter().filter(|e| e.child >= self.points) {
            children[e.parent - self.points].push(e.child);
        }
        children
    }

    fn stabilities(&self, birth: &[f64]) -> Vec<f64> {
        let mut stability = vec![0.0; self.clusters];
        for e in &self.edges {
            let idx = e.parent - self.points;
            stability[idx] += (e.lambda - birth[idx]) * e.size as f64;
        }
        stability
    }

    fn descendants(&self, cluster: usize, children: &[Vec<usize>]) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = children[cluster - self.points].clone();
        while let Some(c) = stack.pop() {
            out.push(c);
            stack.extend(children[c - self.points].iter().copied());
        }
        out
    }

    /// Excess-of-mass selection followed by the epsilon pass. Returns selected cluster ids.
    fn select(&self, epsilon: f64, allow_single_cluster: bool) -> Vec<usize> {
        let birth = self.births();
        let mut stability = self.stabilities(&birth);
        let children = self.cluster_children();
        let parents = self.cluster_parents();
        let root = self.root();

        let mut selected = vec![false; self.clusters];
        let candidates: Vec<usize> = (self.points..self.points + self.clusters)
            .rev()
            .filter(|&c| allow_single_cluster || c != root)
            .collect();
        for &c in &candidates {
            selected[c - self.points] = true;
        }

        for &c in &candidates {
            let idx = c - self.points;
            let subtree: f64 = children[idx]
                .iter()
                .map(|&child| stability[child - self.points])
                .sum();
            if subtree > stability[idx] {
                selected[idx] = false;
                stability[idx] = subtree;
            } else {
                for d in self.descendants(c, &children) {
                    selected[d - self.points] = false;
                }
            }
        }

        let mut chosen: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&c| selected[c - self.points])
            .collect();
        chosen.sort_unstable();

        let has_splits = !children[0].is_empty();
        if epsilon > 0.0 && has_splits {
            chosen = self.epsilon_search(chosen, epsilon, allow_single_cluster, &birth, &parents, &children);
        }
        chosen
    }

    fn epsilon_search(
        &self,
        leaves: Vec<usize>,
        epsilon: f64,
        allow_single_cluster: bool,
        birth: &[f64],
        parents: &[Option<usize>],
        children: &[Vec<usize>],
    ) -> Vec<usize> {
        let root = self.root();
        let split_distance = |c: usize| 1.0 / birth[c - self.points];

        let mut chosen = Vec::new();
        let mut processed = vec![false; self.clusters];
        for leaf in leaves {
            if split_distance(leaf) >= epsilon {
                chosen.push(leaf);
                continue;
            }
            if processed[leaf - self.points] {
                continue;
            }

            let mut current = leaf;
            let ancestor = loop {
                let Some(parent) = parents[current - self.points] else {
                    break current;
                };
                if parent == root {
                    break if allow_single_cluster { parent } else { current };
                }
                if split_distance(parent) > epsilon {
                    break parent;
                }
                current = parent;
            };

            chosen.push(ancestor);
            for d in self.descendants(ancestor, children) {
                processed[d - self.points] = true;
            }
        }

        chosen.sort_unstable();
        chosen.dedup();
        chosen
    }

    fn label(&self, selected: &[usize], epsilon: f64) -> Vec<Option<usize>> {
        let root = self.root();
        let parents = self.cluster_parents();
        let label_of = |c: usize| selected.binary_search(&c).ok();

        let mut point_parent = vec![(root, 0.0); self.points];
        for e in self.edges.iter().filter(|e| e.child < self.points) {
            point_parent[e.child] = (e.parent, e.lambda);
        }
        let root_max_lambda = self
            .edges
            .iter()
            .filter(|e| e.parent == root)
            .map(|e| e.lambda)
            .fold(0.0f64, f64::max);

        point_parent
            .iter()
            .map(|&(parent, lambda)| {
                let mut c = parent;
                loop {
                    if c != root {
                        if let Some(label) = label_of(c) {
                            return Some(label);
                        }
                    }
                    match parents[c - self.points] {
                        Some(p) => c = p,
                        None => break,
                    }
                }

                // Reached the root; only a selected root claims points, and only dense ones
                let label = label_of(root)?;
                let dense = if epsilon > 0.0 {
                    lambda >= 1.0 / epsilon
                } else {
                    lambda >= root_max_lambda
                };
                dense.then_some(label)
            })
            .collect()
    }
}
