use crate::core::similarity::DistanceMatrix;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

const DEGENERATE_SPREAD: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Degenerate distance matrix: {reason}")]
    Degenerate { reason: String },

    #[error("Clustering cancelled")]
    Cancelled,
}

/// One agglomeration step. `left` and `right` are any input indices inside
/// the two merged groups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterResult {
    /// Cluster id per input index, numbered in order of first appearance.
    pub labels: Vec<usize>,
    pub n_clusters: usize,
    pub silhouette_score: f64,
    pub used_fallback: bool,
}

impl ClusterResult {
    fn single(n: usize) -> Self {
        Self {
            labels: vec![0; n],
            n_clusters: usize::from(n > 0),
            silhouette_score: 0.0,
            used_fallback: false,
        }
    }

    /// Input indices of every cluster, ordered by cluster id.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.n_clusters];
        for (index, &label) in self.labels.iter().enumerate() {
            groups[label].push(index);
        }
        groups
    }
}

/// Ward-linkage agglomerative clustering with silhouette-based model selection.
#[derive(Debug, Clone)]
pub struct AdaptiveClusterer {
    pub min_clusters: usize,
    pub max_clusters: usize,
    pub fallback_clusters: usize,
}

impl AdaptiveClusterer {
    pub fn new(min_clusters: usize, max_clusters: usize) -> Self {
        Self {
            min_clusters: min_clusters.max(1),
            max_clusters: max_clusters.max(1),
            fallback_clusters: 3,
        }
    }

    pub fn with_fallback_clusters(mut self, k: usize) -> Self {
        self.fallback_clusters = k.max(1);
        self
    }

    pub fn cluster(&self, matrix: &DistanceMatrix, requested_k: Option<usize>) -> ClusterResult {
        let never = AtomicBool::new(false);
        match self.try_cluster(matrix, requested_k, &never) {
            Ok(result) => result,
            // Only cancellation escapes try_cluster, and `never` is never set.
            Err(_) => ClusterResult::single(matrix.len()),
        }
    }

    /// Cluster `matrix`, checking `cancel` between candidate evaluations.
    ///
    /// Degenerate inputs are recovered with a flat partition; only
    /// [`ClusterError::Cancelled`] is returned as an error.
    pub fn try_cluster(
        &self,
        matrix: &DistanceMatrix,
        requested_k: Option<usize>,
        cancel: &AtomicBool,
    ) -> Result<ClusterResult, ClusterError> {
        let n = matrix.len();

        if n == 0 || n < self.min_clusters {
            log::info!(
                "{} image(s) is below min_clusters {}; grouping everything together",
                n,
                self.min_clusters
            );
            return Ok(ClusterResult::single(n));
        }

        let outcome = match requested_k {
            Some(k) => self.cluster_fixed(matrix, k.clamp(1, n)),
            None => self.cluster_adaptive(matrix, cancel),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(ClusterError::Degenerate { reason }) => {
                let k = requested_k.unwrap_or(self.fallback_clusters).clamp(1, n);
                log::warn!("{}; falling back to a flat partition with k={}", reason, k);
                Ok(self.flat_partition(matrix, k))
            }
            Err(ClusterError::Cancelled) => Err(ClusterError::Cancelled),
        }
    }

    fn cluster_fixed(
        &self,
        matrix: &DistanceMatrix,
        k: usize,
    ) -> Result<ClusterResult, ClusterError> {
        check_finite(matrix)?;
        let merges = ward_linkage(matrix);
        let labels = cut_tree(&merges, matrix.len(), k);
        Ok(scored(matrix, labels, false))
    }

    fn cluster_adaptive(
        &self,
        matrix: &DistanceMatrix,
        cancel: &AtomicBool,
    ) -> Result<ClusterResult, ClusterError> {
        let n = matrix.len();
        check_finite(matrix)?;
        if matrix.max_off_diagonal() <= DEGENERATE_SPREAD {
            return Err(ClusterError::Degenerate {
                reason: "all images are indistinguishable".to_string(),
            });
        }

        let merges = ward_linkage(matrix);

        let min_k = self.min_clusters.max(2);
        let max_k = self.max_clusters.min(n - 1);
        if min_k > max_k {
            let k = self.min_clusters.min(n);
            log::debug!("No candidate range for n={}; cutting at k={}", n, k);
            return Ok(scored(matrix, cut_tree(&merges, n, k), false));
        }

        let candidates: Vec<Option<(usize, Vec<usize>, f64)>> = (min_k..=max_k)
            .into_par_iter()
            .map(|k| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let labels = cut_tree(&merges, n, k);
                let score = silhouette_score(matrix, &labels);
                log::debug!("k={} silhouette={:.4}", k, score);
                Some((k, labels, score))
            })
            .collect();

        if cancel.load(Ordering::Relaxed) {
            return Err(ClusterError::Cancelled);
        }

        let mut best: Option<(usize, Vec<usize>, f64)> = None;
        for (k, labels, score) in candidates.into_iter().flatten() {
            if !score.is_finite() {
                continue;
            }
            let better = match &best {
                Some((_, _, best_score)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((k, labels, score));
            }
        }

        match best {
            Some((k, labels, score)) if score > 0.0 => {
                log::info!("Selected k={} with silhouette {:.4}", k, score);
                Ok(ClusterResult {
                    n_clusters: count_labels(&labels),
                    labels,
                    silhouette_score: score,
                    used_fallback: false,
                })
            }
            _ => Err(ClusterError::Degenerate {
                reason: "no candidate partition has a positive silhouette".to_string(),
            }),
        }
    }

    /// Seed `k` points by farthest-first traversal and attach every other point
    /// to its nearest seed.
    pub fn flat_partition(&self, matrix: &DistanceMatrix, k: usize) -> ClusterResult {
        let n = matrix.len();
        let k = k.clamp(1, n.max(1));
        if n == 0 {
            return ClusterResult::single(0);
        }

        let distance = |i: usize, j: usize| {
            let d = matrix.get(i, j);
            if d.is_finite() { d } else { f64::MAX }
        };

        let mut seeds = vec![0usize];
        let mut nearest: Vec<f64> = (0..n).map(|i| distance(i, 0)).collect();
        while seeds.len() < k {
            let mut pick = None;
            for i in 0..n {
                if seeds.contains(&i) {
                    continue;
                }
                match pick {
                    Some(p) if nearest[i] <= nearest[p] => {}
                    _ => pick = Some(i),
                }
            }
            let Some(seed) = pick else { break };
            seeds.push(seed);
            for (i, slot) in nearest.iter_mut().enumerate() {
                *slot = slot.min(distance(i, seed));
            }
        }

        let assignment: Vec<usize> = (0..n)
            .map(|i| {
                if let Some(position) = seeds.iter().position(|&s| s == i) {
                    return position;
                }
                let mut best = 0;
                for (position, &seed) in seeds.iter().enumerate() {
                    if distance(i, seed) < distance(i, seeds[best]) {
                        best = position;
                    }
                }
                best
            })
            .collect();

        scored(matrix, relabel(&assignment), true)
    }
}

impl Default for AdaptiveClusterer {
    fn default() -> Self {
        Self::new(2, 10)
    }
}

fn check_finite(matrix: &DistanceMatrix) -> Result<(), ClusterError> {
    if matrix.all_finite() {
        Ok(())
    } else {
        Err(ClusterError::Degenerate {
            reason: "distance matrix contains non-finite values".to_string(),
        })
    }
}

fn scored(matrix: &DistanceMatrix, labels: Vec<usize>, used_fallback: bool) -> ClusterResult {
    let score = silhouette_score(matrix, &labels);
    ClusterResult {
        n_clusters: count_labels(&labels),
        labels,
        silhouette_score: if score.is_finite() { score } else { 0.0 },
        used_fallback,
    }
}

fn count_labels(labels: &[usize]) -> usize {
    labels.iter().max().map_or(0, |m| m + 1)
}

/// Ward linkage via the nearest-neighbour chain algorithm with Lance-Williams
/// updates. Merges are returned sorted by height.
///
/// Returns no merges when the matrix has fewer than two points or any
/// non-finite entry.
pub fn ward_linkage(matrix: &DistanceMatrix) -> Vec<Merge> {
    let n = matrix.len();
    if n < 2 || !matrix.all_finite() {
        return Vec::new();
    }

    let mut dist: Vec<f64> = (0..n).flat_map(|i| matrix.row(i).to_vec()).collect();
    let mut size = vec![1usize; n];
    let mut height = vec![0.0f64; n];
    let mut active = vec![true; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    let mut merges: Vec<Merge> = Vec::with_capacity(n - 1);

    while merges.len() < n - 1 {
        if chain.is_empty() {
            if let Some(first) = active.iter().position(|&a| a) {
                chain.push(first);
            }
        }

        let (a, b, d_ab) = loop {
            let a = chain[chain.len() - 1];
            let previous = chain.len().checked_sub(2).map(|p| chain[p]);

            // Ties prefer the previous chain element so the chain terminates.
            let mut b = previous.unwrap_or(usize::MAX);
            let mut d_ab = previous.map_or(f64::INFINITY, |p| dist[a * n + p]);
            for k in 0..n {
                if k == a || !active[k] {
                    continue;
                }
                if dist[a * n + k] < d_ab {
                    d_ab = dist[a * n + k];
                    b = k;
                }
            }

            if Some(b) == previous {
                chain.truncate(chain.len() - 2);
                break (a, b, d_ab);
            }
            chain.push(b);
        };

        let (keep, gone) = if a < b { (a, b) } else { (b, a) };
        let (n_keep, n_gone) = (size[keep] as f64, size[gone] as f64);

        for k in 0..n {
            if k == keep || k == gone || !active[k] {
                continue;
            }
            let n_k = size[k] as f64;
            let d_keep = dist[keep * n + k];
            let d_gone = dist[gone * n + k];
            let updated = (((n_keep + n_k) * d_keep * d_keep + (n_gone + n_k) * d_gone * d_gone
                - n_k * d_ab * d_ab)
                / (n_keep + n_gone + n_k))
                .max(0.0)
                .sqrt();
            dist[keep * n + k] = updated;
            dist[k * n + keep] = updated;
        }

        let merged_height = d_ab.max(height[keep]).max(height[gone]);
        merges.push(Merge {
            left: keep,
            right: gone,
            distance: merged_height,
            size: size[keep] + size[gone],
        });

        size[keep] += size[gone];
        height[keep] = merged_height;
        active[gone] = false;
    }

    merges.sort_by(|x, y| x.distance.total_cmp(&y.distance));
    merges
}

/// Apply the lowest `n - k` merges and label the resulting groups.
pub fn cut_tree(merges: &[Merge], n: usize, k: usize) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for merge in merges.iter().take(n.saturating_sub(k.max(1))) {
        let left = find(&mut parent, merge.left);
        let right = find(&mut parent, merge.right);
        if left != right {
            parent[right] = left;
        }
    }

    let roots: Vec<usize> = (0..n).map(|i| find(&mut parent, i)).collect();
    relabel(&roots)
}

/// Renumber arbitrary group keys to 0.. in order of first appearance.
fn relabel(keys: &[usize]) -> Vec<usize> {
    let mut mapping: Vec<(usize, usize)> = Vec::new();
    keys.iter()
        .map(|key| match mapping.iter().find(|(k, _)| k == key) {
            Some((_, label)) => *label,
            None => {
                let label = mapping.len();
                mapping.push((*key, label));
                label
            }
        })
        .collect()
}

/// Mean silhouette over all points. Points in singleton clusters score 0; a
/// partition with fewer than two clusters scores 0.
pub fn silhouette_score(matrix: &DistanceMatrix, labels: &[usize]) -> f64 {
    let n = labels.len();
    let k = count_labels(labels);
    if k < 2 || n == 0 {
        return 0.0;
    }

    let mut cluster_sizes = vec![0usize; k];
    for &label in labels {
        cluster_sizes[label] += 1;
    }

    let total: f64 = (0..n)
        .map(|i| {
            let own = labels[i];
            if cluster_sizes[own] <= 1 {
                return 0.0;
            }

            let mut sums = vec![0.0f64; k];
            for (j, &label) in labels.iter().enumerate() {
                if j != i {
                    sums[label] += matrix.get(i, j);
                }
            }

            let a = sums[own] / (cluster_sizes[own] - 1) as f64;
            let b = (0..k)
                .filter(|&c| c != own && cluster_sizes[c] > 0)
                .map(|c| sums[c] / cluster_sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);

            let denominator = a.max(b);
            if denominator > 0.0 && b.is_finite() {
                (b - a) / denominator
            } else {
                0.0
            }
        })
        .sum();

    total / n as f64
}
