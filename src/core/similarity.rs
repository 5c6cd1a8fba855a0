use crate::config::{DistanceMetric, FeatureWeights};
use crate::core::models::ImageFeatures;
use rayon::prelude::*;
use serde::Serialize;

const EPSILON: f64 = 1e-10;

/// Symmetric N x N matrix of pairwise distances in [0, 1] with a zero diagonal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceMatrix {
    size: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    pub fn zeros(size: usize) -> Self {
        Self {
            size,
            values: vec![0.0; size * size],
        }
    }

    /// Build from a dense row-major square matrix. Returns `None` when `rows`
    /// is not square.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Option<Self> {
        let size = rows.len();
        if rows.iter().any(|r| r.len() != size) {
            return None;
        }
        Some(Self {
            size,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.size..(i + 1) * self.size]
    }

    fn set_pair(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.size + j] = value;
        self.values[j * self.size + i] = value;
    }

    pub fn is_symmetric(&self) -> bool {
        (0..self.size).all(|i| (i..self.size).all(|j| self.get(i, j) == self.get(j, i)))
    }

    pub fn all_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    pub fn max_off_diagonal(&self) -> f64 {
        let mut max = 0.0f64;
        for i in 0..self.size {
            for j in (i + 1)..self.size {
                max = max.max(self.get(i, j));
            }
        }
        max
    }
}

/// Weighted histogram comparison of feature records.
#[derive(Debug, Clone)]
pub struct SimilarityCalculator {
    weights: FeatureWeights,
    metric: DistanceMetric,
}

impl SimilarityCalculator {
    pub fn new(weights: FeatureWeights, metric: DistanceMetric) -> Self {
        Self {
            weights: weights.sanitized(),
            metric,
        }
    }

    pub fn weights(&self) -> FeatureWeights {
        self.weights
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn set_weights(&mut self, weights: FeatureWeights) {
        self.weights = weights.sanitized();
    }

    pub fn set_metric(&mut self, metric: DistanceMetric) {
        self.metric = metric;
    }

    /// `sum(min(h1, h2))`; 1 for identical distributions.
    pub fn histogram_intersection(&self, h1: &[f64], h2: &[f64]) -> f64 {
        h1.iter().zip(h2).map(|(a, b)| a.min(*b)).sum()
    }

    pub fn chi_square_distance(&self, h1: &[f64], h2: &[f64]) -> f64 {
        h1.iter()
            .zip(h2)
            .map(|(a, b)| (a - b).powi(2) / (a + b + EPSILON))
            .sum()
    }

    /// `-ln(sum(sqrt(h1 * h2)))` with the coefficient clamped to `[1e-10, 1]`.
    pub fn bhattacharyya_distance(&self, h1: &[f64], h2: &[f64]) -> f64 {
        let coefficient: f64 = h1.iter().zip(h2).map(|(a, b)| (a * b).sqrt()).sum();
        -coefficient.clamp(EPSILON, 1.0).ln()
    }

    /// Pearson correlation of the two histograms, 0 when either is flat.
    pub fn correlation_similarity(&self, h1: &[f64], h2: &[f64]) -> f64 {
        let n = h1.len().min(h2.len());
        if n == 0 {
            return 0.0;
        }

        let mean1 = h1[..n].iter().sum::<f64>() / n as f64;
        let mean2 = h2[..n].iter().sum::<f64>() / n as f64;

        let mut numerator = 0.0;
        let mut spread1 = 0.0;
        let mut spread2 = 0.0;
        for (a, b) in h1[..n].iter().zip(&h2[..n]) {
            let da = a - mean1;
            let db = b - mean2;
            numerator += da * db;
            spread1 += da * da;
            spread2 += db * db;
        }

        let denominator = (spread1 * spread2).sqrt();
        if denominator < EPSILON {
            0.0
        } else {
            numerator / denominator
        }
    }

    /// Distance between two histograms squashed into [0, 1], 0 for identical inputs.
    pub fn compute_histogram_distance(
        &self,
        h1: &[f64],
        h2: &[f64],
        metric: DistanceMetric,
    ) -> f64 {
        let distance = match metric {
            DistanceMetric::Intersection => 1.0 - self.histogram_intersection(h1, h2),
            DistanceMetric::ChiSquare => squash(self.chi_square_distance(h1, h2)),
            DistanceMetric::Bhattacharyya => squash(self.bhattacharyya_distance(h1, h2)),
            DistanceMetric::Correlation => (1.0 - self.correlation_similarity(h1, h2)) / 2.0,
        };

        if distance.is_finite() {
            distance.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Weighted similarity over the hue, lightness and saturation histograms, in [0, 1].
    pub fn compute_similarity(&self, f1: &ImageFeatures, f2: &ImageFeatures) -> f64 {
        1.0 - self.compute_distance(f1, f2)
    }

    pub fn compute_distance(&self, f1: &ImageFeatures, f2: &ImageFeatures) -> f64 {
        let w = self.weights;
        let hue =
            self.compute_histogram_distance(&f1.hue_histogram, &f2.hue_histogram, self.metric);
        let lightness = self.compute_histogram_distance(
            &f1.lightness_histogram,
            &f2.lightness_histogram,
            self.metric,
        );
        let saturation = self.compute_histogram_distance(
            &f1.saturation_histogram,
            &f2.saturation_histogram,
            self.metric,
        );

        (w.hue * hue + w.lightness * lightness + w.saturation * saturation).clamp(0.0, 1.0)
    }

    /// Pairwise distances of `features`; each unordered pair is computed once.
    pub fn build_distance_matrix(&self, features: &[ImageFeatures]) -> DistanceMatrix {
        let n = features.len();
        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..n)
                    .map(|j| self.compute_distance(&features[i], &features[j]))
                    .collect()
            })
            .collect();

        let mut matrix = DistanceMatrix::zeros(n);
        for (i, row) in upper.into_iter().enumerate() {
            for (offset, distance) in row.into_iter().enumerate() {
                matrix.set_pair(i, i + 1 + offset, distance);
            }
        }
        matrix
    }
}

impl Default for SimilarityCalculator {
    fn default() -> Self {
        Self::new(FeatureWeights::default(), DistanceMetric::default())
    }
}

/// Maps an unbounded non-negative distance onto [0, 1).
fn squash(distance: f64) -> f64 {
    1.0 - (-distance.max(0.0)).exp()
}
