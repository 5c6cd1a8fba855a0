use crate::core::models::{LightnessStats, TonalClass};

pub const DEFAULT_HIGH_KEY_THRESHOLD: f64 = 170.0;
pub const DEFAULT_LOW_KEY_THRESHOLD: f64 = 85.0;

/// Lightness values live on a 0-255 scale regardless of bin count.
const LIGHTNESS_SCALE: f64 = 256.0;

/// Count `values` into `bins` equal-width bins over `[0, range)` and normalize
/// the counts into a probability distribution.
///
/// Values outside the range land in the first or last bin. Returns all zeros
/// when `values` is empty.
pub fn build_histogram(values: impl Iterator<Item = f64>, bins: usize, range: f64) -> Vec<f64> {
    if bins == 0 {
        return Vec::new();
    }

    let mut counts = vec![0u64; bins];
    let mut total = 0u64;

    for value in values {
        if !value.is_finite() {
            continue;
        }
        let scaled = (value * bins as f64 / range).floor();
        let index = if scaled <= 0.0 {
            0
        } else {
            (scaled as usize).min(bins - 1)
        };
        counts[index] += 1;
        total += 1;
    }

    if total == 0 {
        return vec![0.0; bins];
    }

    counts
        .into_iter()
        .map(|c| c as f64 / total as f64)
        .collect()
}

/// Tonal statistics over a normalized lightness histogram.
#[derive(Debug, Clone)]
pub struct HistogramAnalyzer {
    pub high_key_threshold: f64,
    pub low_key_threshold: f64,
}

impl HistogramAnalyzer {
    pub fn new(high_key_threshold: f64, low_key_threshold: f64) -> Self {
        Self {
            high_key_threshold,
            low_key_threshold,
        }
    }

    pub fn classify_tonal_range(&self, lightness_histogram: &[f64]) -> TonalClass {
        let stats = self.compute_lightness_stats(lightness_histogram);
        self.classify_mean(stats.mean)
    }

    pub fn classify_mean(&self, mean: f64) -> TonalClass {
        if mean > self.high_key_threshold {
            TonalClass::HighKey
        } else if mean < self.low_key_threshold {
            TonalClass::LowKey
        } else {
            TonalClass::MidKey
        }
    }

    /// Weighted moments with the bin's lower edge (the bin index for 256 bins)
    /// as the value and the bin probability as the weight.
    pub fn compute_lightness_stats(&self, histogram: &[f64]) -> LightnessStats {
        let step = bin_width(histogram.len());
        let total: f64 = histogram.iter().sum();

        if total <= 0.0 {
            return LightnessStats {
                mean: 0.0,
                std: 0.0,
                skewness: 0.0,
            };
        }

        let value = |i: usize| i as f64 * step;
        let mean = histogram
            .iter()
            .enumerate()
            .map(|(i, p)| p * value(i))
            .sum::<f64>()
            / total;

        let variance = histogram
            .iter()
            .enumerate()
            .map(|(i, p)| p * (value(i) - mean).powi(2))
            .sum::<f64>()
            / total;
        let std = variance.sqrt();

        let skewness = if std > f64::EPSILON {
            histogram
                .iter()
                .enumerate()
                .map(|(i, p)| p * ((value(i) - mean) / std).powi(3))
                .sum::<f64>()
                / total
        } else {
            0.0
        };

        LightnessStats {
            mean,
            std,
            skewness,
        }
    }

    /// Contrast is the standard deviation of lightness.
    pub fn compute_contrast(&self, histogram: &[f64]) -> f64 {
        self.compute_lightness_stats(histogram).std
    }

    /// Lightness span between two percentiles (given in 0-100) of the distribution.
    pub fn compute_dynamic_range(
        &self,
        histogram: &[f64],
        percentile_low: f64,
        percentile_high: f64,
    ) -> f64 {
        if histogram.is_empty() {
            return 0.0;
        }

        let step = bin_width(histogram.len());
        let low = percentile_bin(histogram, percentile_low / 100.0);
        let high = percentile_bin(histogram, percentile_high / 100.0);

        (high as f64 - low as f64).max(0.0) * step
    }
}

impl Default for HistogramAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_KEY_THRESHOLD, DEFAULT_LOW_KEY_THRESHOLD)
    }
}

fn bin_width(bins: usize) -> f64 {
    if bins == 0 {
        0.0
    } else {
        LIGHTNESS_SCALE / bins as f64
    }
}

/// First bin at which the cumulative probability reaches `quantile`.
fn percentile_bin(histogram: &[f64], quantile: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, p) in histogram.iter().enumerate() {
        cumulative += p;
        if cumulative >= quantile {
            return i;
        }
    }
    histogram.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spike(bins: usize, at: usize) -> Vec<f64> {
        let mut hist = vec![0.0; bins];
        hist[at] = 1.0;
        hist
    }

    #[test]
    fn test_build_histogram_normalizes() {
        let values = (0..1000).map(|i| (i % 256) as f64);
        let hist = build_histogram(values, 256, 256.0);

        assert_eq!(hist.len(), 256);
        assert!((hist.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(hist.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn test_build_histogram_clamps_out_of_range() {
        let hist = build_histogram([-3.0, 0.0, 255.9, 400.0].into_iter(), 4, 256.0);
        assert_eq!(hist, vec![0.5, 0.0, 0.0, 0.5]);

        let empty = build_histogram(std::iter::empty(), 8, 256.0);
        assert_eq!(empty, vec![0.0; 8]);
    }

    #[test]
    fn test_tonal_classification_thresholds() {
        let analyzer = HistogramAnalyzer::default();

        assert_eq!(analyzer.classify_tonal_range(&spike(256, 200)), TonalClass::HighKey);
        assert_eq!(analyzer.classify_tonal_range(&spike(256, 171)), TonalClass::HighKey);
        assert_eq!(analyzer.classify_tonal_range(&spike(256, 170)), TonalClass::MidKey);
        assert_eq!(analyzer.classify_tonal_range(&spike(256, 85)), TonalClass::MidKey);
        assert_eq!(analyzer.classify_tonal_range(&spike(256, 84)), TonalClass::LowKey);
        assert_eq!(analyzer.classify_tonal_range(&spike(256, 10)), TonalClass::LowKey);
    }

    #[test]
    fn test_lightness_stats_two_point_distribution() {
        let mut hist = vec![0.0; 256];
        hist[100] = 0.5;
        hist[200] = 0.5;

        let analyzer = HistogramAnalyzer::default();
        let stats = analyzer.compute_lightness_stats(&hist);

        assert!((stats.mean - 150.0).abs() < 1e-9);
        assert!((stats.std - 50.0).abs() < 1e-9);
        assert!(stats.skewness.abs() < 1e-9);
        assert_eq!(analyzer.compute_contrast(&hist), stats.std);
    }

    #[test]
    fn test_skewness_sign() {
        let mut hist = vec![0.0; 256];
        hist[10] = 0.8;
        hist[250] = 0.2;

        let stats = HistogramAnalyzer::default().compute_lightness_stats(&hist);
        assert!(stats.skewness > 0.0);
    }

    #[test]
    fn test_flat_image_has_zero_contrast() {
        let analyzer = HistogramAnalyzer::default();
        let stats = analyzer.compute_lightness_stats(&spike(256, 128));

        assert_eq!(stats.mean, 128.0);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.skewness, 0.0);
    }

    #[test]
    fn test_dynamic_range() {
        let analyzer = HistogramAnalyzer::default();
        let uniform = vec![1.0 / 256.0; 256];

        let range = analyzer.compute_dynamic_range(&uniform, 5.0, 95.0);
        assert!((range - 230.0).abs() <= 2.0);
        assert_eq!(analyzer.compute_dynamic_range(&spike(256, 40), 5.0, 95.0), 0.0);
    }
}
