//! Hand-built feature records for unit tests.

use crate::core::histogram::HistogramAnalyzer;
use crate::core::models::{DominantColor, ImageFeatures};

fn spike(bins: usize, at: usize) -> Vec<f64> {
    let mut hist = vec![0.0; bins];
    hist[at.min(bins - 1)] = 1.0;
    hist
}

/// Features of a flat-colored image: every histogram is a single spike.
pub(crate) fn flat_features(
    id: &str,
    hue_bin: usize,
    lightness_bin: usize,
    saturation_bin: usize,
) -> ImageFeatures {
    let lightness_histogram = spike(256, lightness_bin);
    let analyzer = HistogramAnalyzer::default();
    let lightness_stats = analyzer.compute_lightness_stats(&lightness_histogram);

    ImageFeatures {
        image_path: id.to_string(),
        hue_histogram: spike(180, hue_bin),
        tonal_class: analyzer.classify_mean(lightness_stats.mean),
        lightness_histogram,
        saturation_histogram: spike(256, saturation_bin),
        dominant_colors: vec![DominantColor {
            lab: [lightness_bin as f32 * 100.0 / 255.0, 0.0, 0.0],
            fraction: 1.0,
            hex: "#808080".to_string(),
        }],
        lightness_stats,
        dynamic_range: 0.0,
        saturation_mean: saturation_bin as f64,
    }
}

/// Features spread over a band of bins around each center.
pub(crate) fn banded_features(
    id: &str,
    hue_center: usize,
    lightness_center: usize,
    saturation_center: usize,
    width: usize,
) -> ImageFeatures {
    let band = |bins: usize, center: usize| {
        let lo = center.saturating_sub(width);
        let hi = (center + width).min(bins - 1);
        let mut hist = vec![0.0; bins];
        let share = 1.0 / (hi - lo + 1) as f64;
        for slot in &mut hist[lo..=hi] {
            *slot = share;
        }
        hist
    };

    let mut features = flat_features(id, hue_center, lightness_center, saturation_center);
    features.hue_histogram = band(180, hue_center);
    features.lightness_histogram = band(256, lightness_center);
    features.saturation_histogram = band(256, saturation_center);
    features
}
