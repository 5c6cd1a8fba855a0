use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TonalClass {
    HighKey,
    MidKey,
    LowKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HueCategory {
    Warm,
    Cool,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationLevel {
    Vivid,
    Moderate,
    Muted,
    Neutral,
}

impl TonalClass {
    pub fn label(&self) -> &'static str {
        match self {
            TonalClass::HighKey => "high-key",
            TonalClass::MidKey => "mid-key",
            TonalClass::LowKey => "low-key",
        }
    }
}

impl HueCategory {
    pub fn label(&self) -> &'static str {
        match self {
            HueCategory::Warm => "warm",
            HueCategory::Cool => "cool",
            HueCategory::Neutral => "neutral",
        }
    }
}

impl SaturationLevel {
    pub fn label(&self) -> &'static str {
        match self {
            SaturationLevel::Vivid => "vivid",
            SaturationLevel::Moderate => "moderate",
            SaturationLevel::Muted => "muted",
            SaturationLevel::Neutral => "neutral",
        }
    }
}

impl fmt::Display for TonalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for HueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for SaturationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Moments of the lightness distribution on the 0-255 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightnessStats {
    pub mean: f64,
    pub std: f64,
    pub skewness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    /// CIELAB (D65): L in 0-100, a and b roughly -128..127.
    pub lab: [f32; 3],
    /// Share of analysed pixels assigned to this color, 0-1.
    pub fraction: f64,
    pub hex: String,
}

/// Color descriptors of one image. Every histogram sums to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFeatures {
    pub image_path: String,
    pub hue_histogram: Vec<f64>,
    pub lightness_histogram: Vec<f64>,
    pub saturation_histogram: Vec<f64>,
    /// Ordered by descending fraction; fractions sum to 1.
    pub dominant_colors: Vec<DominantColor>,
    pub tonal_class: TonalClass,
    pub lightness_stats: LightnessStats,
    pub dynamic_range: f64,
    /// Mean HSV saturation on the 0-255 scale.
    pub saturation_mean: f64,
}

impl ImageFeatures {
    /// Lightness dispersion; identical to the standard deviation.
    pub fn contrast(&self) -> f64 {
        self.lightness_stats.std
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: usize,
    pub name: String,
    pub image_paths: Vec<String>,
    pub tonal_class: TonalClass,
    pub hue_category: HueCategory,
    pub saturation_level: SaturationLevel,
    pub image_count: usize,
    /// Medoid of the cluster under the run's distance matrix.
    pub representative: ImageFeatures,
}

/// An input that produced no features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedImage {
    pub image_path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedClassificationResult {
    pub clusters: Vec<ClusterInfo>,
    pub n_clusters: usize,
    pub silhouette_score: f64,
    /// Images that were clustered; excluded inputs are not counted.
    pub total_images: usize,
    pub excluded: Vec<ExcludedImage>,
    pub used_fallback: bool,
    pub processing_time: Duration,
}

impl AdvancedClassificationResult {
    pub fn empty(excluded: Vec<ExcludedImage>, processing_time: Duration) -> Self {
        Self {
            clusters: Vec::new(),
            n_clusters: 0,
            silhouette_score: 0.0,
            total_images: 0,
            excluded,
            used_fallback: false,
            processing_time,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
