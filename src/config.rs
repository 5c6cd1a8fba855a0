use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid feature weights: hue={hue}, lightness={lightness}, saturation={saturation}")]
    InvalidWeights {
        hue: f64,
        lightness: f64,
        saturation: f64,
    },

    #[error("Unknown distance metric: {0}")]
    UnknownMetric(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Relative importance of the three histogram channels when two images are compared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub hue: f64,
    pub lightness: f64,
    pub saturation: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            hue: 0.40,
            lightness: 0.35,
            saturation: 0.25,
        }
    }
}

impl FeatureWeights {
    pub fn new(hue: f64, lightness: f64, saturation: f64) -> Self {
        Self {
            hue,
            lightness,
            saturation,
        }
    }

    /// Scale the weights so they sum to 1.
    ///
    /// Fails when any weight is negative or non-finite, or when all of them are zero.
    pub fn normalized(&self) -> Result<Self, ConfigError> {
        let parts = [self.hue, self.lightness, self.saturation];
        let total: f64 = parts.iter().sum();

        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) || !total.is_finite() || total <= 0.0
        {
            return Err(ConfigError::InvalidWeights {
                hue: self.hue,
                lightness: self.lightness,
                saturation: self.saturation,
            });
        }

        Ok(Self {
            hue: self.hue / total,
            lightness: self.lightness / total,
            saturation: self.saturation / total,
        })
    }

    /// Normalized weights, or the defaults when these cannot be normalized.
    pub fn sanitized(&self) -> Self {
        match self.normalized() {
            Ok(weights) => weights,
            Err(e) => {
                log::warn!("{}; falling back to default weights", e);
                Self::default()
            }
        }
    }
}

impl FromStr for FeatureWeights {
    type Err = String;

    /// Parses `"hue,lightness,saturation"`, e.g. `"0.5,0.3,0.2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("invalid weight in {:?}: {}", s, e))?;

        match parts.as_slice() {
            [hue, lightness, saturation] => Ok(Self::new(*hue, *lightness, *saturation)),
            _ => Err(format!(
                "expected three comma-separated weights, got {}",
                parts.len()
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Intersection,
    ChiSquare,
    #[default]
    Bhattacharyya,
    Correlation,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Intersection => "intersection",
            DistanceMetric::ChiSquare => "chi_square",
            DistanceMetric::Bhattacharyya => "bhattacharyya",
            DistanceMetric::Correlation => "correlation",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "intersection" => Ok(DistanceMetric::Intersection),
            "chi_square" | "chisquare" | "chi2" => Ok(DistanceMetric::ChiSquare),
            "bhattacharyya" => Ok(DistanceMetric::Bhattacharyya),
            "correlation" => Ok(DistanceMetric::Correlation),
            other => Err(ConfigError::UnknownMetric(other.to_string())),
        }
    }
}

/// Everything a single `classify` run depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Images are resized to `analysis_size` x `analysis_size` before analysis.
    pub analysis_size: u32,
    pub hue_bins: usize,
    pub lightness_bins: usize,
    pub saturation_bins: usize,
    pub dominant_colors: usize,
    pub kmeans_iterations: usize,
    pub high_key_threshold: f64,
    pub low_key_threshold: f64,
    pub weights: FeatureWeights,
    pub metric: DistanceMetric,
    pub min_clusters: usize,
    pub max_clusters: usize,
    /// Fixed cluster count; skips silhouette search when set.
    pub n_clusters: Option<usize>,
    /// Cluster count of the flat partition used when hierarchical clustering degenerates.
    pub fallback_clusters: usize,
    /// Size of the extraction worker pool; all cores when unset.
    pub worker_threads: Option<usize>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            analysis_size: 200,
            hue_bins: 180,
            lightness_bins: 256,
            saturation_bins: 256,
            dominant_colors: 5,
            kmeans_iterations: 20,
            high_key_threshold: 170.0,
            low_key_threshold: 85.0,
            weights: FeatureWeights::default(),
            metric: DistanceMetric::default(),
            min_clusters: 2,
            max_clusters: 10,
            n_clusters: None,
            fallback_clusters: 3,
            worker_threads: None,
        }
    }
}

impl ClassifierConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: ClassifierConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Repair out-of-range values, logging each repair.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.analysis_size == 0 {
            log::warn!("analysis_size must be positive; using {}", defaults.analysis_size);
            self.analysis_size = defaults.analysis_size;
        }
        if self.hue_bins == 0 {
            log::warn!("hue_bins must be positive; using {}", defaults.hue_bins);
            self.hue_bins = defaults.hue_bins;
        }
        if self.lightness_bins == 0 {
            log::warn!("lightness_bins must be positive; using {}", defaults.lightness_bins);
            self.lightness_bins = defaults.lightness_bins;
        }
        if self.saturation_bins == 0 {
            log::warn!("saturation_bins must be positive; using {}", defaults.saturation_bins);
            self.saturation_bins = defaults.saturation_bins;
        }
        self.dominant_colors = self.dominant_colors.max(1);
        self.kmeans_iterations = self.kmeans_iterations.max(1);

        if self.low_key_threshold > self.high_key_threshold {
            log::warn!(
                "low_key_threshold {} exceeds high_key_threshold {}; swapping",
                self.low_key_threshold,
                self.high_key_threshold
            );
            std::mem::swap(&mut self.low_key_threshold, &mut self.high_key_threshold);
        }

        self.weights = self.weights.sanitized();

        self.min_clusters = self.min_clusters.max(1);
        self.max_clusters = self.max_clusters.max(1);
        if self.min_clusters > self.max_clusters {
            log::warn!(
                "min_clusters {} exceeds max_clusters {}; swapping",
                self.min_clusters,
                self.max_clusters
            );
            std::mem::swap(&mut self.min_clusters, &mut self.max_clusters);
        }

        self.n_clusters = self.n_clusters.filter(|&k| k > 0);
        self.fallback_clusters = self.fallback_clusters.max(1);
        self.worker_threads = self.worker_threads.filter(|&n| n > 0);

        self
    }
}
