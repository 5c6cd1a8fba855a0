//! Groups photographs into color-coherent categories.
//!
//! Each image is reduced to hue, lightness and saturation histograms plus a few
//! dominant colors, the batch is compared pairwise, grouped with Ward-linkage
//! clustering and every group gets a descriptive name such as
//! `high-key_cool_muted`.

pub mod config;
pub mod core;

pub use config::{ClassifierConfig, ConfigError, DistanceMetric, FeatureWeights};
pub use crate::core::engine::{ClassificationEngine, ClassifyError, ClassifyPhase, ProgressEvent};
pub use crate::core::extractor::{
    AdvancedFeatureExtractor, FeatureError, FeatureExtractor, ImageSource,
};
pub use crate::core::models::{
    AdvancedClassificationResult, ClusterInfo, ExcludedImage, HueCategory, ImageFeatures,
    SaturationLevel, TonalClass,
};

/// Classify `images` with a fresh engine built from `config`.
pub fn classify(
    images: &[ImageSource],
    config: &ClassifierConfig,
) -> Result<AdvancedClassificationResult, ClassifyError> {
    ClassificationEngine::new(config.clone()).classify(images)
}
