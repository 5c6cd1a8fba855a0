use crate::config::{ClassifierConfig, DistanceMetric, FeatureWeights};
use crate::core::clusterer::AdaptiveClusterer;
use crate::core::extractor::{AdvancedFeatureExtractor, FeatureExtractor, ImageSource};
use crate::core::models::{
    AdvancedClassificationResult, ClusterInfo, ExcludedImage, ImageFeatures,
};
use crate::core::namer::CategoryNamer;
use crate::core::similarity::{DistanceMatrix, SimilarityCalculator};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub processed: usize,
    pub total: usize,
    pub current: String,
    pub estimated_time_remaining: Option<u64>, // seconds
    pub phase: ClassifyPhase,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ClassifyPhase {
    Extracting,
    Clustering,
    Naming,
    Complete,
}

/// Runs extraction, similarity, clustering and naming over one batch of images.
///
/// Generic over the extractor so a simpler or stubbed implementation can be
/// swapped in without touching the rest of the pipeline.
pub struct ClassificationEngine<E: FeatureExtractor = AdvancedFeatureExtractor> {
    config: ClassifierConfig,
    extractor: E,
    calculator: SimilarityCalculator,
    namer: CategoryNamer,
    progress_sender: Option<mpsc::Sender<ProgressEvent>>,
    cancellation_token: Arc<AtomicBool>,
}

impl ClassificationEngine<AdvancedFeatureExtractor> {
    pub fn new(config: ClassifierConfig) -> Self {
        let config = config.validated();
        let extractor = AdvancedFeatureExtractor::from_config(&config);
        Self::with_extractor(config, extractor)
    }
}

impl<E: FeatureExtractor> ClassificationEngine<E> {
    pub fn with_extractor(config: ClassifierConfig, extractor: E) -> Self {
        let config = config.validated();
        Self {
            calculator: SimilarityCalculator::new(config.weights, config.metric),
            config,
            extractor,
            namer: CategoryNamer::new(),
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    /// Clear a previous cancellation so the engine can run again.
    pub fn reset_cancellation(&self) {
        self.cancellation_token.store(false, Ordering::Relaxed);
    }

    /// Applies to subsequent `classify` calls only. Invalid weights fall back
    /// to the defaults.
    pub fn set_feature_weights(&mut self, weights: FeatureWeights) {
        let weights = match weights.normalized() {
            Ok(w) => w,
            Err(e) => {
                log::warn!("{}; using default weights", e);
                FeatureWeights::default()
            }
        };
        self.config.weights = weights;
        self.calculator.set_weights(weights);
    }

    pub fn set_distance_metric(&mut self, metric: DistanceMetric) {
        self.config.metric = metric;
        self.calculator.set_metric(metric);
    }

    pub fn set_cluster_range(&mut self, min_clusters: usize, max_clusters: usize) {
        let mut config = self.config.clone();
        config.min_clusters = min_clusters;
        config.max_clusters = max_clusters;
        self.config = config.validated();
    }

    pub fn classify(
        &self,
        images: &[ImageSource],
    ) -> Result<AdvancedClassificationResult, ClassifyError> {
        let start_time = Instant::now();
        self.check_cancelled()?;

        let outcomes = match self.config.worker_threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?
                .install(|| self.extract_all(images, start_time))?,
            None => self.extract_all(images, start_time)?,
        };

        let mut features = Vec::with_capacity(outcomes.len());
        let mut excluded = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(f) => features.push(f),
                Err(e) => excluded.push(e),
            }
        }

        if features.is_empty() {
            log::warn!("No usable images among {} input(s)", images.len());
            self.send_complete(0);
            return Ok(AdvancedClassificationResult::empty(
                excluded,
                start_time.elapsed(),
            ));
        }

        self.check_cancelled()?;
        self.send_phase(ClassifyPhase::Clustering, features.len());
        let matrix = self.calculator.build_distance_matrix(&features);

        self.check_cancelled()?;
        let clusterer = AdaptiveClusterer::new(self.config.min_clusters, self.config.max_clusters)
            .with_fallback_clusters(self.config.fallback_clusters);
        // Degenerate matrices are recovered inside try_cluster; only cancellation escapes.
        let partition = clusterer
            .try_cluster(&matrix, self.config.n_clusters, &self.cancellation_token)
            .map_err(|_| ClassifyError::Cancelled)?;

        self.send_phase(ClassifyPhase::Naming, features.len());
        let clusters = self.build_clusters(&features, &matrix, partition.members());

        log::info!(
            "Classified {} image(s) into {} cluster(s), silhouette {:.3}, {} excluded",
            features.len(),
            clusters.len(),
            partition.silhouette_score,
            excluded.len()
        );
        self.send_complete(features.len());

        Ok(AdvancedClassificationResult {
            n_clusters: clusters.len(),
            clusters,
            silhouette_score: partition.silhouette_score,
            total_images: features.len(),
            excluded,
            used_fallback: partition.used_fallback,
            processing_time: start_time.elapsed(),
        })
    }

    fn extract_all(
        &self,
        images: &[ImageSource],
        start_time: Instant,
    ) -> Result<Vec<Result<ImageFeatures, ExcludedImage>>, ClassifyError> {
        let total = images.len();
        let processed_count = AtomicUsize::new(0);

        images
            .par_iter()
            .map(|source| {
                if self.cancellation_token.load(Ordering::Relaxed) {
                    return Err(ClassifyError::Cancelled);
                }

                let id = source.id();
                let outcome = self.extractor.extract_source(source).map_err(|e| {
                    log::warn!("Excluding {}: {}", id, e);
                    ExcludedImage {
                        image_path: id.clone(),
                        reason: e.to_string(),
                    }
                });

                let current_count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                let elapsed = start_time.elapsed().as_secs_f64();
                let estimated_remaining = if elapsed > 0.0 {
                    let rate = current_count as f64 / elapsed;
                    Some(((total - current_count) as f64 / rate) as u64)
                } else {
                    None
                };

                self.send_progress(ProgressEvent {
                    processed: current_count,
                    total,
                    current: id,
                    estimated_time_remaining: estimated_remaining,
                    phase: ClassifyPhase::Extracting,
                });

                Ok(outcome)
            })
            .collect()
    }

    fn build_clusters(
        &self,
        features: &[ImageFeatures],
        matrix: &DistanceMatrix,
        groups: Vec<Vec<usize>>,
    ) -> Vec<ClusterInfo> {
        let named: Vec<_> = groups
            .into_par_iter()
            .map(|members| {
                let refs: Vec<&ImageFeatures> = members.iter().map(|&i| &features[i]).collect();
                let details = self.namer.generate_name_with_details(&refs);
                let medoid = medoid(matrix, &members);
                (members, details, medoid)
            })
            .collect();

        let base_names: Vec<String> = named.iter().map(|(_, d, _)| d.name.clone()).collect();
        let names = self.namer.generate_unique_names(&base_names);

        named
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(cluster_id, ((members, details, medoid), name))| ClusterInfo {
                cluster_id,
                name,
                image_paths: members
                    .iter()
                    .map(|&i| features[i].image_path.clone())
                    .collect(),
                tonal_class: details.tonal_class,
                hue_category: details.hue_category,
                saturation_level: details.saturation_level,
                image_count: members.len(),
                representative: features[medoid].clone(),
            })
            .collect()
    }

    fn check_cancelled(&self) -> Result<(), ClassifyError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            Err(ClassifyError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn send_phase(&self, phase: ClassifyPhase, total: usize) {
        self.send_progress(ProgressEvent {
            processed: total,
            total,
            current: String::new(),
            estimated_time_remaining: None,
            phase,
        });
    }

    fn send_complete(&self, total: usize) {
        self.send_phase(ClassifyPhase::Complete, total);
    }

    fn send_progress(&self, progress: ProgressEvent) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

/// Member with the smallest total distance to the rest of its cluster; ties
/// go to the earliest member.
fn medoid(matrix: &DistanceMatrix, members: &[usize]) -> usize {
    let mut best = members.first().copied().unwrap_or(0);
    let mut best_total = f64::INFINITY;
    for &i in members {
        let total: f64 = members.iter().map(|&j| matrix.get(i, j)).sum();
        if total < best_total {
            best = i;
            best_total = total;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extractor::FeatureError;
    use crate::core::fixtures::flat_features;
    use crate::core::models::HueCategory;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::OnceLock;

    fn solid(id: &str, rgb: [u8; 3]) -> ImageSource {
        ImageSource::Decoded {
            id: id.to_string(),
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(rgb))),
        }
    }

    fn small_config() -> ClassifierConfig {
        ClassifierConfig {
            analysis_size: 16,
            min_clusters: 2,
            max_clusters: 4,
            ..ClassifierConfig::default()
        }
    }

    /// Maps ids to canned features; ids starting with "bad" fail.
    struct CannedExtractor;

    impl FeatureExtractor for CannedExtractor {
        fn extract(&self, id: &str, _image: &DynamicImage) -> Result<ImageFeatures, FeatureError> {
            if id.starts_with("bad") {
                return Err(FeatureError::EmptyImage { id: id.to_string() });
            }
            Ok(flat_features(id, 0, 128, 200))
        }
    }

    #[test]
    fn test_red_and_blue_split() {
        let engine = ClassificationEngine::new(small_config());
        let images = vec![
            solid("red1", [255, 0, 0]),
            solid("blue1", [0, 0, 255]),
            solid("red2", [255, 0, 0]),
            solid("blue2", [0, 0, 255]),
        ];

        let result = engine.classify(&images).unwrap();

        assert_eq!(result.n_clusters, 2);
        assert_eq!(result.total_images, 4);
        let red = result
            .clusters
            .iter()
            .find(|c| c.image_paths.contains(&"red1".to_string()))
            .unwrap();
        assert_eq!(red.image_paths, vec!["red1", "red2"]);
        assert_eq!(red.hue_category, HueCategory::Warm);
        assert!(red.name.contains("warm"));
    }

    #[test]
    fn test_empty_batch() {
        let engine = ClassificationEngine::new(small_config());
        let result = engine.classify(&[]).unwrap();

        assert!(result.is_empty());
        assert_eq!(result.n_clusters, 0);
        assert_eq!(result.total_images, 0);
    }

    #[test]
    fn test_all_inputs_failing_yields_empty_result() {
        let engine = ClassificationEngine::with_extractor(small_config(), CannedExtractor);
        let images = vec![solid("bad1", [0, 0, 0]), solid("bad2", [0, 0, 0])];

        let result = engine.classify(&images).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.excluded.len(), 2);
    }

    #[test]
    fn test_identical_features_use_fallback() {
        let engine = ClassificationEngine::with_extractor(small_config(), CannedExtractor);
        let images: Vec<ImageSource> =
            (0..5).map(|i| solid(&format!("img{i}"), [9, 9, 9])).collect();

        let result = engine.classify(&images).unwrap();

        assert!(result.used_fallback);
        assert_eq!(result.n_clusters, 3);
        let total: usize = result.clusters.iter().map(|c| c.image_count).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_cancelled_before_start() {
        let engine = ClassificationEngine::new(small_config());
        engine.cancel();
        assert!(engine.get_cancellation_token().load(Ordering::Relaxed));

        let result = engine.classify(&[solid("a", [1, 2, 3])]);
        assert!(matches!(result, Err(ClassifyError::Cancelled)));

        engine.reset_cancellation();
        assert!(engine.classify(&[solid("a", [1, 2, 3])]).is_ok());
    }

    /// Trips the engine's cancellation token from inside the first extraction.
    struct CancellingExtractor {
        token: Arc<OnceLock<Arc<AtomicBool>>>,
        calls: Arc<AtomicUsize>,
    }

    impl FeatureExtractor for CancellingExtractor {
        fn extract(&self, id: &str, _image: &DynamicImage) -> Result<ImageFeatures, FeatureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = self.token.get() {
                token.store(true, Ordering::SeqCst);
            }
            Ok(flat_features(id, 0, 128, 200))
        }
    }

    #[test]
    fn test_cancelled_between_extractions() {
        let token = Arc::new(OnceLock::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = CancellingExtractor {
            token: token.clone(),
            calls: calls.clone(),
        };
        let config = ClassifierConfig {
            worker_threads: Some(1),
            ..small_config()
        };
        let engine = ClassificationEngine::with_extractor(config, extractor);
        assert!(token.set(engine.get_cancellation_token()).is_ok());

        let images: Vec<ImageSource> =
            (0..20).map(|i| solid(&format!("img{i}"), [9, 9, 9])).collect();
        let result = engine.classify(&images);

        assert!(matches!(result, Err(ClassifyError::Cancelled)));
        assert!(calls.load(Ordering::SeqCst) < images.len());
    }

    #[test]
    fn test_progress_events() {
        let (tx, rx) = mpsc::channel();
        let engine = ClassificationEngine::new(small_config()).with_progress_sender(tx);
        let images = vec![solid("a", [200, 10, 10]), solid("b", [10, 10, 200])];

        engine.classify(&images).unwrap();
        drop(engine);
        let events: Vec<ProgressEvent> = rx.iter().collect();

        let extracting: Vec<_> = events
            .iter()
            .filter(|e| e.phase == ClassifyPhase::Extracting)
            .collect();
        assert_eq!(extracting.len(), 2);
        assert!(extracting.iter().all(|e| e.total == 2));
        let mut counts: Vec<usize> = extracting.iter().map(|e| e.processed).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(events.last().map(|e| e.phase), Some(ClassifyPhase::Complete));
    }

    #[test]
    fn test_setters() {
        let mut engine = ClassificationEngine::new(small_config());

        engine.set_feature_weights(FeatureWeights::new(1.0, 1.0, 2.0));
        assert!((engine.config().weights.saturation - 0.5).abs() < 1e-12);

        engine.set_feature_weights(FeatureWeights::new(-1.0, 0.0, 0.0));
        assert_eq!(engine.config().weights, FeatureWeights::default());

        engine.set_distance_metric(DistanceMetric::ChiSquare);
        assert_eq!(engine.config().metric, DistanceMetric::ChiSquare);

        engine.set_cluster_range(6, 3);
        assert_eq!(engine.config().min_clusters, 3);
        assert_eq!(engine.config().max_clusters, 6);
    }

    #[test]
    fn test_fixed_thread_pool() {
        let config = ClassifierConfig {
            worker_threads: Some(2),
            n_clusters: Some(2),
            ..small_config()
        };
        let engine = ClassificationEngine::new(config);
        let images = vec![
            solid("a", [250, 0, 0]),
            solid("b", [0, 250, 0]),
            solid("c", [0, 0, 250]),
        ];

        let result = engine.classify(&images).unwrap();
        assert_eq!(result.n_clusters, 2);
    }

    #[test]
    fn test_medoid_prefers_central_member() {
        let matrix = DistanceMatrix::from_rows(vec![
            vec![0.0, 0.2, 0.9],
            vec![0.2, 0.0, 0.3],
            vec![0.9, 0.3, 0.0],
        ])
        .unwrap();
        assert_eq!(medoid(&matrix, &[0, 1, 2]), 1);
        assert_eq!(medoid(&matrix, &[0, 2]), 0);
    }
}
