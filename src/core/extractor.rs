use crate::config::ClassifierConfig;
use crate::core::color::{ColorBuffers, ColorSpaceConverter};
use crate::core::histogram::{HistogramAnalyzer, build_histogram};
use crate::core::models::{DominantColor, ImageFeatures};
use image::{DynamicImage, imageops::FilterType};
use std::path::{Path, PathBuf};
use thiserror::Error;

const HUE_RANGE: f64 = 180.0;
const CHANNEL_RANGE: f64 = 256.0;
const DYNAMIC_RANGE_PERCENTILES: (f64, f64) = (5.0, 95.0);
const KMEANS_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Failed to decode {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: image::ImageError,
    },

    #[error("No pixels to analyse in {id}")]
    EmptyImage { id: String },
}

/// One input of a classification run.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Decoded lazily by the extraction worker.
    Path(PathBuf),
    Decoded { id: String, image: DynamicImage },
}

impl ImageSource {
    pub fn id(&self) -> String {
        match self {
            ImageSource::Path(path) => path.to_string_lossy().to_string(),
            ImageSource::Decoded { id, .. } => id.clone(),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

/// Turns one image into the features the rest of the pipeline compares.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, id: &str, image: &DynamicImage) -> Result<ImageFeatures, FeatureError>;

    fn extract_path(&self, path: &Path) -> Result<ImageFeatures, FeatureError> {
        let id = path.to_string_lossy().to_string();
        let image = image::open(path).map_err(|source| FeatureError::Decode {
            id: id.clone(),
            source,
        })?;
        self.extract(&id, &image)
    }

    fn extract_source(&self, source: &ImageSource) -> Result<ImageFeatures, FeatureError> {
        match source {
            ImageSource::Path(path) => self.extract_path(path),
            ImageSource::Decoded { id, image } => self.extract(id, image),
        }
    }
}

/// Histogram, dominant-color and tonal feature extractor.
#[derive(Debug, Clone)]
pub struct AdvancedFeatureExtractor {
    analysis_size: u32,
    hue_bins: usize,
    lightness_bins: usize,
    saturation_bins: usize,
    n_dominant_colors: usize,
    kmeans_iterations: usize,
    analyzer: HistogramAnalyzer,
}

impl AdvancedFeatureExtractor {
    pub fn new() -> Self {
        Self::from_config(&ClassifierConfig::default())
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            analysis_size: config.analysis_size.max(1),
            hue_bins: config.hue_bins.max(1),
            lightness_bins: config.lightness_bins.max(1),
            saturation_bins: config.saturation_bins.max(1),
            n_dominant_colors: config.dominant_colors.max(1),
            kmeans_iterations: config.kmeans_iterations.max(1),
            analyzer: HistogramAnalyzer::new(
                config.high_key_threshold,
                config.low_key_threshold,
            ),
        }
    }

    pub fn analyzer(&self) -> &HistogramAnalyzer {
        &self.analyzer
    }

    fn dominant_colors(
        &self,
        buffers: &ColorBuffers,
        converter: &ColorSpaceConverter,
    ) -> Vec<DominantColor> {
        let points: Vec<[f32; 3]> = buffers.lab.iter().map(|p| [p.l, p.a, p.b]).collect();
        let (centroids, counts) =
            lloyd_kmeans(&points, self.n_dominant_colors, self.kmeans_iterations);
        let total = points.len() as f64;

        let mut colors: Vec<DominantColor> = centroids
            .into_iter()
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .map(|(lab, count)| DominantColor {
                lab,
                fraction: count as f64 / total,
                hex: converter.lab_to_hex(lab),
            })
            .collect();

        colors.sort_by(|a, b| b.fraction.total_cmp(&a.fraction));
        colors
    }
}

impl Default for AdvancedFeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for AdvancedFeatureExtractor {
    fn extract(&self, id: &str, image: &DynamicImage) -> Result<ImageFeatures, FeatureError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FeatureError::EmptyImage { id: id.to_string() });
        }

        let resized = image
            .resize_exact(self.analysis_size, self.analysis_size, FilterType::Triangle)
            .to_rgb8();

        let converter = ColorSpaceConverter::new();
        let buffers = converter.convert(&resized);
        if buffers.pixel_count() == 0 {
            return Err(FeatureError::EmptyImage { id: id.to_string() });
        }

        let hue_histogram = build_histogram(buffers.hue_values(), self.hue_bins, HUE_RANGE);
        let lightness_histogram =
            build_histogram(buffers.lightness_values(), self.lightness_bins, CHANNEL_RANGE);
        let saturation_histogram =
            build_histogram(buffers.saturation_values(), self.saturation_bins, CHANNEL_RANGE);

        let lightness_stats = self.analyzer.compute_lightness_stats(&lightness_histogram);
        let tonal_class = self.analyzer.classify_mean(lightness_stats.mean);
        let (p_low, p_high) = DYNAMIC_RANGE_PERCENTILES;
        let dynamic_range = self
            .analyzer
            .compute_dynamic_range(&lightness_histogram, p_low, p_high);
        let saturation_mean =
            buffers.saturation_values().sum::<f64>() / buffers.pixel_count() as f64;

        let dominant_colors = self.dominant_colors(&buffers, &converter);

        log::debug!(
            "Extracted {}: lightness mean {:.1}, saturation mean {:.1}, {} dominant colors",
            id,
            lightness_stats.mean,
            saturation_mean,
            dominant_colors.len()
        );

        Ok(ImageFeatures {
            image_path: id.to_string(),
            hue_histogram,
            lightness_histogram,
            saturation_histogram,
            dominant_colors,
            tonal_class,
            lightness_stats,
            dynamic_range,
            saturation_mean,
        })
    }
}

fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn nearest_centroid(point: &[f32; 3], centroids: &[[f32; 3]]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = squared_distance(point, centroid);
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

/// Maximin seeding: start from the first point, then repeatedly take the point
/// farthest from every seed chosen so far. Stops early once all points coincide
/// with a seed.
fn seed_centroids(points: &[[f32; 3]], k: usize) -> Vec<[f32; 3]> {
    let Some(first) = points.first() else {
        return Vec::new();
    };

    let mut centroids = vec![*first];
    let mut nearest: Vec<f32> = points.iter().map(|p| squared_distance(p, first)).collect();

    while centroids.len() < k {
        let (index, farthest) = nearest
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &d)| if d > best.1 { (i, d) } else { best });
        if farthest <= 0.0 {
            break;
        }

        let seed = points[index];
        centroids.push(seed);
        for (n, p) in nearest.iter_mut().zip(points) {
            *n = n.min(squared_distance(p, &seed));
        }
    }

    centroids
}

/// Lloyd's k-means. Returns the centroids and how many points each one owns;
/// every point is owned by exactly one centroid.
fn lloyd_kmeans(
    points: &[[f32; 3]],
    k: usize,
    iterations: usize,
) -> (Vec<[f32; 3]>, Vec<usize>) {
    let mut centroids = seed_centroids(points, k);
    if centroids.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut assignments = vec![0usize; points.len()];

    for _ in 0..iterations {
        for (slot, point) in assignments.iter_mut().zip(points) {
            *slot = nearest_centroid(point, &centroids);
        }

        let mut sums = vec![[0.0f64; 3]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (&cluster, point) in assignments.iter().zip(points) {
            for c in 0..3 {
                sums[cluster][c] += point[c] as f64;
            }
            counts[cluster] += 1;
        }

        let mut shift = 0.0f32;
        for (j, centroid) in centroids.iter_mut().enumerate() {
            if counts[j] == 0 {
                continue;
            }
            let n = counts[j] as f64;
            let updated = [
                (sums[j][0] / n) as f32,
                (sums[j][1] / n) as f32,
                (sums[j][2] / n) as f32,
            ];
            shift = shift.max(squared_distance(&updated, centroid).sqrt());
            *centroid = updated;
        }

        if shift < KMEANS_TOLERANCE {
            break;
        }
    }

    let mut counts = vec![0usize; centroids.len()];
    for point in points {
        counts[nearest_centroid(point, &centroids)] += 1;
    }

    (centroids, counts)
}
