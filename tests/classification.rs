use chromasort::core::models::{DominantColor, LightnessStats};
use chromasort::{
    ClassificationEngine, ClassifierConfig, FeatureError, FeatureExtractor, HueCategory,
    ImageFeatures, ImageSource, TonalClass, classify,
};
use chromasort::{AdvancedFeatureExtractor, DistanceMetric};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn create_solid_image(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(64, 48, Rgb(rgb)).save(&path).unwrap();
    path
}

fn create_gradient_image(dir: &Path, name: &str, seed: u8) -> PathBuf {
    let path = dir.join(name);
    let img = RgbImage::from_fn(64, 64, |x, y| {
        Rgb([
            (x as u8).wrapping_mul(4).wrapping_add(seed),
            (y as u8).wrapping_mul(3),
            seed.wrapping_mul(7),
        ])
    });
    img.save(&path).unwrap();
    path
}

fn test_config(min_clusters: usize, max_clusters: usize) -> ClassifierConfig {
    ClassifierConfig {
        analysis_size: 32,
        min_clusters,
        max_clusters,
        ..ClassifierConfig::default()
    }
}

fn sources(paths: &[PathBuf]) -> Vec<ImageSource> {
    paths.iter().cloned().map(ImageSource::from).collect()
}

fn id(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[test]
fn test_red_and_blue_images_form_warm_and_cool_groups() {
    let temp_dir = TempDir::new().unwrap();
    let red1 = create_solid_image(temp_dir.path(), "red1.png", [255, 0, 0]);
    let blue1 = create_solid_image(temp_dir.path(), "blue1.png", [0, 0, 255]);
    let red2 = create_solid_image(temp_dir.path(), "red2.png", [255, 0, 0]);
    let blue2 = create_solid_image(temp_dir.path(), "blue2.png", [0, 0, 255]);

    let result = classify(
        &sources(&[red1.clone(), blue1.clone(), red2.clone(), blue2.clone()]),
        &test_config(2, 4),
    )
    .unwrap();

    assert_eq!(result.n_clusters, 2);
    assert_eq!(result.total_images, 4);
    assert!(result.excluded.is_empty());
    assert!(!result.used_fallback);

    let red_cluster = result
        .clusters
        .iter()
        .find(|c| c.image_paths.contains(&id(&red1)))
        .unwrap();
    let blue_cluster = result
        .clusters
        .iter()
        .find(|c| c.image_paths.contains(&id(&blue1)))
        .unwrap();

    assert_eq!(red_cluster.image_paths, vec![id(&red1), id(&red2)]);
    assert_eq!(blue_cluster.image_paths, vec![id(&blue1), id(&blue2)]);
    assert!(red_cluster.name.contains("warm"), "{}", red_cluster.name);
    assert!(blue_cluster.name.contains("cool"), "{}", blue_cluster.name);
    assert_eq!(red_cluster.hue_category, HueCategory::Warm);
    assert_eq!(blue_cluster.hue_category, HueCategory::Cool);
    assert_eq!(blue_cluster.tonal_class, TonalClass::LowKey);
}

#[test]
fn test_undecodable_image_is_excluded_and_reported() {
    let temp_dir = TempDir::new().unwrap();
    let broken = temp_dir.path().join("broken.png");
    fs::write(&broken, b"definitely not a png").unwrap();
    let good = vec![
        create_solid_image(temp_dir.path(), "a.png", [250, 30, 30]),
        create_solid_image(temp_dir.path(), "b.png", [30, 30, 250]),
        create_solid_image(temp_dir.path(), "c.png", [240, 40, 20]),
    ];

    let mut inputs = good.clone();
    inputs.insert(1, broken.clone());
    let result = classify(&sources(&inputs), &test_config(2, 3)).unwrap();

    assert_eq!(result.excluded.len(), 1);
    assert_eq!(result.excluded[0].image_path, id(&broken));
    assert!(!result.excluded[0].reason.is_empty());
    assert_eq!(result.total_images, 3);

    let clustered: Vec<&String> = result.clusters.iter().flat_map(|c| &c.image_paths).collect();
    assert_eq!(clustered.len(), 3);
    assert!(!clustered.contains(&&id(&broken)));
}

#[test]
fn test_single_image_below_minimum_forms_one_cluster() {
    let temp_dir = TempDir::new().unwrap();
    let only = create_solid_image(temp_dir.path(), "only.png", [20, 200, 40]);

    let result = classify(&sources(&[only.clone()]), &test_config(2, 5)).unwrap();

    assert_eq!(result.n_clusters, 1);
    assert_eq!(result.clusters[0].image_paths, vec![id(&only)]);
    assert_eq!(result.clusters[0].representative.image_path, id(&only));
}

/// Every image yields the same features regardless of content.
struct ConstantExtractor;

impl FeatureExtractor for ConstantExtractor {
    fn extract(&self, id: &str, _image: &DynamicImage) -> Result<ImageFeatures, FeatureError> {
        let mut hue = vec![0.0; 180];
        hue[100] = 1.0;
        let mut lightness = vec![0.0; 256];
        lightness[128] = 1.0;
        let mut saturation = vec![0.0; 256];
        saturation[90] = 1.0;

        Ok(ImageFeatures {
            image_path: id.to_string(),
            hue_histogram: hue,
            lightness_histogram: lightness,
            saturation_histogram: saturation,
            dominant_colors: vec![DominantColor {
                lab: [50.0, -20.0, -30.0],
                fraction: 1.0,
                hex: "#00809F".to_string(),
            }],
            tonal_class: TonalClass::MidKey,
            lightness_stats: LightnessStats {
                mean: 128.0,
                std: 0.0,
                skewness: 0.0,
            },
            dynamic_range: 0.0,
            saturation_mean: 90.0,
        })
    }
}

#[test]
fn test_identical_features_fall_back_to_flat_partition() {
    let images: Vec<ImageSource> = (0..6)
        .map(|i| ImageSource::Decoded {
            id: format!("img{i}"),
            image: DynamicImage::ImageRgb8(RgbImage::new(4, 4)),
        })
        .collect();
    let engine = ClassificationEngine::with_extractor(test_config(2, 4), ConstantExtractor);

    let result = engine.classify(&images).unwrap();

    assert!(result.used_fallback);
    assert_eq!(result.n_clusters, 3);
    let names: HashSet<&str> = result.clusters.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.starts_with("mid-key_cool_moderate_")));
}

#[test]
fn test_every_image_lands_in_exactly_one_cluster() {
    let temp_dir = TempDir::new().unwrap();
    let paths: Vec<PathBuf> = (0..9u8)
        .map(|i| create_gradient_image(temp_dir.path(), &format!("g{i}.png"), i * 29))
        .collect();

    for metric in [
        DistanceMetric::Intersection,
        DistanceMetric::ChiSquare,
        DistanceMetric::Bhattacharyya,
        DistanceMetric::Correlation,
    ] {
        let config = ClassifierConfig {
            metric,
            ..test_config(2, 5)
        };
        let result = classify(&sources(&paths), &config).unwrap();

        let mut seen: Vec<String> = result
            .clusters
            .iter()
            .flat_map(|c| c.image_paths.clone())
            .collect();
        seen.sort();
        let mut expected: Vec<String> = paths.iter().map(|p| id(p)).collect();
        expected.sort();
        assert_eq!(seen, expected, "metric {metric}");
        assert_eq!(result.clusters.len(), result.n_clusters);
        assert!(result.clusters.iter().all(|c| c.image_count == c.image_paths.len()));
        assert!(result.silhouette_score >= -1.0 && result.silhouette_score <= 1.0);
    }
}

#[test]
fn test_extracted_features_are_distributions() {
    let temp_dir = TempDir::new().unwrap();
    let extractor = AdvancedFeatureExtractor::from_config(&test_config(2, 4));

    for seed in [0u8, 40, 90, 200] {
        let path = create_gradient_image(temp_dir.path(), &format!("f{seed}.png"), seed);
        let features = extractor.extract_path(&path).unwrap();

        for hist in [
            &features.hue_histogram,
            &features.lightness_histogram,
            &features.saturation_histogram,
        ] {
            assert!((hist.iter().sum::<f64>() - 1.0).abs() < 1e-6);
            assert!(hist.iter().all(|p| *p >= 0.0));
        }
        let fractions: f64 = features.dominant_colors.iter().map(|c| c.fraction).sum();
        assert!((fractions - 1.0).abs() < 0.01);
        assert!(features.dominant_colors.len() <= 5);
    }
}

#[test]
fn test_result_serializes_to_json() {
    let temp_dir = TempDir::new().unwrap();
    let paths = vec![
        create_solid_image(temp_dir.path(), "x.png", [200, 200, 210]),
        create_solid_image(temp_dir.path(), "y.png", [10, 10, 20]),
    ];

    let result = classify(&sources(&paths), &test_config(1, 2)).unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["total_images"], 2);
    assert!(json["clusters"].is_array());
    assert!(json["clusters"][0]["representative"]["hue_histogram"].is_array());
}
