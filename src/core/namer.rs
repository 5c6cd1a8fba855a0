use crate::core::models::{HueCategory, ImageFeatures, SaturationLevel, TonalClass};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

pub const VIVID_THRESHOLD: f64 = 150.0;
pub const MODERATE_THRESHOLD: f64 = 80.0;
pub const MUTED_THRESHOLD: f64 = 30.0;

/// Below this mean saturation the saturation term is dropped from the label.
const DEGENERATE_SATURATION: f64 = 5.0;
/// Minimum resultant length for a meaningful mean hue.
const MIN_HUE_RESULTANT: f64 = 0.1;

const UNCATEGORIZED: &str = "uncategorized";

/// Label of a cluster and the descriptors it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameDetails {
    pub name: String,
    pub tonal_class: TonalClass,
    pub hue_category: HueCategory,
    pub saturation_level: SaturationLevel,
    /// Circular mean hue in degrees, `None` when the hue is undefined.
    pub mean_hue: Option<f64>,
    pub mean_saturation: f64,
}

/// Turns the aggregated features of a cluster into a descriptive label such
/// as `mid-key_warm_vivid`.
#[derive(Debug, Clone, Default)]
pub struct CategoryNamer;

impl CategoryNamer {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_name(&self, members: &[&ImageFeatures]) -> String {
        self.generate_name_with_details(members).name
    }

    pub fn generate_name_with_details(&self, members: &[&ImageFeatures]) -> NameDetails {
        if members.is_empty() {
            return NameDetails {
                name: UNCATEGORIZED.to_string(),
                tonal_class: TonalClass::MidKey,
                hue_category: HueCategory::Neutral,
                saturation_level: SaturationLevel::Neutral,
                mean_hue: None,
                mean_saturation: 0.0,
            };
        }

        let tonal_class = majority_tonal_class(members);

        // Sorted before summing so the result does not depend on member order.
        let mut saturations: Vec<f64> = members.iter().map(|f| f.saturation_mean).collect();
        saturations.sort_by(f64::total_cmp);
        let mean_saturation = saturations.iter().sum::<f64>() / members.len() as f64;

        let mean_hue = circular_mean_hue(members);
        let hue_category = match mean_hue {
            Some(angle) if mean_saturation >= MUTED_THRESHOLD => hue_band(angle),
            _ => HueCategory::Neutral,
        };

        let saturation_level = saturation_level(mean_saturation);
        let mut parts = vec![tonal_class.label(), hue_category.label()];
        if mean_saturation >= DEGENERATE_SATURATION {
            parts.push(saturation_level.label());
        }

        NameDetails {
            name: parts.join("_"),
            tonal_class,
            hue_category,
            saturation_level,
            mean_hue,
            mean_saturation,
        }
    }

    /// Suffix clashing labels with `_1`, `_2`, ... in input order. Labels that
    /// occur once are left untouched.
    pub fn generate_unique_names(&self, names: &[String]) -> Vec<String> {
        let mut totals: HashMap<&str, usize> = HashMap::new();
        for name in names {
            *totals.entry(name.as_str()).or_default() += 1;
        }

        let mut seen: HashMap<&str, usize> = HashMap::new();
        names
            .iter()
            .map(|name| {
                if totals[name.as_str()] == 1 {
                    return name.clone();
                }
                let counter = seen.entry(name.as_str()).or_default();
                *counter += 1;
                format!("{}_{}", name, counter)
            })
            .collect()
    }
}

fn majority_tonal_class(members: &[&ImageFeatures]) -> TonalClass {
    let count = |class: TonalClass| members.iter().filter(|f| f.tonal_class == class).count();
    let (high, mid, low) = (
        count(TonalClass::HighKey),
        count(TonalClass::MidKey),
        count(TonalClass::LowKey),
    );

    if high > mid && high > low {
        TonalClass::HighKey
    } else if low > mid && low > high {
        TonalClass::LowKey
    } else {
        TonalClass::MidKey
    }
}

/// Circular mean of the summed hue histograms in degrees [0, 360).
///
/// Bin `b` of an `n`-bin histogram covers the full hue circle and sits at
/// `(b + 0.5) * 360 / n` degrees.
fn circular_mean_hue(members: &[&ImageFeatures]) -> Option<f64> {
    let mut vectors: Vec<(f64, f64)> = members
        .iter()
        .map(|features| {
            let bins = features.hue_histogram.len();
            if bins == 0 {
                return (0.0, 0.0);
            }
            features
                .hue_histogram
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(sin, cos), (b, p)| {
                    let angle = ((b as f64 + 0.5) * 360.0 / bins as f64).to_radians();
                    (sin + p * angle.sin(), cos + p * angle.cos())
                })
        })
        .collect();

    vectors.sort_by(|a, b| match a.0.total_cmp(&b.0) {
        Ordering::Equal => a.1.total_cmp(&b.1),
        other => other,
    });
    let (sin, cos) = vectors
        .iter()
        .fold((0.0, 0.0), |(s, c), (vs, vc)| (s + vs, c + vc));

    let resultant = (sin * sin + cos * cos).sqrt() / members.len() as f64;
    if !resultant.is_finite() || resultant < MIN_HUE_RESULTANT {
        return None;
    }

    Some(sin.atan2(cos).to_degrees().rem_euclid(360.0))
}

/// Red through yellow is warm, green-cyan through violet is cool, and the
/// yellow-green and magenta transitions are neutral.
pub fn hue_band(degrees: f64) -> HueCategory {
    let angle = degrees.rem_euclid(360.0);
    if !(72.0..340.0).contains(&angle) {
        HueCategory::Warm
    } else if (156.0..322.0).contains(&angle) {
        HueCategory::Cool
    } else {
        HueCategory::Neutral
    }
}

pub fn saturation_level(mean_saturation: f64) -> SaturationLevel {
    if mean_saturation >= VIVID_THRESHOLD {
        SaturationLevel::Vivid
    } else if mean_saturation >= MODERATE_THRESHOLD {
        SaturationLevel::Moderate
    } else if mean_saturation >= MUTED_THRESHOLD {
        SaturationLevel::Muted
    } else {
        SaturationLevel::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{banded_features, flat_features};

    #[test]
    fn test_red_cluster_is_warm() {
        let a = flat_features("a.png", 0, 136, 255);
        let b = flat_features("b.png", 1, 136, 250);
        let details = CategoryNamer::new().generate_name_with_details(&[&a, &b]);

        assert_eq!(details.hue_category, HueCategory::Warm);
        assert_eq!(details.saturation_level, SaturationLevel::Vivid);
        assert_eq!(details.tonal_class, TonalClass::MidKey);
        assert_eq!(details.name, "mid-key_warm_vivid");
    }

    #[test]
    fn test_blue_cluster_is_cool() {
        let a = flat_features("a.png", 120, 60, 255);
        let name = CategoryNamer::new().generate_name(&[&a]);
        assert_eq!(name, "low-key_cool_vivid");
    }

    #[test]
    fn test_hue_wraps_around_red() {
        // 2 and 358 degrees average to red, not cyan.
        let a = flat_features("a.png", 0, 128, 200);
        let b = flat_features("b.png", 179, 128, 200);
        let details = CategoryNamer::new().generate_name_with_details(&[&a, &b]);

        let hue = details.mean_hue.unwrap();
        assert!(hue < 5.0 || hue > 355.0, "hue was {hue}");
        assert_eq!(details.hue_category, HueCategory::Warm);
    }

    #[test]
    fn test_grey_cluster_drops_saturation_term() {
        let a = flat_features("a.png", 0, 220, 0);
        let b = flat_features("b.png", 0, 230, 2);
        let details = CategoryNamer::new().generate_name_with_details(&[&a, &b]);

        assert_eq!(details.name, "high-key_neutral");
        assert_eq!(details.saturation_level, SaturationLevel::Neutral);
    }

    #[test]
    fn test_opposite_hues_have_no_mean() {
        let a = flat_features("a.png", 30, 128, 200);
        let b = flat_features("b.png", 120, 128, 200);
        let details = CategoryNamer::new().generate_name_with_details(&[&a, &b]);

        assert!(details.mean_hue.is_none());
        assert_eq!(details.hue_category, HueCategory::Neutral);
    }

    #[test]
    fn test_tonal_majority_and_ties() {
        let high = flat_features("h.png", 0, 220, 100);
        let low = flat_features("l.png", 0, 20, 100);
        let namer = CategoryNamer::new();

        let details = namer.generate_name_with_details(&[&high, &high, &low]);
        assert_eq!(details.tonal_class, TonalClass::HighKey);

        let tied = namer.generate_name_with_details(&[&high, &low]);
        assert_eq!(tied.tonal_class, TonalClass::MidKey);
    }

    #[test]
    fn test_saturation_levels() {
        assert_eq!(saturation_level(200.0), SaturationLevel::Vivid);
        assert_eq!(saturation_level(150.0), SaturationLevel::Vivid);
        assert_eq!(saturation_level(100.0), SaturationLevel::Moderate);
        assert_eq!(saturation_level(40.0), SaturationLevel::Muted);
        assert_eq!(saturation_level(10.0), SaturationLevel::Neutral);
    }

    #[test]
    fn test_hue_bands() {
        assert_eq!(hue_band(0.0), HueCategory::Warm);
        assert_eq!(hue_band(45.0), HueCategory::Warm);
        assert_eq!(hue_band(350.0), HueCategory::Warm);
        assert_eq!(hue_band(100.0), HueCategory::Neutral);
        assert_eq!(hue_band(330.0), HueCategory::Neutral);
        assert_eq!(hue_band(200.0), HueCategory::Cool);
        assert_eq!(hue_band(240.0), HueCategory::Cool);
        assert_eq!(hue_band(-120.0), HueCategory::Cool);
    }

    #[test]
    fn test_naming_is_order_independent() {
        let members = vec![
            banded_features("a.png", 10, 90, 120, 6),
            banded_features("b.png", 150, 180, 60, 10),
            banded_features("c.png", 40, 140, 90, 3),
            flat_features("d.png", 100, 30, 20),
        ];
        let namer = CategoryNamer::new();

        let forward: Vec<&ImageFeatures> = members.iter().collect();
        let backward: Vec<&ImageFeatures> = members.iter().rev().collect();
        assert_eq!(
            namer.generate_name_with_details(&forward),
            namer.generate_name_with_details(&backward)
        );
    }

    #[test]
    fn test_empty_cluster() {
        assert_eq!(CategoryNamer::new().generate_name(&[]), UNCATEGORIZED);
    }

    #[test]
    fn test_unique_names() {
        let names: Vec<String> = ["warm", "cool", "warm", "neutral", "warm"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let unique = CategoryNamer::new().generate_unique_names(&names);

        assert_eq!(unique, vec!["warm_1", "cool", "warm_2", "neutral", "warm_3"]);
    }
}
