//! sRGB to HSV / CIELAB conversion.
//!
//! LAB values use the D65 white point for every image so that distances stay
//! comparable across a run.

use image::RgbImage;
use palette::{FromColor, Hsv, Lab, Srgb};

/// Per-pixel HSV and LAB planes of one image, in row-major order.
#[derive(Debug, Clone)]
pub struct ColorBuffers {
    pub width: u32,
    pub height: u32,
    pub hsv: Vec<Hsv>,
    pub lab: Vec<Lab>,
}

impl ColorBuffers {
    pub fn pixel_count(&self) -> usize {
        self.lab.len()
    }

    /// Hue in OpenCV-style half degrees, 0-180.
    pub fn hue_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.hsv
            .iter()
            .map(|p| p.hue.into_positive_degrees() as f64 / 2.0)
    }

    /// Saturation on the 0-255 scale.
    pub fn saturation_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.hsv.iter().map(|p| p.saturation as f64 * 255.0)
    }

    /// LAB lightness rescaled from 0-100 to 0-255.
    pub fn lightness_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.lab.iter().map(|p| p.l as f64 * 255.0 / 100.0)
    }
}

pub struct ColorSpaceConverter;

impl ColorSpaceConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn convert(&self, rgb: &RgbImage) -> ColorBuffers {
        let (width, height) = rgb.dimensions();
        let pixel_count = (width as usize) * (height as usize);
        let mut hsv = Vec::with_capacity(pixel_count);
        let mut lab = Vec::with_capacity(pixel_count);

        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let srgb = Self::unit_srgb(r, g, b);
            hsv.push(Hsv::from_color(srgb));
            lab.push(Lab::from_color(srgb));
        }

        ColorBuffers {
            width,
            height,
            hsv,
            lab,
        }
    }

    pub fn rgb_to_hsv(&self, r: u8, g: u8, b: u8) -> Hsv {
        Hsv::from_color(Self::unit_srgb(r, g, b))
    }

    pub fn rgb_to_lab(&self, r: u8, g: u8, b: u8) -> Lab {
        Lab::from_color(Self::unit_srgb(r, g, b))
    }

    /// Hex string of a LAB color, clamped into the sRGB gamut.
    pub fn lab_to_hex(&self, lab: [f32; 3]) -> String {
        let srgb = Srgb::from_color(Lab::new(lab[0], lab[1], lab[2]));
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!(
            "#{:02X}{:02X}{:02X}",
            channel(srgb.red),
            channel(srgb.green),
            channel(srgb.blue)
        )
    }

    fn unit_srgb(r: u8, g: u8, b: u8) -> Srgb<f32> {
        Srgb::new(r, g, b).into_format::<f32>()
    }
}

impl Default for ColorSpaceConverter {
    fn default() -> Self {
        Self::new()
    }
}
