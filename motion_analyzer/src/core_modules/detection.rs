// THEORY:
// A `Detection` is one frame's raw evidence of a candidate object: a spatially
// connected region of foreground pixels, summarized. Like every per-frame
// container in this crate it is a "dumb" snapshot with no memory; it is built
// by the detector, labelled by the classifier, consumed by the tracker's
// association step and then dropped. Persistence is the tracker's job.

use crate::core_modules::classifier::Role;
use serde::{Deserialize, Serialize};

/// An axis-aligned pixel rectangle, corners inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) as f64 / 2.0,
            (self.min_y + self.max_y) as f64 / 2.0,
        )
    }

    /// Area shared with `other` once both boxes are grown by `margin` pixels.
    pub fn overlap_with_margin(&self, other: &BoundingBox, margin: f64) -> f64 {
        let left = (self.min_x as f64 - margin).max(other.min_x as f64 - margin);
        let top = (self.min_y as f64 - margin).max(other.min_y as f64 - margin);
        let right = (self.max_x as f64 + 1.0 + margin).min(other.max_x as f64 + 1.0 + margin);
        let bottom = (self.max_y as f64 + 1.0 + margin).min(other.max_y as f64 + 1.0 + margin);
        (right - left).max(0.0) * (bottom - top).max(0.0)
    }
}

/// Color summary of a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorSignature {
    /// Mean RGB over the region's pixels, 0..255.
    pub mean_rgb: [f64; 3],
    /// Hue of the mean color in degrees.
    pub hue: f32,
    /// Fraction (0-1) of pixels inside the skin-tone range.
    pub skin_ratio: f64,
}

/// A candidate foreground region found in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Unweighted center of the region's pixels.
    pub centroid: (f64, f64),
    /// Number of foreground pixels in the region.
    pub area: usize,
    pub color: ColorSignature,
    /// Contrast of the region against the background, 0-1.
    pub confidence: f64,
}

/// A detection after role classification. The shape the tracker consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedDetection {
    pub detection: Detection,
    pub role: Role,
    /// Classifier confidence for `role`, 0-1.
    pub confidence: f64,
}

impl ClassifiedDetection {
    pub fn centroid(&self) -> (f64, f64) {
        self.detection.centroid
    }
}
