// THEORY:
// The `Detector` is the spatial grouping layer. It turns the per-pixel verdicts
// of the `BackgroundModel` into a short list of coherent candidate objects.
//
// Algorithm steps:
// 1.  **Preparation**: the RGBA frame is reduced to a luminance plane and a
//     skin-tone plane. This step is stateless and is what the parallel
//     pipeline fans out across workers.
// 2.  **Comparison**: the luminance plane is compared with the background
//     model, yielding an adaptive-threshold foreground mask.
// 3.  **Region growing**: connected foreground pixels (4-neighbourhood) are
//     collected with an explicit stack, never recursion.
// 4.  **Filtering**: regions smaller than `min_object_area` (sensor noise) or
//     larger than `max_object_area` (global lighting shifts) are dropped.
// 5.  **Aggregation**: each survivor is summarized as a `Detection`.
// 6.  **Learning**: the model advances by one frame, after the comparison so
//     that the current frame is judged against the past only.

use crate::config::AnalysisConfig;
use crate::core_modules::background::{BackgroundModel, ForegroundMask};
use crate::core_modules::detection::{BoundingBox, ColorSignature, Detection};
use crate::core_modules::pixel::Pixel;
use crate::error::InputError;
use crate::frame::Frame;
use tracing::debug;

/// Per-frame planes derived from the raw pixels. Independent of any run state.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub frame: Frame,
    pub luma: Vec<f32>,
    pub skin: Vec<bool>,
}

impl PreparedFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        let mut luma = Vec::with_capacity(frame.pixel_count());
        let mut skin = Vec::with_capacity(frame.pixel_count());
        for bytes in frame.pixels().chunks_exact(4) {
            let pixel = Pixel::from(bytes);
            luma.push(pixel.luminance() as f32);
            skin.push(pixel.is_skin());
        }
        Self {
            frame: frame.clone(),
            luma,
            skin,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Detector {
    motion_threshold: f64,
    sigma_gain: f64,
    background_learning_rate: f64,
    foreground_learning_rate: f64,
    min_object_area: usize,
    max_object_area: usize,
}

impl Detector {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            motion_threshold: config.motion_threshold,
            sigma_gain: config.sigma_gain,
            background_learning_rate: config.background_learning_rate,
            foreground_learning_rate: config.foreground_learning_rate,
            min_object_area: config.min_object_area,
            max_object_area: config.max_object_area,
        }
    }

    /// Finds candidate regions in `frame` and advances the background model.
    pub fn detect(
        &self,
        frame: &Frame,
        background: &mut BackgroundModel,
    ) -> Result<Vec<Detection>, InputError> {
        self.detect_prepared(&PreparedFrame::from_frame(frame), background)
    }

    /// Same as [`Detector::detect`] for a frame whose planes were computed elsewhere.
    ///
    /// The first frame a model sees only seeds it and yields nothing.
    pub fn detect_prepared(
        &self,
        prepared: &PreparedFrame,
        background: &mut BackgroundModel,
    ) -> Result<Vec<Detection>, InputError> {
        let frame = &prepared.frame;
        background.check_dimensions(frame.index, frame.width, frame.height)?;

        if !background.is_seeded() {
            background.seed(&prepared.luma);
            debug!(frame = frame.index, "background model seeded");
            return Ok(Vec::new());
        }

        let mask = background.compare(&prepared.luma, self.motion_threshold, self.sigma_gain);
        let detections = self.extract_regions(prepared, &mask);
        background.learn(
            &prepared.luma,
            &mask,
            self.background_learning_rate,
            self.foreground_learning_rate,
        );

        debug!(
            frame = frame.index,
            detections = detections.len(),
            "foreground regions extracted"
        );
        Ok(detections)
    }

    fn extract_regions(&self, prepared: &PreparedFrame, mask: &ForegroundMask) -> Vec<Detection> {
        let width = mask.width as usize;
        let height = mask.height as usize;
        let mut visited = vec![false; width * height];
        let mut detections = Vec::new();

        for start in 0..width * height {
            if visited[start] || !mask.foreground[start] {
                continue;
            }

            // --- Region growing ---
            let mut region: Vec<usize> = Vec::new();
            let mut stack = vec![start];
            visited[start] = true;
            while let Some(current) = stack.pop() {
                region.push(current);
                let x = current % width;
                let y = current / width;

                let mut visit = |neighbor: usize| {
                    if !visited[neighbor] && mask.foreground[neighbor] {
                        visited[neighbor] = true;
                        stack.push(neighbor);
                    }
                };
                if x > 0 {
                    visit(current - 1);
                }
                if x + 1 < width {
                    visit(current + 1);
                }
                if y > 0 {
                    visit(current - width);
                }
                if y + 1 < height {
                    visit(current + width);
                }
            }

            // --- Filtering ---
            if region.len() < self.min_object_area || region.len() > self.max_object_area {
                continue;
            }

            detections.push(Self::summarize(prepared, mask, &region));
        }

        detections
    }

    fn summarize(prepared: &PreparedFrame, mask: &ForegroundMask, region: &[usize]) -> Detection {
        let width = mask.width as usize;
        let frame = &prepared.frame;

        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_delta = 0.0;
        let mut sum_rgb = [0.0f64; 3];
        let mut skin_pixels = 0usize;

        for &index in region {
            let x = (index % width) as u32;
            let y = (index / width) as u32;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            sum_x += x as f64;
            sum_y += y as f64;
            sum_delta += mask.delta[index] as f64;

            let [r, g, b, _] = frame.rgba(x, y);
            sum_rgb[0] += r as f64;
            sum_rgb[1] += g as f64;
            sum_rgb[2] += b as f64;
            if prepared.skin[index] {
                skin_pixels += 1;
            }
        }

        let count = region.len() as f64;
        let mean_rgb = sum_rgb.map(|channel| channel / count);
        let mean_pixel = Pixel::new(
            mean_rgb[0].round() as u8,
            mean_rgb[1].round() as u8,
            mean_rgb[2].round() as u8,
            255,
        );

        let mean_delta = sum_delta / count;
        let confidence = if mask.floor > 0.0 {
            (mean_delta / (3.0 * mask.floor as f64)).clamp(0.0, 1.0)
        } else {
            1.0
        };

        Detection {
            bounding_box: BoundingBox::new(min_x, min_y, max_x, max_y),
            centroid: (sum_x / count, sum_y / count),
            area: region.len(),
            color: ColorSignature {
                mean_rgb,
                hue: mean_pixel.hue(),
                skin_ratio: skin_pixels as f64 / count,
            },
            confidence,
        }
    }
}
