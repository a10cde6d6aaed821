// THEORY:
// The `BackgroundModel` is the temporal memory of the detector. Every pixel
// location keeps a running Gaussian estimate of its own luminance: an
// exponentially weighted mean and variance. A new frame is compared against
// that estimate and a pixel is "foreground" when it departs from its learned
// normal by more than an adaptive threshold.
//
// Key principles:
// 1.  **Per-location statistics**: each pixel learns its own noise floor, so a
//     flickering monitor in one corner does not desensitize the whole frame.
// 2.  **Adaptive threshold**: a difference must clear both a global floor
//     (`motion_threshold`) and `sigma_gain` standard deviations of the local
//     noise.
// 3.  **Selective learning**: background pixels learn quickly, foreground
//     pixels slowly, so a moving object does not burn into the model while a
//     parked one eventually fades in.
// 4.  **Explicit ownership**: the model belongs to one analysis run. Its
//     dimensions are fixed at seeding time and any frame that disagrees is
//     rejected without touching the state.

use crate::error::InputError;

/// Per-pixel comparison of one frame against the model.
#[derive(Debug, Clone)]
pub struct ForegroundMask {
    pub width: u32,
    pub height: u32,
    /// Absolute luminance difference to the learned mean, 0..255.
    pub delta: Vec<f32>,
    /// Whether each pixel cleared the adaptive threshold.
    pub foreground: Vec<bool>,
    /// The global floor applied to this frame, 0..255.
    pub floor: f32,
}

#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    seeded: bool,
    frozen: bool,
    frames_observed: u64,
}

impl BackgroundModel {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            mean: vec![0.0; len],
            variance: vec![0.0; len],
            seeded: false,
            frozen: false,
            frames_observed: 0,
        }
    }

    /// Drops all learned statistics and adopts new dimensions.
    pub fn reset(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// A frozen model still classifies frames but stops learning.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn frames_observed(&self) -> u64 {
        self.frames_observed
    }

    pub fn check_dimensions(
        &self,
        frame_index: u64,
        width: u32,
        height: u32,
    ) -> Result<(), InputError> {
        if (width, height) != (self.width, self.height) {
            return Err(InputError::DimensionMismatch {
                frame_index,
                width,
                height,
                expected_width: self.width,
                expected_height: self.height,
            });
        }
        Ok(())
    }

    /// Initializes the mean from a first luminance plane. Variance starts at
    /// zero, so early frames are judged by the global floor alone.
    pub fn seed(&mut self, luma: &[f32]) {
        self.mean.copy_from_slice(luma);
        self.variance.iter_mut().for_each(|v| *v = 0.0);
        self.seeded = true;
        self.frames_observed = 1;
    }

    /// Compares a luminance plane against the learned statistics.
    pub fn compare(&self, luma: &[f32], motion_threshold: f64, sigma_gain: f64) -> ForegroundMask {
        let floor = (motion_threshold * 255.0) as f32;
        let sigma_gain = sigma_gain as f32;
        let mut delta = Vec::with_capacity(luma.len());
        let mut foreground = Vec::with_capacity(luma.len());

        for ((value, mean), variance) in luma.iter().zip(&self.mean).zip(&self.variance) {
            let difference = (value - mean).abs();
            let threshold = floor.max(sigma_gain * variance.sqrt());
            delta.push(difference);
            foreground.push(difference > threshold);
        }

        ForegroundMask {
            width: self.width,
            height: self.height,
            delta,
            foreground,
            floor,
        }
    }

    /// Advances the running statistics by one frame unless frozen.
    pub fn learn(
        &mut self,
        luma: &[f32],
        mask: &ForegroundMask,
        background_rate: f64,
        foreground_rate: f64,
    ) {
        if self.frozen {
            return;
        }
        let background_rate = background_rate as f32;
        let foreground_rate = foreground_rate as f32;

        for (i, value) in luma.iter().enumerate() {
            let rate = if mask.foreground[i] {
                foreground_rate
            } else {
                background_rate
            };
            let difference = value - self.mean[i];
            self.mean[i] += rate * difference;
            self.variance[i] = (1.0 - rate) * (self.variance[i] + rate * difference * difference);
        }
        self.frames_observed += 1;
    }
}
