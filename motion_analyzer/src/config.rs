use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Tunable parameters for one analysis run.
///
/// Every band and floor here is an empirically tuned default taken from the
/// reference recordings; none of them is expected to generalize without
/// retuning. Missing keys in a serialized config fall back to `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    // --- Detection ---
    /// Minimum normalized (0-1) luminance difference counted as motion.
    pub motion_threshold: f64,
    /// Foreground pixels must also exceed this many standard deviations of the
    /// background's learned noise.
    pub sigma_gain: f64,
    /// Exponential learning rate for background pixels.
    pub background_learning_rate: f64,
    /// Learning rate for pixels currently classified as foreground. Lets a
    /// parked object fade into the background slowly.
    pub foreground_learning_rate: f64,
    pub min_object_area: usize,
    pub max_object_area: usize,
    /// Analyze every Nth frame only.
    pub frame_stride: u32,

    // --- Classification ---
    pub hand_area_min: usize,
    pub hand_area_max: usize,
    /// Fraction (0-1) of a region's pixels that must fall in the skin-tone range.
    pub hand_color_threshold: f64,
    pub conveyor_min_area: usize,
    /// Centroids below `conveyor_y_ratio * height` lie in the conveyor band.
    pub conveyor_y_ratio: f64,
    /// Minimum horizontal displacement (pixels) over the motion window.
    pub conveyor_motion_floor: f64,
    pub fixture_min_area: usize,
    /// Largest per-frame step (pixels) still considered stationary.
    pub fixture_motion_floor: f64,
    pub dut_area_min: usize,
    pub dut_area_max: usize,
    /// Number of recent observations used for motion evidence.
    pub motion_window: usize,
    /// Radius (pixels) in which a detection borrows motion evidence from a track.
    pub motion_lookup_radius: f64,
    pub unknown_confidence_scale: f64,

    // --- Tracking ---
    pub track_confirm_hits: u32,
    pub track_lost_misses: u32,
    pub track_delete_misses: u32,
    /// Maximum association cost (distance over frame diagonal, after penalties).
    pub gating_threshold: f64,
    pub role_mismatch_penalty: f64,
    pub spawn_confidence_floor: f64,
    /// Process noise added to the covariance diagonal per second of prediction.
    pub process_noise: f64,
    /// Centroid measurement variance (pixels^2).
    pub measurement_noise: f64,
    pub initial_velocity_variance: f64,
    pub history_capacity: usize,

    // --- Event segmentation ---
    /// Speed (pixels/second) above which a track counts as moving.
    pub event_motion_threshold: f64,
    pub event_min_duration: f64,
    pub event_merge_gap: f64,
    /// Events shorter than this are typed as short (grab/press-like).
    pub short_event_duration: f64,
    pub wait_min_duration: f64,
    /// Slack (pixels) added around bounding boxes when testing for interaction.
    pub interaction_margin: f64,
    pub activity_gap: f64,
    pub activity_min_duration: f64,

    // --- Action code ---
    pub loop_coverage_threshold: f64,
    pub nested_coverage_threshold: f64,
    /// Symbols that may be missing from a single loop repetition.
    pub max_repetition_edits: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 25.0 / 255.0,
            sigma_gain: 2.5,
            background_learning_rate: 0.05,
            foreground_learning_rate: 0.005,
            min_object_area: 500,
            max_object_area: 50_000,
            frame_stride: 1,

            hand_area_min: 1_000,
            hand_area_max: 20_000,
            hand_color_threshold: 0.6,
            conveyor_min_area: 5_000,
            conveyor_y_ratio: 0.7,
            conveyor_motion_floor: 20.0,
            fixture_min_area: 10_000,
            fixture_motion_floor: 5.0,
            dut_area_min: 1_000,
            dut_area_max: 10_000,
            motion_window: 5,
            motion_lookup_radius: 100.0,
            unknown_confidence_scale: 0.5,

            track_confirm_hits: 3,
            track_lost_misses: 1,
            track_delete_misses: 5,
            gating_threshold: 0.15,
            role_mismatch_penalty: 4.0,
            spawn_confidence_floor: 0.05,
            process_noise: 30.0,
            measurement_noise: 4.0,
            initial_velocity_variance: 400.0,
            history_capacity: 30,

            event_motion_threshold: 15.0,
            event_min_duration: 0.2,
            event_merge_gap: 0.3,
            short_event_duration: 1.0,
            wait_min_duration: 1.0,
            interaction_margin: 10.0,
            activity_gap: 5.0,
            activity_min_duration: 2.0,

            loop_coverage_threshold: 0.8,
            nested_coverage_threshold: 0.5,
            max_repetition_edits: 1,
        }
    }
}

impl AnalysisConfig {
    /// Rejects parameter combinations no frame could be analyzed under.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        fn unit(name: &str, value: f64) -> Result<(), AnalysisError> {
            if !(0.0..=1.0).contains(&value) {
                return Err(AnalysisError::config(format!(
                    "{name} must be within 0..=1, got {value}"
                )));
            }
            Ok(())
        }
        fn non_negative(name: &str, value: f64) -> Result<(), AnalysisError> {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::config(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
            Ok(())
        }
        fn band(name: &str, min: usize, max: usize) -> Result<(), AnalysisError> {
            if min >= max {
                return Err(AnalysisError::config(format!(
                    "{name}: minimum {min} must be below maximum {max}"
                )));
            }
            Ok(())
        }

        unit("motion_threshold", self.motion_threshold)?;
        unit("background_learning_rate", self.background_learning_rate)?;
        unit("foreground_learning_rate", self.foreground_learning_rate)?;
        unit("hand_color_threshold", self.hand_color_threshold)?;
        unit("conveyor_y_ratio", self.conveyor_y_ratio)?;
        unit("unknown_confidence_scale", self.unknown_confidence_scale)?;
        unit("spawn_confidence_floor", self.spawn_confidence_floor)?;
        unit("loop_coverage_threshold", self.loop_coverage_threshold)?;
        unit("nested_coverage_threshold", self.nested_coverage_threshold)?;

        band("object area", self.min_object_area, self.max_object_area)?;
        band("hand area", self.hand_area_min, self.hand_area_max)?;
        band("device area", self.dut_area_min, self.dut_area_max)?;

        for (name, value) in [
            ("sigma_gain", self.sigma_gain),
            ("conveyor_motion_floor", self.conveyor_motion_floor),
            ("fixture_motion_floor", self.fixture_motion_floor),
            ("motion_lookup_radius", self.motion_lookup_radius),
            ("gating_threshold", self.gating_threshold),
            ("process_noise", self.process_noise),
            ("initial_velocity_variance", self.initial_velocity_variance),
            ("event_motion_threshold", self.event_motion_threshold),
            ("event_min_duration", self.event_min_duration),
            ("event_merge_gap", self.event_merge_gap),
            ("short_event_duration", self.short_event_duration),
            ("wait_min_duration", self.wait_min_duration),
            ("interaction_margin", self.interaction_margin),
            ("activity_gap", self.activity_gap),
            ("activity_min_duration", self.activity_min_duration),
        ] {
            non_negative(name, value)?;
        }

        if !(self.measurement_noise.is_finite() && self.measurement_noise > 0.0) {
            return Err(AnalysisError::config(
                "measurement_noise must be strictly positive",
            ));
        }
        if self.role_mismatch_penalty < 1.0 {
            return Err(AnalysisError::config(
                "role_mismatch_penalty must be at least 1.0",
            ));
        }
        if self.frame_stride == 0 {
            return Err(AnalysisError::config("frame_stride must be at least 1"));
        }
        if self.motion_window < 2 {
            return Err(AnalysisError::config("motion_window must be at least 2"));
        }
        if self.history_capacity < self.motion_window {
            return Err(AnalysisError::config(
                "history_capacity must hold at least one motion window",
            ));
        }
        if self.track_confirm_hits == 0 {
            return Err(AnalysisError::config("track_confirm_hits must be at least 1"));
        }
        if self.track_lost_misses == 0 || self.track_lost_misses > self.track_delete_misses {
            return Err(AnalysisError::config(format!(
                "need 1 <= track_lost_misses ({}) <= track_delete_misses ({})",
                self.track_lost_misses, self.track_delete_misses
            )));
        }
        Ok(())
    }
}
