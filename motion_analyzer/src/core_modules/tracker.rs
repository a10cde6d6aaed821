// THEORY:
// The `tracker` module adds object permanence. It takes the stateless list of
// classified detections from a single frame and associates them with the
// tracks it carried over from previous frames.
//
// Key architectural principles:
// 1.  **Prediction before association**: every active track is advanced by the
//     wall-clock gap since the previous frame before any distance is measured,
//     so fast objects are matched where they are going to be, not where they
//     were.
// 2.  **Global assignment**: costs for all (track, detection) pairs are solved
//     together as a minimum-cost matching rather than nearest-first, so one
//     greedy choice cannot starve another track. A role disagreement
//     multiplies the cost instead of forbidding the pair, which tolerates
//     classifier flicker.
// 3.  **Lifecycle ownership**: births, hits, misses and deaths all happen here.
//     Deleted tracks leave the active set immediately; those that were ever
//     confirmed are archived read-only, the rest were noise and are dropped.
// 4.  **Monotonic identity**: ids start at 1 and only ever increase. An id is
//     never handed out twice within a run.

use crate::config::AnalysisConfig;
use crate::core_modules::assignment::assign;
use crate::core_modules::classifier::{MotionEvidence, Role};
use crate::core_modules::detection::ClassifiedDetection;
use crate::core_modules::track::{
    ArchivedTrack, LifecyclePolicy, LifecycleState, MotionModel, Track,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub policy: LifecyclePolicy,
    pub model: MotionModel,
    pub gating_threshold: f64,
    pub role_mismatch_penalty: f64,
    pub spawn_confidence_floor: f64,
    pub history_capacity: usize,
    pub motion_window: usize,
}

impl From<&AnalysisConfig> for TrackerSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            policy: LifecyclePolicy {
                confirm_hits: config.track_confirm_hits,
                lost_misses: config.track_lost_misses,
                delete_misses: config.track_delete_misses,
            },
            model: MotionModel {
                process_noise: config.process_noise,
                measurement_noise: config.measurement_noise,
                initial_velocity_variance: config.initial_velocity_variance,
            },
            gating_threshold: config.gating_threshold,
            role_mismatch_penalty: config.role_mismatch_penalty,
            spawn_confidence_floor: config.spawn_confidence_floor,
            history_capacity: config.history_capacity,
            motion_window: config.motion_window,
        }
    }
}

/// A track whose match was decided by detection index alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousMatch {
    pub track_id: u64,
    pub detection_indices: Vec<usize>,
}

/// What one call to [`Tracker::update`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerUpdate {
    /// `(track id, detection index)` pairs.
    pub matched: Vec<(u64, usize)>,
    pub spawned: Vec<u64>,
    pub deleted: Vec<u64>,
    pub ambiguities: Vec<AmbiguousMatch>,
}

#[derive(Debug, Clone)]
pub struct Tracker {
    settings: TrackerSettings,
    active: Vec<Track>,
    archived: Vec<ArchivedTrack>,
    next_id: u64,
    last_timestamp: Option<f64>,
    discarded: u64,
}

impl Tracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            active: Vec::new(),
            archived: Vec::new(),
            next_id: 1,
            last_timestamp: None,
            discarded: 0,
        }
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Live tracks in id order.
    pub fn active_tracks(&self) -> &[Track] {
        &self.active
    }

    pub fn archived_tracks(&self) -> &[ArchivedTrack] {
        &self.archived
    }

    /// Number of tracks that died before ever being confirmed.
    pub fn discarded_count(&self) -> u64 {
        self.discarded
    }

    /// The next id that will be assigned.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Processes one frame's classified detections.
    ///
    /// `timestamp` must exceed the previous call's; `diagonal` is the frame
    /// diagonal in pixels and normalizes association distances.
    pub fn update(
        &mut self,
        frame_index: u64,
        timestamp: f64,
        diagonal: f64,
        detections: &[ClassifiedDetection],
    ) -> TrackerUpdate {
        let dt = self.last_timestamp.map_or(0.0, |last| timestamp - last);
        self.last_timestamp = Some(timestamp);
        let mut update = TrackerUpdate::default();

        // --- 1. Prediction ---
        for track in &mut self.active {
            track.predict(dt);
        }

        // --- 2. Matching ---
        let costs: Vec<Vec<f64>> = self
            .active
            .iter()
            .map(|track| {
                let predicted = track.predicted_position();
                let role = track.role();
                detections
                    .iter()
                    .map(|detection| self.association_cost(predicted, role, detection, diagonal))
                    .collect()
            })
            .collect();
        let confidences: Vec<f64> = detections.iter().map(|d| d.confidence).collect();
        let assignment = assign(&costs, &confidences, self.settings.gating_threshold);

        for (row, indices) in assignment.ambiguities {
            update.ambiguities.push(AmbiguousMatch {
                track_id: self.active[row].id,
                detection_indices: indices,
            });
        }

        // --- 3. State updating ---
        let policy = self.settings.policy;
        for &(row, column) in &assignment.pairs {
            let track = &mut self.active[row];
            track.apply_match(&detections[column], frame_index, timestamp, &policy);
            update.matched.push((track.id, column));
        }
        for &row in &assignment.unmatched_rows {
            self.active[row].apply_miss(&policy);
        }

        // --- 4. Births ---
        for &column in &assignment.unmatched_columns {
            let detection = &detections[column];
            if detection.confidence < self.settings.spawn_confidence_floor {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.active.push(Track::new(
                id,
                detection,
                frame_index,
                timestamp,
                &self.settings.model,
                &policy,
                self.settings.history_capacity,
            ));
            update.spawned.push(id);
            debug!(frame = frame_index, track = id, role = %detection.role, "track spawned");
        }

        // --- 5. Deaths ---
        let (dead, alive): (Vec<Track>, Vec<Track>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|track| track.state == LifecycleState::Deleted);
        self.active = alive;
        for track in dead {
            update.deleted.push(track.id);
            debug!(
                frame = frame_index,
                track = track.id,
                confirmed = track.ever_confirmed(),
                "track deleted"
            );
            self.retire(track);
        }

        update
    }

    fn association_cost(
        &self,
        predicted: (f64, f64),
        track_role: Role,
        detection: &ClassifiedDetection,
        diagonal: f64,
    ) -> f64 {
        let (x, y) = detection.centroid();
        let distance = (x - predicted.0).hypot(y - predicted.1);
        let normalized = if diagonal > 0.0 { distance / diagonal } else { distance };
        if detection.role == track_role {
            normalized
        } else {
            normalized * self.settings.role_mismatch_penalty
        }
    }

    fn retire(&mut self, track: Track) {
        if track.ever_confirmed() {
            self.archived.push(track.archive());
        } else {
            self.discarded += 1;
        }
    }

    /// Motion of the active track nearest to `point` within `radius` pixels,
    /// over its last `motion_window` observations.
    pub fn recent_motion_near(&self, point: (f64, f64), radius: f64) -> Option<MotionEvidence> {
        let nearest = self
            .active
            .iter()
            .map(|track| {
                let (x, y) = track.predicted_position();
                (track, (x - point.0).hypot(y - point.1))
            })
            .filter(|(_, distance)| *distance <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1))?
            .0;

        let recent = nearest.recent_positions();
        let window = self.settings.motion_window.min(recent.len());
        let samples: Vec<&(f64, f64)> = recent.iter().skip(recent.len() - window).collect();
        let (first, last) = (samples.first()?, samples.last()?);
        let max_step = samples
            .windows(2)
            .map(|pair| (pair[1].0 - pair[0].0).hypot(pair[1].1 - pair[0].1))
            .fold(0.0, f64::max);

        Some(MotionEvidence {
            horizontal_displacement: (last.0 - first.0).abs(),
            max_step,
            samples: samples.len(),
        })
    }

    /// Ends the run: every remaining track is archived as-is, and the full
    /// archive is returned in id order.
    pub fn finish(mut self) -> Vec<ArchivedTrack> {
        for track in std::mem::take(&mut self.active) {
            self.retire(track);
        }
        self.archived.sort_by_key(|track| track.id);
        self.archived
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::{BoundingBox, ColorSignature, Detection};

    fn detection(x: f64, y: f64, role: Role, confidence: f64) -> ClassifiedDetection {
        ClassifiedDetection {
            detection: Detection {
                bounding_box: BoundingBox::new(x as u32, y as u32, x as u32 + 10, y as u32 + 10),
                centroid: (x, y),
                area: 100,
                color: ColorSignature {
                    mean_rgb: [0.0; 3],
                    hue: 0.0,
                    skin_ratio: 0.0,
                },
                confidence,
            },
            role,
            confidence,
        }
    }

    fn tracker() -> Tracker {
        Tracker::new(TrackerSettings::from(&AnalysisConfig::default()))
    }

    const DIAGONAL: f64 = 1000.0;

    #[test]
    fn ids_start_at_one_and_follow_a_moving_object() {
        let mut tracker = tracker();
        for frame in 0..5u64 {
            let x = 100.0 + frame as f64 * 5.0;
            let seen = [detection(x, 50.0, Role::DeviceUnderTest, 0.9)];
            tracker.update(frame, frame as f64 * 0.1, DIAGONAL, &seen);
        }
        assert_eq!(tracker.active_tracks().len(), 1);
        let track = &tracker.active_tracks()[0];
        assert_eq!(track.id, 1);
        assert_eq!(track.state, LifecycleState::Confirmed);
        assert_eq!(track.total_hits, 5);
    }

    #[test]
    fn far_detection_spawns_a_new_track() {
        let mut tracker = tracker();
        tracker.update(0, 0.0, DIAGONAL, &[detection(100.0, 100.0, Role::Unknown, 0.5)]);
        let far = [detection(900.0, 100.0, Role::Unknown, 0.5)];
        let update = tracker.update(1, 0.1, DIAGONAL, &far);
        assert_eq!(update.spawned, vec![2]);
        // The first track was only tentative, so its miss deletes it.
        assert_eq!(update.deleted, vec![1]);
        assert_eq!(tracker.discarded_count(), 1);
    }

    #[test]
    fn low_confidence_detections_do_not_spawn() {
        let mut tracker = tracker();
        let faint = [detection(10.0, 10.0, Role::Unknown, 0.01)];
        let update = tracker.update(0, 0.0, DIAGONAL, &faint);
        assert!(update.spawned.is_empty());
        assert_eq!(tracker.next_id(), 1);
    }

    #[test]
    fn role_mismatch_is_penalized_not_forbidden() {
        let mut tracker = tracker();
        for frame in 0..3u64 {
            let hand = [detection(100.0, 100.0, Role::LeftHand, 0.9)];
            tracker.update(frame, frame as f64 * 0.1, DIAGONAL, &hand);
        }
        let device = [detection(102.0, 100.0, Role::DeviceUnderTest, 0.9)];
        let update = tracker.update(3, 0.3, DIAGONAL, &device);
        assert_eq!(update.matched, vec![(1, 0)]);
    }

    #[test]
    fn empty_frames_age_tracks_into_the_archive() {
        let mut tracker = tracker();
        for frame in 0..3u64 {
            let fixture = [detection(100.0, 100.0, Role::Fixture, 0.9)];
            tracker.update(frame, frame as f64 * 0.1, DIAGONAL, &fixture);
        }
        for frame in 3..8u64 {
            tracker.update(frame, frame as f64 * 0.1, DIAGONAL, &[]);
        }
        assert!(tracker.active_tracks().is_empty());
        assert_eq!(tracker.archived_tracks().len(), 1);
        assert_eq!(tracker.archived_tracks()[0].final_state, LifecycleState::Deleted);
    }

    #[test]
    fn equal_cost_tie_binds_the_more_confident_detection() {
        let mut tracker = tracker();
        for frame in 0..3u64 {
            let device = [detection(100.0, 100.0, Role::DeviceUnderTest, 0.8)];
            tracker.update(frame, frame as f64 * 0.1, DIAGONAL, &device);
        }
        let update = tracker.update(
            3,
            0.3,
            DIAGONAL,
            &[
                detection(90.0, 100.0, Role::DeviceUnderTest, 0.7),
                detection(110.0, 100.0, Role::DeviceUnderTest, 0.9),
            ],
        );
        assert_eq!(update.matched, vec![(1, 1)]);
    }

    #[test]
    fn motion_query_reports_horizontal_travel() {
        let mut tracker = tracker();
        for frame in 0..6u64 {
            let x = 100.0 + frame as f64 * 10.0;
            let belt = [detection(x, 300.0, Role::Conveyor, 0.9)];
            tracker.update(frame, frame as f64 * 0.1, DIAGONAL, &belt);
        }
        let evidence = tracker.recent_motion_near((150.0, 300.0), 100.0).unwrap();
        assert_eq!(evidence.samples, 5);
        assert!((evidence.horizontal_displacement - 40.0).abs() < 1e-9);
        assert!((evidence.max_step - 10.0).abs() < 1e-9);
        assert!(tracker.recent_motion_near((900.0, 900.0), 100.0).is_none());
    }
}
