// THEORY:
// A `Track` is one physical object's existence over time, as opposed to a
// `Detection`, which is a snapshot in a single frame. It owns a Kalman
// estimate of position and velocity, lifecycle counters, a role vote and two
// histories: a short ring buffer of recent centroids for motion queries, and
// the full list of observations that is archived for export and event
// segmentation.
//
// Lifecycle:
// - **Birth**: Tentative with one hit.
// - **Confirmation**: Tentative becomes Confirmed once consecutive hits reach
//   `confirm_hits`. A Tentative track that misses once is deleted outright.
// - **Occlusion**: a Confirmed track that misses `lost_misses` frames in a row
//   is Lost. A match while Lost returns it to Confirmed.
// - **Death**: `delete_misses` consecutive misses make it Deleted, which is
//   terminal. The miss count keeps running through Lost, so a Confirmed track
//   dies exactly at its `delete_misses`-th consecutive miss.

use crate::core_modules::classifier::Role;
use crate::core_modules::detection::{BoundingBox, ClassifiedDetection};
use crate::core_modules::kalman::KalmanFilter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Tentative,
    Confirmed,
    Lost,
    Deleted,
}

/// Thresholds that drive lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub confirm_hits: u32,
    pub lost_misses: u32,
    pub delete_misses: u32,
}

/// Filter tuning shared by every track of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionModel {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initial_velocity_variance: f64,
}

/// One matched observation of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub frame_index: u64,
    /// Seconds since the start of the run.
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub state: LifecycleState,
    /// Consecutive frames with a match.
    pub hits: u32,
    /// Consecutive frames without a match.
    pub misses: u32,
    pub total_hits: u32,
    pub first_seen: f64,
    pub last_seen: f64,
    pub bounding_box: BoundingBox,
    filter: KalmanFilter,
    role_votes: BTreeMap<Role, f64>,
    confidence_sum: f64,
    recent: VecDeque<(f64, f64)>,
    history_capacity: usize,
    trajectory: Vec<TrajectoryPoint>,
    ever_confirmed: bool,
}

impl Track {
    pub fn new(
        id: u64,
        detection: &ClassifiedDetection,
        frame_index: u64,
        timestamp: f64,
        model: &MotionModel,
        policy: &LifecyclePolicy,
        history_capacity: usize,
    ) -> Self {
        let centroid = detection.centroid();
        let mut track = Self {
            id,
            state: LifecycleState::Tentative,
            hits: 0,
            misses: 0,
            total_hits: 0,
            first_seen: timestamp,
            last_seen: timestamp,
            bounding_box: detection.detection.bounding_box,
            filter: KalmanFilter::new(
                centroid,
                model.measurement_noise,
                model.initial_velocity_variance,
                model.process_noise,
            ),
            role_votes: BTreeMap::new(),
            confidence_sum: 0.0,
            recent: VecDeque::with_capacity(history_capacity),
            history_capacity,
            trajectory: Vec::new(),
            ever_confirmed: false,
        };
        track.record(detection, centroid, frame_index, timestamp);
        track.register_hit(policy);
        track
    }

    /// Advances the motion estimate by `dt` seconds.
    pub fn predict(&mut self, dt: f64) {
        self.filter.predict(dt);
    }

    pub fn predicted_position(&self) -> (f64, f64) {
        self.filter.position()
    }

    pub fn velocity(&self) -> (f64, f64) {
        self.filter.velocity()
    }

    /// Corrects the estimate with a matched detection and counts the hit.
    pub fn apply_match(
        &mut self,
        detection: &ClassifiedDetection,
        frame_index: u64,
        timestamp: f64,
        policy: &LifecyclePolicy,
    ) {
        self.filter.update(detection.centroid());
        self.bounding_box = detection.detection.bounding_box;
        self.last_seen = timestamp;
        self.record(detection, detection.centroid(), frame_index, timestamp);
        self.register_hit(policy);
    }

    /// Counts a frame in which the track had no match.
    pub fn apply_miss(&mut self, policy: &LifecyclePolicy) {
        self.hits = 0;
        self.misses = self.misses.saturating_add(1);
        self.state = match self.state {
            LifecycleState::Tentative => LifecycleState::Deleted,
            LifecycleState::Confirmed | LifecycleState::Lost
                if self.misses >= policy.delete_misses =>
            {
                LifecycleState::Deleted
            }
            LifecycleState::Confirmed if self.misses >= policy.lost_misses => LifecycleState::Lost,
            other => other,
        };
    }

    fn register_hit(&mut self, policy: &LifecyclePolicy) {
        self.misses = 0;
        self.hits = self.hits.saturating_add(1);
        self.total_hits += 1;
        self.state = match self.state {
            LifecycleState::Tentative if self.hits >= policy.confirm_hits => {
                LifecycleState::Confirmed
            }
            LifecycleState::Lost => LifecycleState::Confirmed,
            other => other,
        };
        if self.state == LifecycleState::Confirmed {
            self.ever_confirmed = true;
        }
    }

    fn record(
        &mut self,
        detection: &ClassifiedDetection,
        position: (f64, f64),
        frame_index: u64,
        timestamp: f64,
    ) {
        *self.role_votes.entry(detection.role).or_insert(0.0) += detection.confidence;
        self.confidence_sum += detection.confidence;

        if self.recent.len() == self.history_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(position);

        self.trajectory.push(TrajectoryPoint {
            frame_index,
            timestamp,
            x: position.0,
            y: position.1,
            bounding_box: detection.detection.bounding_box,
        });
    }

    /// Role with the largest summed classifier confidence so far.
    pub fn role(&self) -> Role {
        let mut best = (Role::Unknown, f64::NEG_INFINITY);
        for (role, weight) in &self.role_votes {
            if *weight > best.1 {
                best = (*role, *weight);
            }
        }
        best.0
    }

    /// Mean classifier confidence over all matched observations.
    pub fn mean_confidence(&self) -> f64 {
        if self.total_hits == 0 {
            0.0
        } else {
            self.confidence_sum / self.total_hits as f64
        }
    }

    pub fn ever_confirmed(&self) -> bool {
        self.ever_confirmed
    }

    /// The most recent centroids, oldest first, at most `history_capacity`.
    pub fn recent_positions(&self) -> &VecDeque<(f64, f64)> {
        &self.recent
    }

    pub fn trajectory(&self) -> &[TrajectoryPoint] {
        &self.trajectory
    }

    /// Freezes the track into its read-only archived form.
    pub fn archive(self) -> ArchivedTrack {
        let role = self.role();
        let confidence = self.mean_confidence();
        ArchivedTrack {
            id: self.id,
            role,
            confidence,
            final_state: self.state,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            total_hits: self.total_hits,
            trajectory: self.trajectory,
        }
    }
}

/// A finished track, as handed to event segmentation and export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTrack {
    pub id: u64,
    pub role: Role,
    pub confidence: f64,
    /// `Deleted`, or whatever state the track was in when the run ended.
    pub final_state: LifecycleState,
    pub first_seen: f64,
    pub last_seen: f64,
    pub total_hits: u32,
    pub trajectory: Vec<TrajectoryPoint>,
}

impl ArchivedTrack {
    /// Bounding box of the observation closest to `timestamp`.
    pub fn bounding_box_at(&self, timestamp: f64) -> Option<BoundingBox> {
        self.trajectory
            .iter()
            .min_by(|a, b| {
                (a.timestamp - timestamp)
                    .abs()
                    .total_cmp(&(b.timestamp - timestamp).abs())
            })
            .map(|point| point.bounding_box)
    }

    pub fn is_alive_at(&self, timestamp: f64) -> bool {
        self.first_seen <= timestamp && timestamp <= self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::{ColorSignature, Detection};

    const POLICY: LifecyclePolicy = LifecyclePolicy {
        confirm_hits: 3,
        lost_misses: 1,
        delete_misses: 5,
    };
    const MODEL: MotionModel = MotionModel {
        process_noise: 30.0,
        measurement_noise: 4.0,
        initial_velocity_variance: 400.0,
    };

    fn observed(x: f64, role: Role, confidence: f64) -> ClassifiedDetection {
        ClassifiedDetection {
            detection: Detection {
                bounding_box: BoundingBox::new(x as u32, 10, x as u32 + 4, 14),
                centroid: (x, 12.0),
                area: 25,
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

    fn born() -> Track {
        Track::new(1, &observed(10.0, Role::DeviceUnderTest, 0.8), 0, 0.0, &MODEL, &POLICY, 4)
    }

    #[test]
    fn confirms_exactly_at_kth_hit() {
        let mut track = born();
        assert_eq!((track.state, track.hits), (LifecycleState::Tentative, 1));
        track.apply_match(&observed(11.0, Role::DeviceUnderTest, 0.8), 1, 0.1, &POLICY);
        assert_eq!(track.state, LifecycleState::Tentative);
        track.apply_match(&observed(12.0, Role::DeviceUnderTest, 0.8), 2, 0.2, &POLICY);
        assert_eq!(track.state, LifecycleState::Confirmed);
    }

    #[test]
    fn tentative_dies_on_first_miss() {
        let mut track = born();
        track.apply_miss(&POLICY);
        assert_eq!(track.state, LifecycleState::Deleted);
    }

    #[test]
    fn confirmed_track_is_lost_then_deleted_at_mth_miss() {
        let mut track = born();
        for i in 1..3 {
            let seen = observed(10.0 + i as f64, Role::DeviceUnderTest, 0.8);
            track.apply_match(&seen, i, i as f64 * 0.1, &POLICY);
        }
        for miss in 1..=5 {
            track.apply_miss(&POLICY);
            let expected = if miss < 5 {
                LifecycleState::Lost
            } else {
                LifecycleState::Deleted
            };
            assert_eq!(track.state, expected, "after miss {miss}");
        }
    }

    #[test]
    fn lost_track_recovers_on_match() {
        let mut track = born();
        for i in 1..3 {
            let seen = observed(10.0, Role::DeviceUnderTest, 0.8);
            track.apply_match(&seen, i, i as f64 * 0.1, &POLICY);
        }
        track.apply_miss(&POLICY);
        assert_eq!(track.state, LifecycleState::Lost);
        track.apply_match(&observed(10.0, Role::DeviceUnderTest, 0.8), 4, 0.4, &POLICY);
        assert_eq!(track.state, LifecycleState::Confirmed);
        assert_eq!(track.misses, 0);
    }

    #[test]
    fn role_follows_confidence_weighted_vote() {
        let mut track = born();
        track.apply_match(&observed(11.0, Role::LeftHand, 0.3), 1, 0.1, &POLICY);
        track.apply_match(&observed(12.0, Role::LeftHand, 0.3), 2, 0.2, &POLICY);
        assert_eq!(track.role(), Role::DeviceUnderTest);
        track.apply_match(&observed(13.0, Role::LeftHand, 0.3), 3, 0.3, &POLICY);
        assert_eq!(track.role(), Role::LeftHand);
    }

    #[test]
    fn recent_history_is_bounded_but_trajectory_is_not() {
        let mut track = born();
        for i in 1..10u64 {
            let seen = observed(10.0 + i as f64, Role::DeviceUnderTest, 0.8);
            track.apply_match(&seen, i, i as f64 * 0.1, &POLICY);
        }
        assert_eq!(track.recent_positions().len(), 4);
        assert_eq!(track.recent_positions().front(), Some(&(16.0, 12.0)));
        assert_eq!(track.trajectory().len(), 10);
        let archived = track.archive();
        assert_eq!(archived.total_hits, 10);
        assert!((archived.confidence - 0.8).abs() < 1e-12);
    }
}
