use motion_analyzer::AnalysisConfig;
use motion_analyzer::core_modules::classifier::Role;
use motion_analyzer::core_modules::detection::{
    BoundingBox, ClassifiedDetection, ColorSignature, Detection,
};
use motion_analyzer::core_modules::track::LifecycleState;
use motion_analyzer::core_modules::tracker::{Tracker, TrackerSettings};
use proptest::prelude::*;
use std::collections::HashSet;

const DIAGONAL: f64 = 1000.0;

fn detection(x: f64, y: f64, role: Role, confidence: f64) -> ClassifiedDetection {
    let (min_x, min_y) = ((x - 5.0).max(0.0) as u32, (y - 5.0).max(0.0) as u32);
    ClassifiedDetection {
        detection: Detection {
            bounding_box: BoundingBox::new(min_x, min_y, min_x + 10, min_y + 10),
            centroid: (x, y),
            area: 121,
            color: ColorSignature {
                mean_rgb: [128.0; 3],
                hue: 0.0,
                skin_ratio: 0.0,
            },
            confidence,
        },
        role,
        confidence,
    }
}

fn tracker(confirm: u32, lost: u32, delete: u32) -> Tracker {
    let config = AnalysisConfig {
        track_confirm_hits: confirm,
        track_lost_misses: lost,
        track_delete_misses: delete,
        ..Default::default()
    };
    Tracker::new(TrackerSettings::from(&config))
}

fn state_of(tracker: &Tracker, id: u64) -> Option<LifecycleState> {
    tracker.active_tracks().iter().find(|t| t.id == id).map(|t| t.state)
}

#[test]
fn lifecycle_thresholds_are_exact() {
    let mut tracker = tracker(3, 2, 4);
    let mut frame = 0u64;
    let mut step = |tracker: &mut Tracker, detections: &[ClassifiedDetection]| {
        let update = tracker.update(frame, frame as f64 * 0.1, DIAGONAL, detections);
        frame += 1;
        update
    };

    let seen = [detection(200.0, 200.0, Role::DeviceUnderTest, 0.9)];
    step(&mut tracker, &seen);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Tentative));
    step(&mut tracker, &seen);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Tentative));
    step(&mut tracker, &seen);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Confirmed));

    step(&mut tracker, &[]);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Confirmed));
    step(&mut tracker, &[]);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Lost));
    step(&mut tracker, &[]);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Lost));
    let update = step(&mut tracker, &[]);
    assert_eq!(update.deleted, vec![1]);
    assert_eq!(state_of(&tracker, 1), None);

    let archived = tracker.archived_tracks();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].total_hits, 3);
    assert_eq!(archived[0].role, Role::DeviceUnderTest);
}

#[test]
fn lost_track_recovers_on_rematch() {
    let mut tracker = tracker(2, 1, 5);
    let seen = [detection(300.0, 300.0, Role::Fixture, 0.8)];
    tracker.update(0, 0.0, DIAGONAL, &seen);
    tracker.update(1, 0.1, DIAGONAL, &seen);
    tracker.update(2, 0.2, DIAGONAL, &[]);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Lost));
    tracker.update(3, 0.3, DIAGONAL, &seen);
    assert_eq!(state_of(&tracker, 1), Some(LifecycleState::Confirmed));
    assert_eq!(tracker.next_id(), 2);
}

#[test]
fn unconfirmed_tracks_are_never_archived() {
    let mut tracker = tracker(3, 1, 5);
    tracker.update(0, 0.0, DIAGONAL, &[detection(100.0, 100.0, Role::Unknown, 0.4)]);
    tracker.update(1, 0.1, DIAGONAL, &[]);
    assert!(tracker.active_tracks().is_empty());
    assert_eq!(tracker.discarded_count(), 1);
    assert!(tracker.finish().is_empty());
}

#[test]
fn equal_cost_tie_goes_to_the_more_confident_detection() {
    let mut tracker = tracker(1, 1, 5);
    tracker.update(0, 0.0, DIAGONAL, &[detection(500.0, 500.0, Role::DeviceUnderTest, 0.8)]);
    // Two candidates mirrored around the stationary track.
    let update = tracker.update(
        1,
        0.1,
        DIAGONAL,
        &[
            detection(490.0, 500.0, Role::DeviceUnderTest, 0.7),
            detection(510.0, 500.0, Role::DeviceUnderTest, 0.9),
        ],
    );
    assert_eq!(update.matched, vec![(1, 1)]);
    assert_eq!(update.spawned, vec![2]);
    assert!(update.ambiguities.is_empty());
}

#[test]
fn full_tie_is_reported_and_binds_the_lowest_index() {
    let mut tracker = tracker(1, 1, 5);
    tracker.update(0, 0.0, DIAGONAL, &[detection(500.0, 500.0, Role::DeviceUnderTest, 0.8)]);
    let update = tracker.update(
        1,
        0.1,
        DIAGONAL,
        &[
            detection(490.0, 500.0, Role::DeviceUnderTest, 0.8),
            detection(510.0, 500.0, Role::DeviceUnderTest, 0.8),
        ],
    );
    assert_eq!(update.matched, vec![(1, 0)]);
    assert_eq!(update.ambiguities.len(), 1);
    assert_eq!(update.ambiguities[0].track_id, 1);
    assert_eq!(update.ambiguities[0].detection_indices, vec![0, 1]);
}

fn frame_strategy() -> impl Strategy<Value = Vec<(f64, f64, f64)>> {
    prop::collection::vec((0.0..1000.0f64, 0.0..1000.0f64, 0.0..1.0f64), 0..5)
}

proptest! {
    #[test]
    fn ids_are_unique_and_increasing(frames in prop::collection::vec(frame_strategy(), 1..40)) {
        let mut tracker = tracker(2, 1, 3);
        let mut issued: Vec<u64> = Vec::new();

        for (index, raw) in frames.iter().enumerate() {
            let detections: Vec<ClassifiedDetection> = raw
                .iter()
                .map(|&(x, y, confidence)| detection(x, y, Role::DeviceUnderTest, confidence))
                .collect();
            let update = tracker.update(index as u64, index as f64 * 0.1, DIAGONAL, &detections);
            issued.extend(&update.spawned);

            let active: HashSet<u64> = tracker.active_tracks().iter().map(|t| t.id).collect();
            prop_assert_eq!(active.len(), tracker.active_tracks().len());
            let columns: HashSet<usize> = update.matched.iter().map(|&(_, c)| c).collect();
            prop_assert_eq!(columns.len(), update.matched.len());
        }

        prop_assert!(issued.windows(2).all(|w| w[0] < w[1]));
        if let Some(&first) = issued.first() {
            prop_assert_eq!(first, 1);
        }
        prop_assert_eq!(tracker.next_id(), issued.len() as u64 + 1);
        let archived = tracker.finish();
        prop_assert!(archived.windows(2).all(|w| w[0].id < w[1].id));
    }
}
