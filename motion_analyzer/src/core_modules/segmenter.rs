// THEORY:
// The `segmenter` turns the continuous record of archived tracks into a
// discrete, historical narrative: a short list of typed motion events.
//
// Algorithm steps, per track:
// 1.  **Speed profile**: every pair of consecutive observations yields a speed
//     in pixels per second over the wall-clock gap between them.
// 2.  **Runs**: consecutive steps at or above `event_motion_threshold` form a
//     run of motion.
// 3.  **Merge, then debounce**: runs separated by less than `event_merge_gap`
//     are coalesced, and only then are runs shorter than `event_min_duration`
//     dropped as jitter.
// 4.  **Typing**: the duration bucket, the subject's role and the role of the
//     track it touches at the start of the run pick the event kind.
// 5.  **Waits**: idle gaps of a hand between two of its events become waits.
//
// The segmenter only reads archived tracks. Any track it is given is final,
// which is what allows it to run per track as soon as that track is retired.

use crate::config::AnalysisConfig;
use crate::core_modules::classifier::Role;
use crate::core_modules::track::ArchivedTrack;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Move,
    Load,
    Press,
    Wait,
    Grab,
    Place,
    Unknown,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::Move,
        EventKind::Load,
        EventKind::Press,
        EventKind::Wait,
        EventKind::Grab,
        EventKind::Place,
        EventKind::Unknown,
    ];

    pub fn verb(&self) -> &'static str {
        match self {
            EventKind::Move => "MOVE",
            EventKind::Load => "LOAD",
            EventKind::Press => "PRESS",
            EventKind::Wait => "WAIT",
            EventKind::Grab => "GRAB",
            EventKind::Place => "PLACE",
            EventKind::Unknown => "UNKNOWN",
        }
    }

    /// Word placed between subject and object in action-code text.
    pub fn preposition(&self) -> &'static str {
        match self {
            EventKind::Move => "TO",
            EventKind::Load => "INTO",
            EventKind::Press => "ON",
            EventKind::Wait => "FOR",
            EventKind::Grab => "AT",
            EventKind::Place => "ONTO",
            EventKind::Unknown => "WITH",
        }
    }

    pub fn from_verb(verb: &str) -> Option<EventKind> {
        EventKind::ALL.into_iter().find(|kind| kind.verb() == verb)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb().to_lowercase())
    }
}

/// A track and the role it was archived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: u64,
    pub role: Role,
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role.slug(), self.id)
    }
}

/// One typed interval of a track's activity. Times are seconds since the
/// start of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub start: f64,
    pub end: f64,
    pub kind: EventKind,
    pub subject: Participant,
    pub object: Option<Participant>,
    pub summary: String,
}

impl MotionEvent {
    pub fn new(
        start: f64,
        end: f64,
        kind: EventKind,
        subject: Participant,
        object: Option<Participant>,
    ) -> Self {
        let summary = match object {
            Some(target) => format!(
                "{} {} {} {} over {:.1}s",
                subject.role,
                kind,
                kind.preposition().to_lowercase(),
                target.role,
                end - start
            ),
            None => format!("{} {} over {:.1}s", subject.role, kind, end - start),
        };
        Self {
            start,
            end,
            kind,
            subject,
            object,
            summary,
        }
    }
}

/// A stretch of time in which events follow each other closely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPeriod {
    pub start: f64,
    pub end: f64,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterSettings {
    pub motion_threshold: f64,
    pub min_duration: f64,
    pub merge_gap: f64,
    pub short_duration: f64,
    pub wait_min_duration: f64,
    pub interaction_margin: f64,
    pub activity_gap: f64,
    pub activity_min_duration: f64,
}

impl From<&AnalysisConfig> for SegmenterSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            motion_threshold: config.event_motion_threshold,
            min_duration: config.event_min_duration,
            merge_gap: config.event_merge_gap,
            short_duration: config.short_event_duration,
            wait_min_duration: config.wait_min_duration,
            interaction_margin: config.interaction_margin,
            activity_gap: config.activity_gap,
            activity_min_duration: config.activity_min_duration,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSegmenter {
    settings: SegmenterSettings,
}

impl EventSegmenter {
    pub fn new(settings: SegmenterSettings) -> Self {
        Self { settings }
    }

    /// Events of every track, sorted by start time and then subject id.
    pub fn segment(&self, tracks: &[ArchivedTrack]) -> Vec<MotionEvent> {
        let mut events: Vec<MotionEvent> = tracks
            .iter()
            .flat_map(|track| self.segment_track(track, tracks))
            .collect();
        events.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.subject.id.cmp(&b.subject.id)));
        events
    }

    /// Events of one finished track. `others` may include `track` itself.
    pub fn segment_track(
        &self,
        track: &ArchivedTrack,
        others: &[ArchivedTrack],
    ) -> Vec<MotionEvent> {
        let subject = Participant {
            id: track.id,
            role: track.role,
        };
        let runs = self.motion_runs(track);

        let mut events = Vec::with_capacity(runs.len());
        let mut previous_end: Option<f64> = None;
        for (start, end) in runs {
            if track.role.is_hand() {
                if let Some(idle_from) = previous_end {
                    if start - idle_from >= self.settings.wait_min_duration {
                        let target = self.interaction_target(track, others, idle_from);
                        let wait = EventKind::Wait;
                        events.push(MotionEvent::new(idle_from, start, wait, subject, target));
                    }
                }
            }
            let target = self.interaction_target(track, others, start);
            let kind = self.event_kind(track.role, target.map(|t| t.role), end - start);
            events.push(MotionEvent::new(start, end, kind, subject, target));
            previous_end = Some(end);
        }
        events
    }

    fn motion_runs(&self, track: &ArchivedTrack) -> Vec<(f64, f64)> {
        // --- Speed profile into raw runs ---
        let mut runs: Vec<(f64, f64)> = Vec::new();
        let mut open: Option<(f64, f64)> = None;
        for pair in track.trajectory.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let dt = b.timestamp - a.timestamp;
            let moving = dt > 0.0
                && (b.x - a.x).hypot(b.y - a.y) / dt >= self.settings.motion_threshold;
            match (moving, open.as_mut()) {
                (true, Some(run)) => run.1 = b.timestamp,
                (true, None) => open = Some((a.timestamp, b.timestamp)),
                (false, Some(_)) => runs.extend(open.take()),
                (false, None) => {}
            }
        }
        runs.extend(open);

        // --- Merge ---
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(runs.len());
        for run in runs {
            match merged.last_mut() {
                Some(last) if run.0 - last.1 < self.settings.merge_gap => last.1 = run.1,
                _ => merged.push(run),
            }
        }

        // --- Debounce ---
        merged.retain(|(start, end)| end - start >= self.settings.min_duration);
        merged
    }

    /// The other track with the largest margin-grown overlap at `at`. Ties go
    /// to the lowest id.
    fn interaction_target(
        &self,
        track: &ArchivedTrack,
        others: &[ArchivedTrack],
        at: f64,
    ) -> Option<Participant> {
        let own_box = track.bounding_box_at(at)?;
        let mut best: Option<(f64, Participant)> = None;
        for other in others {
            if other.id == track.id || !other.is_alive_at(at) {
                continue;
            }
            let Some(other_box) = other.bounding_box_at(at) else { continue };
            let overlap = own_box.overlap_with_margin(&other_box, self.settings.interaction_margin);
            if overlap <= 0.0 {
                continue;
            }
            let candidate = Participant {
                id: other.id,
                role: other.role,
            };
            best = match best {
                Some((area, current))
                    if area > overlap || (area == overlap && current.id < candidate.id) =>
                {
                    Some((area, current))
                }
                _ => Some((overlap, candidate)),
            };
        }
        best.map(|(_, participant)| participant)
    }

    fn event_kind(&self, subject: Role, target: Option<Role>, duration: f64) -> EventKind {
        let short = duration < self.settings.short_duration;
        match subject {
            Role::LeftHand | Role::RightHand => match (short, target) {
                (true, Some(Role::Fixture)) => EventKind::Press,
                (true, _) => EventKind::Grab,
                (false, Some(Role::DeviceUnderTest | Role::Fixture)) => EventKind::Load,
                (false, _) => EventKind::Move,
            },
            Role::DeviceUnderTest if short => EventKind::Place,
            Role::DeviceUnderTest | Role::Conveyor => EventKind::Move,
            Role::Fixture => EventKind::Press,
            Role::Unknown => EventKind::Unknown,
        }
    }

    /// Coalesces events into periods separated by idle gaps of at least
    /// `activity_gap` seconds, keeping periods that last `activity_min_duration`.
    pub fn activity_periods(&self, events: &[MotionEvent]) -> Vec<ActivityPeriod> {
        let mut ordered: Vec<&MotionEvent> = events.iter().collect();
        ordered.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut periods: Vec<ActivityPeriod> = Vec::new();
        for event in ordered {
            match periods.last_mut() {
                Some(period) if event.start - period.end < self.settings.activity_gap => {
                    period.end = period.end.max(event.end);
                    period.event_count += 1;
                }
                _ => periods.push(ActivityPeriod {
                    start: event.start,
                    end: event.end,
                    event_count: 1,
                }),
            }
        }
        periods.retain(|period| period.end - period.start >= self.settings.activity_min_duration);
        periods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::BoundingBox;
    use crate::core_modules::track::{LifecycleState, TrajectoryPoint};

    fn settings() -> SegmenterSettings {
        SegmenterSettings::from(&AnalysisConfig::default())
    }

    /// A track sampled at 10 Hz whose x position is given per sample.
    fn track(id: u64, role: Role, xs: &[f64], y: f64) -> ArchivedTrack {
        let trajectory: Vec<TrajectoryPoint> = xs
            .iter()
            .enumerate()
            .map(|(i, &x)| TrajectoryPoint {
                frame_index: i as u64,
                timestamp: i as f64 * 0.1,
                x,
                y,
                bounding_box: BoundingBox::new(x as u32, y as u32, x as u32 + 20, y as u32 + 20),
            })
            .collect();
        ArchivedTrack {
            id,
            role,
            confidence: 0.9,
            final_state: LifecycleState::Deleted,
            first_seen: 0.0,
            last_seen: (xs.len() - 1) as f64 * 0.1,
            total_hits: xs.len() as u32,
            trajectory,
        }
    }

    fn still(n: usize, x: f64) -> Vec<f64> {
        vec![x; n]
    }

    #[test]
    fn single_frame_jitter_is_debounced() {
        let mut xs = still(10, 100.0);
        xs[5] = 103.0;
        let segmenter = EventSegmenter::new(settings());
        // The excursion out and back is a single 0.2 s run.
        let segmenter_strict = EventSegmenter::new(SegmenterSettings {
            min_duration: 0.25,
            ..settings()
        });
        assert_eq!(segmenter.segment(&[track(1, Role::DeviceUnderTest, &xs, 50.0)]).len(), 1);
        assert!(segmenter_strict.segment(&[track(1, Role::DeviceUnderTest, &xs, 50.0)]).is_empty());
    }

    #[test]
    fn close_runs_merge_into_one_event() {
        // Move for 0.3 s, pause for one 0.1 s step, move again.
        let xs = [0.0, 10.0, 20.0, 30.0, 30.0, 40.0, 50.0, 60.0, 60.0, 60.0];
        let device = track(1, Role::DeviceUnderTest, &xs, 50.0);
        let events = EventSegmenter::new(settings()).segment(&[device]);
        assert_eq!(events.len(), 1);
        assert!((events[0].start - 0.0).abs() < 1e-9);
        assert!((events[0].end - 0.7).abs() < 1e-9);
        assert_eq!(events[0].kind, EventKind::Place);
    }

    #[test]
    fn long_device_motion_is_a_move() {
        let xs: Vec<f64> = (0..20).map(|i| i as f64 * 5.0).collect();
        let device = track(1, Role::DeviceUnderTest, &xs, 50.0);
        let events = EventSegmenter::new(settings()).segment(&[device]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Move);
        assert!(events[0].object.is_none());
    }

    #[test]
    fn hand_touching_fixture_presses_it() {
        let mut hand = still(10, 100.0);
        hand[3] = 110.0;
        hand[4] = 120.0;
        let fixture = track(2, Role::Fixture, &still(10, 105.0), 50.0);
        let hand = track(1, Role::LeftHand, &hand, 50.0);
        let events = EventSegmenter::new(settings()).segment(&[hand, fixture]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Press);
        assert_eq!(events[0].object, Some(Participant { id: 2, role: Role::Fixture }));
    }

    #[test]
    fn long_hand_motion_onto_device_is_a_load() {
        let hand: Vec<f64> = (0..15).map(|i| 100.0 + i as f64 * 3.0).collect();
        let dut = track(5, Role::DeviceUnderTest, &still(15, 110.0), 55.0);
        let hand = track(3, Role::RightHand, &hand, 50.0);
        let events = EventSegmenter::new(settings()).segment(&[hand, dut]);
        assert_eq!(events[0].kind, EventKind::Load);
        assert_eq!(events[0].object.map(|p| p.id), Some(5));
    }

    #[test]
    fn idle_hand_between_events_waits() {
        let mut xs: Vec<f64> = (0..5).map(|i| i as f64 * 10.0).collect();
        xs.extend(still(15, 40.0));
        xs.extend((1..5).map(|i| 40.0 + i as f64 * 10.0));
        let hand = track(1, Role::LeftHand, &xs, 50.0);
        let events = EventSegmenter::new(settings()).segment(&[hand]);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Grab, EventKind::Wait, EventKind::Grab]);
        for pair in events.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn output_is_sorted_by_start_then_subject() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64 * 10.0).collect();
        let events = EventSegmenter::new(settings()).segment(&[
            track(7, Role::Unknown, &xs, 300.0),
            track(2, Role::Unknown, &xs, 10.0),
        ]);
        let subjects: Vec<u64> = events.iter().map(|e| e.subject.id).collect();
        assert_eq!(subjects, vec![2, 7]);
    }

    #[test]
    fn activity_periods_split_on_long_gaps() {
        let subject = Participant { id: 1, role: Role::LeftHand };
        let events = vec![
            MotionEvent::new(0.0, 1.0, EventKind::Grab, subject, None),
            MotionEvent::new(2.0, 3.5, EventKind::Move, subject, None),
            MotionEvent::new(10.0, 10.5, EventKind::Grab, subject, None),
        ];
        let periods = EventSegmenter::new(settings()).activity_periods(&events);
        assert_eq!(
            periods,
            vec![ActivityPeriod {
                start: 0.0,
                end: 3.5,
                event_count: 2
            }]
        );
    }
}
