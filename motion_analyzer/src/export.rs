// THEORY:
// Everything here is a passive, serializable view of a finished run, shaped
// for external reporting tools. Nothing in the analysis reads these types
// back; they are produced once from an `AnalysisResult` and written out.

use crate::config::AnalysisConfig;
use crate::core_modules::classifier::Role;
use crate::core_modules::segmenter::{ActivityPeriod, EventKind, MotionEvent};
use crate::core_modules::track::ArchivedTrack;
use crate::error::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One archived track: identity, role and its path as `(timestamp, x, y)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: u64,
    pub role: Role,
    pub confidence: f64,
    pub trajectory: Vec<(f64, f64, f64)>,
}

impl From<&ArchivedTrack> for TrackRecord {
    fn from(track: &ArchivedTrack) -> Self {
        Self {
            id: track.id,
            role: track.role,
            confidence: track.confidence,
            trajectory: track.trajectory.iter().map(|p| (p.timestamp, p.x, p.y)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub start: f64,
    pub end: f64,
    pub kind: EventKind,
    pub subject_id: u64,
    pub object_id: Option<u64>,
}

impl From<&MotionEvent> for EventRecord {
    fn from(event: &MotionEvent) -> Self {
        Self {
            start: event.start,
            end: event.end,
            kind: event.kind,
            subject_id: event.subject.id,
            object_id: event.object.map(|o| o.id),
        }
    }
}

/// The tracking-data export: a record per archived track and per event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingExport {
    pub tracks: Vec<TrackRecord>,
    pub events: Vec<EventRecord>,
}

impl TrackingExport {
    pub fn new(tracks: &[ArchivedTrack], events: &[MotionEvent]) -> Self {
        Self {
            tracks: tracks.iter().map(TrackRecord::from).collect(),
            events: events.iter().map(EventRecord::from).collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Counters gathered over one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub frames_received: u64,
    pub frames_processed: u64,
    /// Frames passed over because of `frame_stride`.
    pub frames_skipped: u64,
    pub detections: u64,
    /// Ids handed out, confirmed or not.
    pub tracks_created: u64,
    pub tracks_archived: usize,
    /// Tracks that died before confirmation.
    pub tracks_discarded: u64,
    pub tracks_by_role: BTreeMap<Role, usize>,
    pub mean_track_confidence: f64,
    pub events_by_kind: BTreeMap<EventKind, usize>,
    /// Seconds between the first and last processed frame.
    pub duration: f64,
}

impl RunStatistics {
    /// Fills in the per-role and per-kind tallies from the finished output.
    pub fn tally(&mut self, tracks: &[ArchivedTrack], events: &[MotionEvent]) {
        self.tracks_archived = tracks.len();
        self.tracks_by_role.clear();
        for track in tracks {
            *self.tracks_by_role.entry(track.role).or_default() += 1;
        }
        self.mean_track_confidence = if tracks.is_empty() {
            0.0
        } else {
            tracks.iter().map(|t| t.confidence).sum::<f64>() / tracks.len() as f64
        };
        self.events_by_kind.clear();
        for event in events {
            *self.events_by_kind.entry(event.kind).or_default() += 1;
        }
    }
}

/// Run summary written next to the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub config: AnalysisConfig,
    pub statistics: RunStatistics,
    pub activity: Vec<ActivityPeriod>,
    pub loop_count: usize,
    pub loop_coverage: f64,
    pub distinct_signatures: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisMetadata {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
