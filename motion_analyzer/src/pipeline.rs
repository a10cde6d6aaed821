// THEORY:
// The `pipeline` module is the top-level API for the analysis engine. It wraps
// the full stack into an `AnalysisSession`: the explicit context object that
// owns everything one run mutates (background model, classifier, active track
// set and timestamp origin). Nothing is ambient or global, so any number of
// sessions can run side by side in one process.
//
// Per frame, in order:
// 1.  **Validation**: index order, strictly increasing timestamps and
//     dimensions are checked before any state is touched. A bad frame leaves
//     the session exactly as it was.
// 2.  **Detection**: the background model yields foreground regions.
// 3.  **Classification**: each region is labelled, borrowing motion evidence
//     from the tracker's recent history around it.
// 4.  **Tracking**: labelled detections update the track set.
//
// After the last frame, `finish` archives the remaining tracks, segments them
// into events, and synthesizes the action code.

use crate::action_code;
use crate::config::AnalysisConfig;
use crate::core_modules::background::BackgroundModel;
use crate::core_modules::classifier::{Classifier, FrameContext};
use crate::core_modules::detection::ClassifiedDetection;
use crate::core_modules::detector::{Detector, PreparedFrame};
use crate::core_modules::segmenter::{EventSegmenter, SegmenterSettings};
use crate::core_modules::synthesizer::{ActionCodeSynthesizer, SynthesizerSettings};
use crate::core_modules::tracker::{Tracker, TrackerSettings, TrackerUpdate};
use crate::error::{AnalysisError, Diagnostic, InputError};
use crate::export::{AnalysisMetadata, RunStatistics, TrackingExport};
use crate::frame::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::segmenter::{ActivityPeriod, EventKind, MotionEvent, Participant};
pub use crate::core_modules::synthesizer::{ActionCodeNode, Predicate, Repeat};
pub use crate::core_modules::track::{ArchivedTrack, LifecycleState, TrajectoryPoint};

/// Cooperative cancellation, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Archived tracks in id order.
    pub tracks: Vec<ArchivedTrack>,
    /// Events sorted by start, then subject id.
    pub events: Vec<MotionEvent>,
    pub action_code: ActionCodeNode,
    /// `action_code` rendered as text.
    pub text: String,
    pub activity: Vec<ActivityPeriod>,
    pub statistics: RunStatistics,
    pub loop_coverage: f64,
    pub distinct_signatures: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisResult {
    pub fn export(&self) -> TrackingExport {
        TrackingExport::new(&self.tracks, &self.events)
    }

    pub fn metadata(&self, config: &AnalysisConfig) -> AnalysisMetadata {
        AnalysisMetadata {
            config: config.clone(),
            statistics: self.statistics.clone(),
            activity: self.activity.clone(),
            loop_count: self.action_code.loop_count(),
            loop_coverage: self.loop_coverage,
            distinct_signatures: self.distinct_signatures,
            diagnostics: self.diagnostics.clone(),
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Cancelled { .. }))
    }
}

/// What happened to one pushed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Passed over because of `frame_stride`.
    Skipped,
    Processed {
        detections: usize,
        active_tracks: usize,
        update: TrackerUpdate,
    },
}

/// Per-run analysis context.
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    config: AnalysisConfig,
    detector: Detector,
    classifier: Classifier,
    tracker: Tracker,
    background: Option<BackgroundModel>,
    background_frozen: bool,
    origin: Option<f64>,
    last_index: Option<u64>,
    last_timestamp: Option<f64>,
    last_processed: Option<f64>,
    statistics: RunStatistics,
    diagnostics: Vec<Diagnostic>,
}

impl AnalysisSession {
    /// Validates `config` and starts an empty run.
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self {
            detector: Detector::new(&config),
            classifier: Classifier::new(&config),
            tracker: Tracker::new(TrackerSettings::from(&config)),
            config,
            background: None,
            background_frozen: false,
            origin: None,
            last_index: None,
            last_timestamp: None,
            last_processed: None,
            statistics: RunStatistics::default(),
            diagnostics: Vec::new(),
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn frames_received(&self) -> u64 {
        self.statistics.frames_received
    }

    /// The background model, once the first processed frame has seeded it.
    pub fn background(&self) -> Option<&BackgroundModel> {
        self.background.as_ref()
    }

    /// Stops (or resumes) background learning. Applies to the current model
    /// and to one seeded later.
    pub fn freeze_background(&mut self, frozen: bool) {
        self.background_frozen = frozen;
        if let Some(background) = &mut self.background {
            background.set_frozen(frozen);
        }
    }

    pub fn push_frame(&mut self, frame: &Frame) -> Result<FrameOutcome, InputError> {
        self.check(frame)?;
        if self.skips_next() {
            return Ok(self.skip(frame));
        }
        self.push_checked(&PreparedFrame::from_frame(frame))
    }

    /// Same as [`AnalysisSession::push_frame`] for a frame prepared elsewhere.
    pub fn push_prepared(&mut self, prepared: &PreparedFrame) -> Result<FrameOutcome, InputError> {
        self.check(&prepared.frame)?;
        if self.skips_next() {
            return Ok(self.skip(&prepared.frame));
        }
        self.push_checked(prepared)
    }

    /// Records that the run was cancelled before `frame_index`.
    pub fn cancel_at(&mut self, frame_index: u64) {
        info!(frame = frame_index, "analysis cancelled");
        self.diagnostics.push(Diagnostic::Cancelled { frame_index });
    }

    fn check(&self, frame: &Frame) -> Result<(), InputError> {
        if !frame.timestamp.is_finite() {
            return Err(InputError::NonFiniteTimestamp {
                frame_index: frame.index,
                timestamp: frame.timestamp,
            });
        }
        if let Some(previous) = self.last_index {
            if frame.index <= previous {
                return Err(InputError::OutOfOrder {
                    frame_index: frame.index,
                    previous,
                });
            }
        }
        if let Some(previous) = self.last_timestamp {
            if !(frame.timestamp > previous) {
                return Err(InputError::NonMonotonicTimestamp {
                    frame_index: frame.index,
                    timestamp: frame.timestamp,
                    previous,
                });
            }
        }
        if let Some(background) = &self.background {
            background.check_dimensions(frame.index, frame.width, frame.height)?;
        }
        Ok(())
    }

    fn skips_next(&self) -> bool {
        self.statistics.frames_received % self.config.frame_stride as u64 != 0
    }

    fn accept(&mut self, frame: &Frame) {
        self.last_index = Some(frame.index);
        self.last_timestamp = Some(frame.timestamp);
        self.statistics.frames_received += 1;
    }

    fn skip(&mut self, frame: &Frame) -> FrameOutcome {
        self.accept(frame);
        self.statistics.frames_skipped += 1;
        FrameOutcome::Skipped
    }

    fn push_checked(&mut self, prepared: &PreparedFrame) -> Result<FrameOutcome, InputError> {
        let frame = &prepared.frame;
        let frozen = self.background_frozen;
        let background = self.background.get_or_insert_with(|| {
            let mut model = BackgroundModel::new(frame.width, frame.height);
            model.set_frozen(frozen);
            model
        });

        // Stage 1: Detection
        let detections = self.detector.detect_prepared(prepared, background)?;

        self.statistics.frames_processed += 1;
        self.accept(frame);
        let origin = *self.origin.get_or_insert(frame.timestamp);
        let timestamp = frame.timestamp - origin;
        self.last_processed = Some(timestamp);
        self.statistics.detections += detections.len() as u64;

        // Stage 2: Classification
        let classified: Vec<ClassifiedDetection> = detections
            .into_iter()
            .map(|detection| {
                let context = FrameContext {
                    width: frame.width,
                    height: frame.height,
                    motion: self
                        .tracker
                        .recent_motion_near(detection.centroid, self.config.motion_lookup_radius),
                };
                let (role, confidence) = self.classifier.classify(&detection, &context);
                ClassifiedDetection {
                    detection,
                    role,
                    confidence,
                }
            })
            .collect();

        // Stage 3: Tracking
        let update = self
            .tracker
            .update(frame.index, timestamp, frame.diagonal(), &classified);
        for ambiguity in &update.ambiguities {
            debug!(
                frame = frame.index,
                track = ambiguity.track_id,
                detections = ?ambiguity.detection_indices,
                "association tie broken by detection index"
            );
            self.diagnostics.push(Diagnostic::AssociationAmbiguity {
                frame_index: frame.index,
                track_id: ambiguity.track_id,
                detection_indices: ambiguity.detection_indices.clone(),
            });
        }

        debug!(
            frame = frame.index,
            detections = classified.len(),
            active = self.tracker.active_tracks().len(),
            "frame processed"
        );
        Ok(FrameOutcome::Processed {
            detections: classified.len(),
            active_tracks: self.tracker.active_tracks().len(),
            update,
        })
    }

    /// Everything committed so far, as a result, without ending the run.
    pub fn snapshot(&self) -> AnalysisResult {
        self.clone().finish()
    }

    /// Ends the run: archives, segments and synthesizes.
    pub fn finish(self) -> AnalysisResult {
        let mut statistics = self.statistics;
        let mut diagnostics = self.diagnostics;
        statistics.tracks_created = self.tracker.next_id() - 1;
        statistics.tracks_discarded = self.tracker.discarded_count();
        statistics.duration = self.last_processed.unwrap_or(0.0);

        let tracks = self.tracker.finish();
        if statistics.detections == 0 {
            warn!(frames = statistics.frames_processed, "no detections in the whole sequence");
            diagnostics.push(Diagnostic::DegenerateDetection {
                frames_processed: statistics.frames_processed,
            });
        }

        // Stage 4: Event segmentation
        let segmenter = EventSegmenter::new(SegmenterSettings::from(&self.config));
        let events = segmenter.segment(&tracks);
        let activity = segmenter.activity_periods(&events);

        // Stage 5: Action code synthesis
        let synthesis =
            ActionCodeSynthesizer::new(SynthesizerSettings::from(&self.config)).synthesize(&events);
        diagnostics.extend(synthesis.diagnostics);
        let text = action_code::render(&synthesis.root);

        statistics.tally(&tracks, &events);
        info!(
            frames = statistics.frames_processed,
            tracks = tracks.len(),
            events = events.len(),
            loops = synthesis.root.loop_count(),
            "analysis finished"
        );

        AnalysisResult {
            tracks,
            events,
            action_code: synthesis.root,
            text,
            activity,
            statistics,
            loop_coverage: synthesis.coverage,
            distinct_signatures: synthesis.symbol_count,
            diagnostics,
        }
    }
}

/// Runs a whole sequence synchronously.
///
/// Cancellation stops before the next frame and returns what was committed,
/// with a `Cancelled` diagnostic. A malformed frame aborts with
/// `AnalysisError::Aborted`, carrying the result up to the previous frame.
pub fn analyze<I>(
    frames: I,
    config: &AnalysisConfig,
    cancel: &CancelFlag,
) -> Result<AnalysisResult, AnalysisError>
where
    I: IntoIterator<Item = Frame>,
{
    let mut session = AnalysisSession::new(config.clone())?;
    info!(stride = config.frame_stride, "analysis started");
    for frame in frames {
        if cancel.is_cancelled() {
            session.cancel_at(frame.index);
            break;
        }
        if let Err(source) = session.push_frame(&frame) {
            warn!(frame = source.frame_index(), error = %source, "frame rejected, aborting run");
            return Err(AnalysisError::Aborted {
                source,
                partial: Box::new(session.finish()),
            });
        }
    }
    Ok(session.finish())
}
