// THEORY:
// Two families of failure exist in an analysis run. Faults in the frame stream
// itself (`InputError`) and configuration that cannot be honoured are fatal and
// travel through `AnalysisError`. Everything the pipeline can recover from on
// its own is not an error at all: it is recorded as a `Diagnostic` and handed
// back next to the primary result, so callers can report it without having to
// unwind anything.

use crate::pipeline::AnalysisResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed frame stream. Raised before any state is mutated for the
/// offending frame, so the session that saw it stays consistent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error(
        "frame {frame_index} is {width}x{height} but the background model is \
         {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        frame_index: u64,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("frame {frame_index} has a non-finite timestamp ({timestamp})")]
    NonFiniteTimestamp { frame_index: u64, timestamp: f64 },
    #[error("frame {frame_index} timestamp {timestamp:.3}s does not advance past {previous:.3}s")]
    NonMonotonicTimestamp {
        frame_index: u64,
        timestamp: f64,
        previous: f64,
    },
    #[error("frame {frame_index} holds {actual} bytes, expected {expected} for RGBA8")]
    BufferSize {
        frame_index: u64,
        expected: usize,
        actual: usize,
    },
    #[error("frame {frame_index} arrived after frame {previous}")]
    OutOfOrder { frame_index: u64, previous: u64 },
    #[error("frame {frame_index} has zero width or height")]
    EmptyFrame { frame_index: u64 },
}

impl InputError {
    pub fn frame_index(&self) -> u64 {
        match self {
            InputError::DimensionMismatch { frame_index, .. }
            | InputError::NonFiniteTimestamp { frame_index, .. }
            | InputError::NonMonotonicTimestamp { frame_index, .. }
            | InputError::BufferSize { frame_index, .. }
            | InputError::OutOfOrder { frame_index, .. }
            | InputError::EmptyFrame { frame_index } => *frame_index,
        }
    }
}

/// Errors that abort an analysis call.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    Input(#[from] InputError),
    /// The run stopped on a stream fault. `partial` holds everything committed
    /// before the offending frame.
    #[error("analysis aborted: {source}")]
    Aborted {
        #[source]
        source: InputError,
        partial: Box<AnalysisResult>,
    },
    #[error("frame preparation worker failed: {0}")]
    Worker(String),
    #[error("action code line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl AnalysisError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        AnalysisError::Configuration(message.into())
    }
}

/// A recoverable condition observed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// No detection was produced over the whole sequence.
    DegenerateDetection { frames_processed: u64 },
    /// Two or more detections tied on both cost and confidence for one track;
    /// the lowest detection index was bound.
    AssociationAmbiguity {
        frame_index: u64,
        track_id: u64,
        detection_indices: Vec<usize>,
    },
    /// No repetition cleared the loop coverage threshold.
    FlatSequenceFallback {
        best_coverage: f64,
        threshold: f64,
    },
    /// The run was cancelled; everything before `frame_index` was committed.
    Cancelled { frame_index: u64 },
}
