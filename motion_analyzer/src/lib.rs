// THEORY:
// This file is the entry point for the `motion_analyzer` library crate. It
// exposes one high-level operation, analysing an ordered stream of RGBA frames
// from an assembly recording, and the data that comes out of it:
//
// 1.  **Tracks**: every object that was confirmed at some point, with its
//     dominant role (hand, device under test, conveyor, fixture) and its full
//     trajectory.
// 2.  **Events**: per-track motion segments typed as assembly verbs (GRAB,
//     LOAD, PLACE, ...), with the object they act on.
// 3.  **Action code**: the event list folded into loops and conditionals
//     wherever the work repeats, rendered as timestamped text.
//
// `pipeline::analyze` runs everything on the calling thread.
// `parallel_pipeline::ParallelPipeline` does the same on a tokio runtime,
// fanning per-frame preparation out over a worker pool. The stages themselves
// live in `core_modules` and can be driven one by one through
// `pipeline::AnalysisSession`.

pub mod action_code;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod export;
pub mod frame;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, Diagnostic, InputError};
pub use frame::Frame;
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{AnalysisResult, AnalysisSession, CancelFlag, analyze};
