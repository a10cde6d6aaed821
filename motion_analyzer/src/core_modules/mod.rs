// The per-frame and per-run building blocks. Each module owns one stage;
// `pipeline` wires them together.

pub mod assignment;
pub mod background;
pub mod classifier;
pub mod detection;
pub mod detector;
pub mod kalman;
pub mod pixel;
pub mod segmenter;
pub mod synthesizer;
pub mod track;
pub mod tracker;
