use anyhow::{Context, Result, bail};
use clap::Parser;
use futures::StreamExt;
use motion_analyzer::{
    AnalysisConfig, AnalysisError, AnalysisResult, CancelFlag, Frame, ParallelPipeline,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Analyzes a directory of still frames and writes action code plus exports.
#[derive(Debug, Parser)]
#[command(name = "motion_tester", version)]
struct Args {
    /// Directory of frames (png, jpg), analyzed in file name order.
    frames: PathBuf,
    /// Capture rate used to timestamp the frames.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,
    /// JSON file overriding any subset of the analysis parameters.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Where the outputs go.
    #[arg(long, default_value = "analysis_out")]
    out: PathBuf,
    /// Worker count for frame preparation. Defaults to the number of CPUs.
    #[arg(long)]
    workers: Option<usize>,
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("failed to parse config {}", path.display()))
}

fn frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read frame directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"));
        if is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Writes the action code, tracking export and run metadata into `out`.
fn write_outputs(out: &Path, result: &AnalysisResult, config: &AnalysisConfig) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    let code_path = out.join("action_code.txt");
    fs::write(&code_path, &result.text)
        .with_context(|| format!("failed to write {}", code_path.display()))?;
    let export_path = out.join("tracking.json");
    fs::write(&export_path, result.export().to_json()?)
        .with_context(|| format!("failed to write {}", export_path.display()))?;
    let metadata_path = out.join("metadata.json");
    fs::write(&metadata_path, result.metadata(config).to_json()?)
        .with_context(|| format!("failed to write {}", metadata_path.display()))?;
    Ok(())
}

/// Writes the outputs of a finished run. An aborted run still gets the
/// outputs of the frames it committed before its error is returned.
fn conclude(
    outcome: Result<AnalysisResult, AnalysisError>,
    out: &Path,
    config: &AnalysisConfig,
) -> Result<AnalysisResult> {
    match outcome {
        Ok(result) => {
            write_outputs(out, &result, config)?;
            Ok(result)
        }
        Err(AnalysisError::Aborted { source, partial }) => {
            write_outputs(out, &partial, config)?;
            warn!(out = %out.display(), error = %source, "run aborted, partial outputs written");
            Err(AnalysisError::Aborted { source, partial }.into())
        }
        Err(error) => Err(error.into()),
    }
}

fn decode(index: u64, timestamp: f64, path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    Ok(Frame::from_rgba_image(index, timestamp, image)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let args = Args::parse();
    if !(args.fps.is_finite() && args.fps > 0.0) {
        bail!("--fps must be a positive number, got {}", args.fps);
    }
    let config = load_config(args.config.as_deref())?;

    let paths = frame_paths(&args.frames)?;
    if paths.is_empty() {
        bail!("no frames found in {}", args.frames.display());
    }
    info!(frames = paths.len(), dir = %args.frames.display(), "frames found");

    // --- 2. Pipeline Initialization ---
    let mut pipeline = ParallelPipeline::new(config.clone())?;
    if let Some(workers) = args.workers {
        pipeline = pipeline.with_workers(workers);
    }
    info!(workers = pipeline.workers(), "frame preparation pool sized");

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing with the frames analyzed so far");
            on_interrupt.cancel();
        }
    });

    // --- 3. Frame Stream ---
    // Undecodable files are logged and left out of the run.
    let fps = args.fps;
    let frames = futures::stream::iter(paths.into_iter().enumerate()).filter_map(
        move |(i, path)| async move {
            match decode(i as u64, i as f64 / fps, &path) {
                Ok(frame) => Some(frame),
                Err(error) => {
                    warn!(file = %path.display(), error = %error, "skipping frame");
                    None
                }
            }
        },
    );

    // --- 4. Analysis & Outputs ---
    let result = conclude(pipeline.run(frames, cancel).await, &args.out, &config)?;
    for diagnostic in &result.diagnostics {
        info!(?diagnostic, "diagnostic");
    }

    print!("{}", result.text);
    info!(
        tracks = result.tracks.len(),
        events = result.events.len(),
        out = %args.out.display(),
        "processing complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_analyzer::analyze;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("motion_tester_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn aborted_run_still_writes_partial_outputs() {
        let config = AnalysisConfig::default();
        let frames = vec![
            Frame::solid(0, 0.0, 32, 24, [30, 30, 30, 255]).unwrap(),
            Frame::solid(1, 0.1, 32, 24, [30, 30, 30, 255]).unwrap(),
            Frame::solid(2, 0.2, 16, 16, [30, 30, 30, 255]).unwrap(),
        ];
        let outcome = analyze(frames, &config, &CancelFlag::new());
        let out = scratch_dir("aborted");

        let err = conclude(outcome, &out, &config).unwrap_err();
        assert!(matches!(err.downcast_ref::<AnalysisError>(), Some(AnalysisError::Aborted { .. })));

        let metadata: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(metadata["statistics"]["frames_processed"], 2);
        assert!(out.join("tracking.json").exists());
        assert!(out.join("action_code.txt").exists());
        fs::remove_dir_all(&out).unwrap();
    }

    #[test]
    fn configuration_errors_write_nothing() {
        let config = AnalysisConfig::default();
        let out = scratch_dir("config");
        let outcome = Err(AnalysisError::Configuration("bad".to_string()));
        assert!(conclude(outcome, &out, &config).is_err());
        assert!(!out.exists());
    }
}
