//! Precision-drift measurement harness for a scriptable vector renderer.
//!
//! An experiment drives the engine over its stdin command protocol, applies a
//! zoom or pan transform per step, captures the bounding boxes the engine
//! reports and accumulates how far they drift from a baseline snapshot.

pub mod bounds;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod step;
pub mod sweep;

pub use bounds::{read_snapshot, BoundsReader, BoundsRecord};
pub use config::{ExperimentConfig, SweepConfig, TransformConfig};
pub use error::{DriftError, FailureKind, Result};
pub use metrics::{compute_error, count_unique};
pub use runner::{
    CancelToken, ExperimentResult, ExperimentRunner, RunState, Stop, StopReason, StoppingPolicy,
};
pub use session::{EngineLink, EngineSession, SessionOptions};
pub use step::{AccuracySample, PerformanceSample, StepExecutor, TransformStrategy};
pub use sweep::run_sweep;

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub name: String,
    pub engine: PathBuf,
    pub mode: Option<String>,
    pub scene: PathBuf,
    pub work_dir: PathBuf,
    pub transform: String,
    pub steps: usize,
    pub fps_frames: u64,
    pub unique_floor: usize,
    pub max_step_seconds: f64,
    pub engine_exists: bool,
    pub scene_exists: bool,
}

pub fn describe_experiment(path: &Path) -> Result<ExperimentSummary> {
    Ok(summarize(&ExperimentConfig::load(path)?))
}

pub fn summarize(config: &ExperimentConfig) -> ExperimentSummary {
    let runner = ExperimentRunner::new(config.clone());
    ExperimentSummary {
        name: config.name.clone(),
        engine: config.engine.binary.clone(),
        mode: config.engine.mode.map(|m| m.as_str().to_string()),
        scene: config.scene.clone(),
        work_dir: config.work_dir.clone(),
        transform: config.transform.strategy().name().to_string(),
        steps: config.steps,
        fps_frames: config.fps_frames,
        unique_floor: runner.policy().unique_floor,
        max_step_seconds: runner.policy().max_step_seconds,
        engine_exists: config.engine.binary.exists(),
        scene_exists: config.scene.exists(),
    }
}

pub fn run_experiment(path: &Path) -> Result<ExperimentResult> {
    run_experiment_with_cancel(path, &CancelToken::new())
}

pub fn run_experiment_with_cancel(path: &Path, cancel: &CancelToken) -> Result<ExperimentResult> {
    let config = ExperimentConfig::load(path)?;
    Ok(ExperimentRunner::new(config)
        .with_cancel(cancel.clone())
        .run())
}

pub fn run_sweep_file(path: &Path, cancel: &CancelToken) -> Result<Vec<ExperimentResult>> {
    let sweep = SweepConfig::load(path)?;
    Ok(run_sweep(sweep.expand(), cancel))
}

/// `error<TAB>unique(reference)<TAB>unique(other)` for two telemetry files.
pub fn compare_snapshots(reference: &Path, other: &Path) -> Result<(f64, usize, usize)> {
    let a = read_snapshot(reference)?;
    let b = read_snapshot(other)?;
    Ok((compute_error(&a, &b)?, count_unique(&a), count_unique(&b)))
}
