//! One transform-and-measure cycle against a live engine.

use crate::bounds::{read_snapshot, BoundsRecord};
use crate::error::{DriftError, Result};
use crate::protocol::{parse_float_row, parse_view_rect, EngineCommand, LoopAction, ViewRect};
use crate::session::EngineLink;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

pub struct StepContext<'a> {
    pub index: usize,
    pub scene: &'a Path,
}

/// The view transform applied by each step of an experiment.
///
/// Implementations send the transform commands only; snapshot capture and
/// performance sampling are shared by [`StepExecutor`].
pub trait TransformStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends this step's transform. Returns the view bounds when the
    /// strategy samples them mid-transform.
    fn apply(&self, engine: &mut dyn EngineLink, ctx: &StepContext<'_>) -> Result<Option<ViewRect>>;

    /// Maps raw view bounds into the reported accuracy vector.
    fn normalize(&self, bounds: ViewRect, _baseline: ViewRect) -> ViewRect {
        bounds
    }

    /// Unique-bounds count at or below which the experiment stops.
    fn default_unique_floor(&self) -> usize;

    /// Whether steps report view bounds unless the experiment says otherwise.
    /// Strategies that sample nothing during `apply` get them from a trailing
    /// `printbounds`.
    fn records_view_bounds(&self) -> bool {
        true
    }
}

/// Zoom about a fixed document point by `factor` each step.
///
/// The scene is reloaded after the zoom so the transform compounds across
/// steps instead of being reset by the reload.
#[derive(Debug, Clone)]
pub struct FixedScale {
    pub x: f64,
    pub y: f64,
    pub factor: f64,
}

impl TransformStrategy for FixedScale {
    fn name(&self) -> &'static str {
        "fixed_scale"
    }

    fn apply(&self, engine: &mut dyn EngineLink, ctx: &StepContext<'_>) -> Result<Option<ViewRect>> {
        engine.send(&EngineCommand::Clear)?;
        engine.send(&EngineCommand::repeat(
            1,
            LoopAction::Zoom {
                x: self.x,
                y: self.y,
                factor: self.factor,
            },
        ))?;
        engine.send(&EngineCommand::LoadSvg(ctx.scene.to_path_buf()))?;
        Ok(None)
    }

    fn default_unique_floor(&self) -> usize {
        1
    }
}

/// Translate the view by a fixed document offset each step, compounding
/// like [`FixedScale`].
#[derive(Debug, Clone)]
pub struct Pan {
    pub dx: f64,
    pub dy: f64,
}

impl TransformStrategy for Pan {
    fn name(&self) -> &'static str {
        "pan"
    }

    fn apply(&self, engine: &mut dyn EngineLink, ctx: &StepContext<'_>) -> Result<Option<ViewRect>> {
        engine.send(&EngineCommand::Clear)?;
        engine.send(&EngineCommand::repeat(
            1,
            LoopAction::Translate {
                dx: self.dx,
                dy: self.dy,
            },
        ))?;
        engine.send(&EngineCommand::LoadSvg(ctx.scene.to_path_buf()))?;
        Ok(None)
    }

    fn default_unique_floor(&self) -> usize {
        1
    }
}

/// Pixel-space zoom in followed by the equal and opposite zoom out.
///
/// Step `i` repeats each zoom `first_repeat + i * repeat_stride` times. A
/// lossless engine returns to its starting view, so any residue is drift.
#[derive(Debug, Clone)]
pub struct Invariance {
    pub px: i64,
    pub py: i64,
    pub amount: i64,
    pub first_repeat: u64,
    pub repeat_stride: u64,
}

impl Invariance {
    /// Zoom repetitions for step `index`, or `None` if the count overflows.
    pub fn repeats(&self, index: usize) -> Option<u64> {
        u64::try_from(index)
            .ok()?
            .checked_mul(self.repeat_stride)?
            .checked_add(self.first_repeat)
    }

    pub fn zoom_out_amount(&self) -> Option<i64> {
        self.amount.checked_neg()
    }
}

impl TransformStrategy for Invariance {
    fn name(&self) -> &'static str {
        "invariance"
    }

    fn apply(&self, engine: &mut dyn EngineLink, ctx: &StepContext<'_>) -> Result<Option<ViewRect>> {
        let count = self.repeats(ctx.index).ok_or_else(|| {
            DriftError::Config(format!("invariance repeat count overflows at step {}", ctx.index))
        })?;
        let zoom_out = self.zoom_out_amount().ok_or_else(|| {
            DriftError::Config(format!("pxzoom amount {} cannot be reversed", self.amount))
        })?;
        engine.send(&EngineCommand::repeat(
            count,
            LoopAction::PxZoom {
                x: self.px,
                y: self.py,
                amount: self.amount,
            },
        ))?;
        let zoomed = parse_view_rect(&engine.request(&EngineCommand::PrintBounds)?)?;
        engine.send(&EngineCommand::repeat(
            count,
            LoopAction::PxZoom {
                x: self.px,
                y: self.py,
                amount: zoom_out,
            },
        ))?;
        Ok(Some(zoomed))
    }

    /// Origin relative to the baseline origin, extent as a ratio of the
    /// baseline extent.
    fn normalize(&self, bounds: ViewRect, baseline: ViewRect) -> ViewRect {
        ViewRect {
            x: bounds.x - baseline.x,
            y: bounds.y - baseline.y,
            w: bounds.w / baseline.w,
            h: bounds.h / baseline.h,
        }
    }

    fn default_unique_floor(&self) -> usize {
        10
    }
}

/// Engine counters in reply column order plus the harness-measured step
/// duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub step: usize,
    pub counters: Vec<f64>,
    pub wall_seconds: f64,
}

impl PerformanceSample {
    pub fn row(&self) -> Vec<f64> {
        let mut row = self.counters.clone();
        row.push(self.wall_seconds);
        row
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracySample {
    pub step: usize,
    /// Empty when the step did not sample view bounds.
    pub view_bounds: Vec<f64>,
    pub error: f64,
    pub unique: usize,
}

impl AccuracySample {
    /// View bounds followed by the error and the unique-bounds count.
    pub fn row(&self) -> Vec<f64> {
        let mut row = self.view_bounds.clone();
        row.push(self.error);
        row.push(self.unique as f64);
        row
    }
}

#[derive(Debug)]
pub struct StepOutput {
    pub index: usize,
    pub view_bounds: Option<ViewRect>,
    pub performance: PerformanceSample,
    pub snapshot: Vec<BoundsRecord>,
    pub snapshot_path: PathBuf,
}

/// Removes a telemetry file when dropped, whether or not it was read.
pub(crate) struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "snapshot removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove snapshot"),
        }
    }
}

pub fn step_snapshot_path(work_dir: &Path, index: usize) -> PathBuf {
    work_dir.join(format!("step{}.dat", index))
}

pub struct StepExecutor<'a> {
    pub strategy: &'a dyn TransformStrategy,
    pub scene: &'a Path,
    pub work_dir: &'a Path,
    pub fps_frames: u64,
    pub record_view_bounds: bool,
}

impl StepExecutor<'_> {
    /// Runs step `index`: transform, snapshot request, performance sample,
    /// optional view bounds, then reads and deletes the snapshot.
    ///
    /// The performance reply doubles as the completion barrier for the
    /// snapshot: the engine handles commands serially, so the reply cannot
    /// arrive before the file is written.
    pub fn execute(
        &self,
        engine: &mut dyn EngineLink,
        index: usize,
        baseline_view: ViewRect,
    ) -> Result<StepOutput> {
        let started = Instant::now();
        let ctx = StepContext {
            index,
            scene: self.scene,
        };
        let sampled = self.strategy.apply(engine, &ctx)?;

        let snapshot = SnapshotFile::new(step_snapshot_path(self.work_dir, index));
        engine.send(&EngineCommand::QueryGpuBounds(snapshot.path().to_path_buf()))?;

        let perf_command = EngineCommand::repeat(self.fps_frames, LoopAction::PrintSpf);
        let counters = parse_float_row(&perf_command, &engine.request(&perf_command)?)?;

        let view_bounds = match sampled {
            _ if !self.record_view_bounds => None,
            Some(bounds) => Some(bounds),
            None => Some(parse_view_rect(&engine.request(&EngineCommand::PrintBounds)?)?),
        }
        .map(|bounds| self.strategy.normalize(bounds, baseline_view));

        let records = read_snapshot(snapshot.path())?;
        let snapshot_path = snapshot.path().to_path_buf();
        drop(snapshot);

        Ok(StepOutput {
            index,
            view_bounds,
            performance: PerformanceSample {
                step: index,
                counters,
                wall_seconds: started.elapsed().as_secs_f64(),
            },
            snapshot: records,
            snapshot_path,
        })
    }
}
