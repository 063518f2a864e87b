//! Experiment state machine: `Starting -> Running -> Stopped(reason)`.
//!
//! The runner owns the engine for the whole experiment, establishes a
//! baseline snapshot, then executes steps until the step budget runs out or
//! a stopping condition fires. Every path through `Stopped` takes a final
//! screenshot (best effort) and shuts the engine down, and the samples
//! collected so far are always returned.

use crate::bounds::BoundsRecord;
use crate::config::ExperimentConfig;
use crate::error::{DriftError, FailureKind, Result};
use crate::metrics::{compute_error, count_unique};
use crate::protocol::{parse_view_rect, EngineCommand, ViewRect};
use crate::session::{EngineLink, EngineSession};
use crate::step::{
    AccuracySample, PerformanceSample, SnapshotFile, StepExecutor, StepOutput, TransformStrategy,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const BASELINE_SNAPSHOT: &str = "original.dat";
pub const BASELINE_SCREENSHOT: &str = "original.bmp";
pub const FINAL_SCREENSHOT: &str = "final.bmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Every configured step ran.
    Completed,
    /// Too few distinct boxes remain to tell zoom from numerical noise.
    PrecisionExhausted { unique: usize, floor: usize },
    /// The engine became too slow to keep sampling.
    PerformanceCollapse { seconds: f64, ceiling: f64 },
    StepFailure { kind: FailureKind, message: String },
    StartupFailure { kind: FailureKind, message: String },
    Cancelled,
}

impl StopReason {
    fn from_error(err: &DriftError, startup: bool) -> Self {
        if startup {
            StopReason::StartupFailure {
                kind: err.kind(),
                message: err.to_string(),
            }
        } else {
            StopReason::StepFailure {
                kind: err.kind(),
                message: err.to_string(),
            }
        }
    }

    pub fn is_early(&self) -> bool {
        !matches!(self, StopReason::Completed)
    }

    pub fn describe(&self) -> String {
        match self {
            StopReason::Completed => "completed".to_string(),
            StopReason::PrecisionExhausted { unique, floor } => format!(
                "no precision left ({} unique bounds, floor {})",
                unique, floor
            ),
            StopReason::PerformanceCollapse { seconds, ceiling } => format!(
                "took too long to render frames ({:.2}s > {:.2}s)",
                seconds, ceiling
            ),
            StopReason::StepFailure { message, .. } => format!("step failed: {}", message),
            StopReason::StartupFailure { message, .. } => {
                format!("could not start: {}", message)
            }
            StopReason::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Terminal state: the step at which the experiment stopped and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    /// `None` when no step was running (startup, or all steps completed).
    pub step: Option<usize>,
    #[serde(flatten)]
    pub reason: StopReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Starting,
    Running,
    Stopped(Stop),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub experiment: String,
    pub transform: String,
    pub engine: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub baseline_view: Option<ViewRect>,
    pub accuracy: Vec<AccuracySample>,
    pub performance: Vec<PerformanceSample>,
    pub stop: Stop,
}

impl ExperimentResult {
    pub fn steps_completed(&self) -> usize {
        self.accuracy.len()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| DriftError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

/// Shared flag an outside party sets to stop an experiment between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
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

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoppingPolicy {
    pub unique_floor: usize,
    pub max_step_seconds: f64,
}

impl StoppingPolicy {
    /// Checks the latest pair of samples. Precision is checked first.
    pub fn evaluate(
        &self,
        accuracy: &AccuracySample,
        performance: &PerformanceSample,
    ) -> Option<StopReason> {
        if accuracy.unique <= self.unique_floor {
            return Some(StopReason::PrecisionExhausted {
                unique: accuracy.unique,
                floor: self.unique_floor,
            });
        }
        if performance.wall_seconds > self.max_step_seconds {
            return Some(StopReason::PerformanceCollapse {
                seconds: performance.wall_seconds,
                ceiling: self.max_step_seconds,
            });
        }
        None
    }
}

struct Baseline {
    snapshot: Vec<BoundsRecord>,
    view: ViewRect,
}

pub struct ExperimentRunner {
    config: ExperimentConfig,
    strategy: Box<dyn TransformStrategy>,
    policy: StoppingPolicy,
    cancel: CancelToken,
    state: RunState,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentConfig) -> Self {
        let strategy = config.transform.strategy();
        let policy = StoppingPolicy {
            unique_floor: config
                .stopping
                .unique_floor
                .unwrap_or_else(|| strategy.default_unique_floor()),
            max_step_seconds: config.stopping.max_step_seconds,
        };
        Self {
            config,
            strategy,
            policy,
            cancel: CancelToken::new(),
            state: RunState::Starting,
        }
    }

    /// Replaces the configured transform.
    pub fn with_strategy(mut self, strategy: Box<dyn TransformStrategy>) -> Self {
        if self.config.stopping.unique_floor.is_none() {
            self.policy.unique_floor = strategy.default_unique_floor();
        }
        self.strategy = strategy;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn policy(&self) -> StoppingPolicy {
        self.policy
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Launches the configured engine and runs the experiment to completion.
    pub fn run(&mut self) -> ExperimentResult {
        let started_at = Utc::now();
        if let Err(e) = fs::create_dir_all(&self.config.work_dir) {
            return self.startup_failed(started_at, DriftError::Io(e));
        }
        let options = match self.config.engine.session_options() {
            Ok(options) => options,
            Err(e) => return self.startup_failed(started_at, e),
        };
        let session =
            EngineSession::start(&self.config.engine.binary, self.config.engine.mode, options);
        match session {
            Ok(mut session) => self.drive_from(&mut session, started_at),
            Err(e) => self.startup_failed(started_at, e),
        }
    }

    /// Runs the experiment against an already connected engine. The engine
    /// is shut down before this returns.
    pub fn drive<E: EngineLink>(&mut self, engine: &mut E) -> ExperimentResult {
        self.drive_from(engine, Utc::now())
    }

    fn drive_from<E: EngineLink>(
        &mut self,
        engine: &mut E,
        started_at: DateTime<Utc>,
    ) -> ExperimentResult {
        let mut accuracy = Vec::new();
        let mut performance = Vec::new();
        self.state = RunState::Starting;

        let baseline = match self.establish_baseline(engine) {
            Ok(baseline) => {
                info!(
                    experiment = %self.config.name,
                    records = baseline.snapshot.len(),
                    unique = count_unique(&baseline.snapshot),
                    "baseline captured"
                );
                Some(baseline)
            }
            Err(e) => {
                error!(experiment = %self.config.name, error = %e, "startup failed");
                self.state = RunState::Stopped(Stop {
                    step: None,
                    reason: StopReason::from_error(&e, true),
                });
                None
            }
        };

        if let Some(baseline) = &baseline {
            self.state = RunState::Running;
            let stop = self.run_steps(engine, baseline, &mut accuracy, &mut performance);
            self.state = RunState::Stopped(stop);
        }

        self.finish(engine);
        let stop = match &self.state {
            RunState::Stopped(stop) => stop.clone(),
            _ => Stop {
                step: None,
                reason: StopReason::Completed,
            },
        };
        ExperimentResult {
            experiment: self.config.name.clone(),
            transform: self.strategy.name().to_string(),
            engine: self.config.engine.binary.clone(),
            started_at,
            finished_at: Utc::now(),
            baseline_view: baseline.map(|b| b.view),
            accuracy,
            performance,
            stop,
        }
    }

    fn establish_baseline<E: EngineLink>(&self, engine: &mut E) -> Result<Baseline> {
        let work_dir = &self.config.work_dir;
        engine.send(&EngineCommand::SetBounds(self.config.initial_bounds))?;
        engine.send(&EngineCommand::LoadSvg(self.config.scene.clone()))?;
        let snapshot = SnapshotFile::new(work_dir.join(BASELINE_SNAPSHOT));
        engine.send(&EngineCommand::QueryGpuBounds(snapshot.path().to_path_buf()))?;
        engine.send(&EngineCommand::Screenshot(work_dir.join(BASELINE_SCREENSHOT)))?;
        // printbounds is answered only after the snapshot has been written.
        let view = parse_view_rect(&engine.request(&EngineCommand::PrintBounds)?)?;
        let records = crate::bounds::read_snapshot(snapshot.path())?;
        Ok(Baseline {
            snapshot: records,
            view,
        })
    }

    fn run_steps<E: EngineLink>(
        &self,
        engine: &mut E,
        baseline: &Baseline,
        accuracy: &mut Vec<AccuracySample>,
        performance: &mut Vec<PerformanceSample>,
    ) -> Stop {
        let executor = StepExecutor {
            strategy: self.strategy.as_ref(),
            scene: &self.config.scene,
            work_dir: &self.config.work_dir,
            fps_frames: self.config.fps_frames,
            record_view_bounds: self
                .config
                .record_view_bounds
                .unwrap_or_else(|| self.strategy.records_view_bounds()),
        };
        let name = &self.config.name;

        for index in 0..self.config.steps {
            if self.cancel.is_cancelled() {
                warn!(experiment = %name, step = index, "cancelled before step");
                return Stop {
                    step: Some(index),
                    reason: StopReason::Cancelled,
                };
            }

            let measured = executor
                .execute(engine, index, baseline.view)
                .and_then(|out| measure(out, &baseline.snapshot));
            let (acc, perf) = match measured {
                Ok(pair) => pair,
                Err(e) => {
                    error!(experiment = %name, step = index, error = %e, "quit early: step failed");
                    return Stop {
                        step: Some(index),
                        reason: StopReason::from_error(&e, false),
                    };
                }
            };

            info!(
                experiment = %name,
                step = index,
                error = acc.error,
                unique = acc.unique,
                seconds = perf.wall_seconds,
                "step complete"
            );
            let verdict = self.policy.evaluate(&acc, &perf);
            accuracy.push(acc);
            performance.push(perf);

            if let Some(reason) = verdict {
                warn!(experiment = %name, step = index, reason = %reason.describe(), "quit early");
                return Stop {
                    step: Some(index),
                    reason,
                };
            }
        }

        Stop {
            step: None,
            reason: StopReason::Completed,
        }
    }

    fn finish<E: EngineLink>(&self, engine: &mut E) {
        let shot = self.config.work_dir.join(FINAL_SCREENSHOT);
        if let Err(e) = engine.send(&EngineCommand::Screenshot(shot)) {
            warn!(experiment = %self.config.name, error = %e, "final screenshot not requested");
        }
        engine.shutdown();
    }

    fn startup_failed(&mut self, started_at: DateTime<Utc>, err: DriftError) -> ExperimentResult {
        error!(experiment = %self.config.name, error = %err, "could not start");
        let stop = Stop {
            step: None,
            reason: StopReason::from_error(&err, true),
        };
        self.state = RunState::Stopped(stop.clone());
        ExperimentResult {
            experiment: self.config.name.clone(),
            transform: self.strategy.name().to_string(),
            engine: self.config.engine.binary.clone(),
            started_at,
            finished_at: Utc::now(),
            baseline_view: None,
            accuracy: Vec::new(),
            performance: Vec::new(),
            stop,
        }
    }
}

fn measure(
    out: StepOutput,
    reference: &[BoundsRecord],
) -> Result<(AccuracySample, PerformanceSample)> {
    let error = compute_error(reference, &out.snapshot)?;
    let unique = count_unique(&out.snapshot);
    let view_bounds = out
        .view_bounds
        .map(|b| vec![b.x, b.y, b.w, b.h])
        .unwrap_or_default();
    Ok((
        AccuracySample {
            step: out.index,
            view_bounds,
            error,
            unique,
        },
        out.performance,
    ))
}
