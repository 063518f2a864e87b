//! YAML experiment descriptions.

use crate::error::{DriftError, Result};
use crate::protocol::{RenderMode, ViewRect};
use crate::session::SessionOptions;
use crate::step::{FixedScale, Invariance, Pan, TransformStrategy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub binary: PathBuf,
    #[serde(default)]
    pub mode: Option<RenderMode>,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_seconds: f64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: f64,
}

impl EngineConfig {
    pub fn session_options(&self) -> Result<SessionOptions> {
        Ok(SessionOptions {
            read_timeout: timeout(
                "engine.read_timeout_seconds",
                self.read_timeout_seconds,
            )?,
            shutdown_timeout: timeout(
                "engine.shutdown_timeout_seconds",
                self.shutdown_timeout_seconds,
            )?,
        })
    }
}

fn timeout(field: &str, seconds: f64) -> Result<Duration> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(DriftError::Config(timeout_message(field, seconds))),
    }
}

fn timeout_message(field: &str, seconds: f64) -> String {
    format!(
        "{} must be a positive number of seconds that fits a duration, got {}",
        field, seconds
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformConfig {
    FixedScale {
        #[serde(default = "half")]
        x: f64,
        #[serde(default = "half")]
        y: f64,
        #[serde(default = "half")]
        factor: f64,
    },
    Invariance {
        #[serde(default = "default_px")]
        px: i64,
        #[serde(default = "default_py")]
        py: i64,
        #[serde(default = "default_px_amount")]
        amount: i64,
        #[serde(default = "one")]
        first_repeat: u64,
        #[serde(default = "default_repeat_stride")]
        repeat_stride: u64,
    },
    Pan {
        dx: f64,
        dy: f64,
    },
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig::FixedScale {
            x: 0.5,
            y: 0.5,
            factor: 0.5,
        }
    }
}

impl TransformConfig {
    pub fn strategy(&self) -> Box<dyn TransformStrategy> {
        match *self {
            TransformConfig::FixedScale { x, y, factor } => Box::new(FixedScale { x, y, factor }),
            TransformConfig::Invariance {
                px,
                py,
                amount,
                first_repeat,
                repeat_stride,
            } => Box::new(Invariance {
                px,
                py,
                amount,
                first_repeat,
                repeat_stride,
            }),
            TransformConfig::Pan { dx, dy } => Box::new(Pan { dx, dy }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoppingConfig {
    /// Falls back to the transform's own floor when unset.
    #[serde(default)]
    pub unique_floor: Option<usize>,
    #[serde(default = "default_max_step_seconds")]
    pub max_step_seconds: f64,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            unique_floor: None,
            max_step_seconds: default_max_step_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub engine: EngineConfig,
    pub scene: PathBuf,
    #[serde(default)]
    pub initial_bounds: ViewRect,
    #[serde(default = "default_steps")]
    pub steps: usize,
    #[serde(default = "one")]
    pub fps_frames: u64,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default)]
    pub record_view_bounds: Option<bool>,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub stopping: StoppingConfig,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut config: ExperimentConfig = serde_yaml::from_str(&raw)?;
        config.resolve_paths(config_dir(path));
        config.validate()?;
        Ok(config)
    }

    /// Makes relative paths relative to `base` instead of the process cwd.
    pub fn resolve_paths(&mut self, base: &Path) {
        if looks_like_path(&self.engine.binary) {
            self.engine.binary = rebase(base, &self.engine.binary);
        }
        self.scene = rebase(base, &self.scene);
        self.work_dir = rebase(base, &self.work_dir);
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.steps == 0 {
            problems.push("steps must be at least 1".to_string());
        }
        if self.fps_frames == 0 {
            problems.push("fps_frames must be at least 1".to_string());
        }
        if self.initial_bounds.w <= 0.0 || self.initial_bounds.h <= 0.0 {
            problems.push("initial_bounds must have positive w and h".to_string());
        }
        for (field, value) in [
            ("engine.read_timeout_seconds", self.engine.read_timeout_seconds),
            (
                "engine.shutdown_timeout_seconds",
                self.engine.shutdown_timeout_seconds,
            ),
        ] {
            if timeout(field, value).is_err() {
                problems.push(timeout_message(field, value));
            }
        }
        if !(self.stopping.max_step_seconds.is_finite() && self.stopping.max_step_seconds > 0.0) {
            problems.push("stopping.max_step_seconds must be a positive number".to_string());
        }
        match self.transform {
            TransformConfig::FixedScale { factor, .. } => {
                if !(factor.is_finite() && factor > 0.0) {
                    problems.push("transform.factor must be a positive number".to_string());
                }
            }
            TransformConfig::Invariance {
                px,
                py,
                amount,
                first_repeat,
                repeat_stride,
            } => {
                let invariance = Invariance {
                    px,
                    py,
                    amount,
                    first_repeat,
                    repeat_stride,
                };
                if invariance.zoom_out_amount().is_none() {
                    problems.push(format!("transform.amount {} cannot be reversed", amount));
                }
                let last = self.steps.saturating_sub(1);
                if invariance.repeats(last).is_none() {
                    problems.push(format!(
                        "transform repeat count overflows by step {} (first_repeat {}, repeat_stride {})",
                        last, first_repeat, repeat_stride
                    ));
                }
            }
            TransformConfig::Pan { dx, dy } => {
                if !(dx.is_finite() && dy.is_finite()) {
                    problems.push("transform.dx and transform.dy must be finite".to_string());
                }
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(DriftError::Config(problems.join("; ")))
        }
    }
}

/// One engine build in a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepEngine {
    pub name: String,
    pub binary: PathBuf,
    #[serde(default)]
    pub mode: Option<RenderMode>,
}

/// The same experiment run against several engine builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    pub experiment: ExperimentConfig,
    pub engines: Vec<SweepEngine>,
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut sweep: SweepConfig = serde_yaml::from_str(&raw)?;
        let base = config_dir(path).to_path_buf();
        for engine in &mut sweep.engines {
            if looks_like_path(&engine.binary) {
                engine.binary = rebase(&base, &engine.binary);
            }
        }
        sweep.experiment.resolve_paths(&base);
        sweep.validate()?;
        Ok(sweep)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(DriftError::Config("sweep lists no engines".to_string()));
        }
        // Names become a directory under work_dir and a `<name>.json` result file.
        if let Some(engine) = self.engines.iter().find(|e| !is_plain_name(&e.name)) {
            return Err(DriftError::Config(format!(
                "engine name '{}' must be a single path component without separators",
                engine.name
            )));
        }
        let mut names: Vec<&str> = self.engines.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(DriftError::Config(format!(
                "duplicate engine name '{}' (names select work directories)",
                w[0]
            )));
        }
        self.experiment.validate()
    }

    /// Per-engine experiment configs, each with its own work directory.
    pub fn expand(&self) -> Vec<ExperimentConfig> {
        self.engines
            .iter()
            .map(|engine| {
                let mut config = self.experiment.clone();
                config.name = format!("{}/{}", self.experiment.name, engine.name);
                config.engine.binary = engine.binary.clone();
                config.engine.mode = engine.mode.or(self.experiment.engine.mode);
                config.work_dir = self.experiment.work_dir.join(&engine.name);
                config
            })
            .collect()
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn config_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

// Bare command names such as `ipdf` are looked up on PATH.
fn looks_like_path(path: &Path) -> bool {
    path.components().count() > 1
}

fn default_name() -> String {
    "experiment".to_string()
}

fn default_steps() -> usize {
    100
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_read_timeout() -> f64 {
    30.0
}

fn default_shutdown_timeout() -> f64 {
    10.0
}

fn default_max_step_seconds() -> f64 {
    60.0
}

fn default_px() -> i64 {
    400
}

fn default_py() -> i64 {
    300
}

fn default_px_amount() -> i64 {
    -1
}

fn default_repeat_stride() -> u64 {
    50
}

fn half() -> f64 {
    0.5
}

fn one() -> u64 {
    1
}
