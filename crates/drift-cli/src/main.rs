use anyhow::Result;
use clap::{Parser, Subcommand};
use drift_runner::{CancelToken, ExperimentResult, ExperimentSummary};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "drift", version = "0.3.0", about = "Renderer precision-drift harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment file against its engine.
    Run {
        experiment: PathBuf,
        /// Write the full result as JSON.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Cancel between steps once this many seconds have passed.
        #[arg(long)]
        deadline_seconds: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Run one experiment against several engine builds concurrently.
    Sweep {
        sweep: PathBuf,
        /// Directory receiving one `<engine>.json` result per build.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        deadline_seconds: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    Describe {
        experiment: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Error and unique-bounds counts between two telemetry files.
    Compare {
        reference: PathBuf,
        other: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string()));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            experiment,
            out,
            deadline_seconds,
            json,
        } => {
            let summary = drift_runner::describe_experiment(&experiment)?;
            let cancel = CancelToken::new();
            arm_interrupt(&cancel)?;
            arm_deadline(&cancel, deadline_seconds);
            let result = drift_runner::run_experiment_with_cancel(&experiment, &cancel)?;
            if let Some(path) = &out {
                result.write_json(path)?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "summary": summary_to_json(&summary),
                    "result": result_to_json(&result),
                    "out": out.as_ref().map(|p| p.display().to_string()),
                })));
            }
            print_summary(&summary);
            print_result(&result);
            if let Some(path) = &out {
                println!("out: {}", path.display());
            }
        }
        Commands::Sweep {
            sweep,
            out_dir,
            deadline_seconds,
            json,
        } => {
            let cancel = CancelToken::new();
            arm_interrupt(&cancel)?;
            arm_deadline(&cancel, deadline_seconds);
            let results = drift_runner::run_sweep_file(&sweep, &cancel)?;
            if let Some(dir) = &out_dir {
                for result in &results {
                    result.write_json(&result_file(dir, &result.experiment))?;
                }
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "sweep",
                    "results": results.iter().map(result_to_json).collect::<Vec<_>>(),
                })));
            }
            for result in &results {
                print_result(result);
                println!();
            }
        }
        Commands::Describe { experiment, json } => {
            let summary = drift_runner::describe_experiment(&experiment)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary_to_json(&summary),
                })));
            }
            print_summary(&summary);
        }
        Commands::Compare {
            reference,
            other,
            json,
        } => {
            let (error, unique_reference, unique_other) =
                drift_runner::compare_snapshots(&reference, &other)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "compare",
                    "error": error,
                    "unique_reference": unique_reference,
                    "unique_other": unique_other,
                })));
            }
            println!("{}\t{}\t{}", error, unique_reference, unique_other);
        }
    }
    Ok(None)
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Sweep { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Compare { json, .. } => *json,
    }
}

// First Ctrl-C cancels between steps so the engine still gets its final
// screenshot and quit; a second one exits immediately.
fn arm_interrupt(cancel: &CancelToken) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || on_interrupt(&cancel))?;
    Ok(())
}

fn on_interrupt(cancel: &CancelToken) {
    if cancel.is_cancelled() {
        tracing::warn!("second interrupt; exiting without cleanup");
        std::process::exit(130);
    }
    tracing::warn!("interrupt received; stopping after the current step");
    cancel.cancel();
}

fn arm_deadline(cancel: &CancelToken, deadline_seconds: Option<u64>) {
    if let Some(secs) = deadline_seconds {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            tracing::warn!(deadline_seconds = secs, "deadline reached; cancelling");
            cancel.cancel();
        });
    }
}

// Experiment names in a sweep look like `<experiment>/<engine>`.
fn result_file(dir: &Path, experiment: &str) -> PathBuf {
    let engine = experiment.rsplit('/').next().unwrap_or(experiment);
    dir.join(format!("{}.json", engine))
}

fn emit_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

fn summary_to_json(summary: &ExperimentSummary) -> Value {
    json!({
        "experiment": summary.name,
        "engine": summary.engine.display().to_string(),
        "engine_exists": summary.engine_exists,
        "mode": summary.mode,
        "scene": summary.scene.display().to_string(),
        "scene_exists": summary.scene_exists,
        "work_dir": summary.work_dir.display().to_string(),
        "transform": summary.transform,
        "steps": summary.steps,
        "fps_frames": summary.fps_frames,
        "unique_floor": summary.unique_floor,
        "max_step_seconds": summary.max_step_seconds,
    })
}

fn result_to_json(result: &ExperimentResult) -> Value {
    json!({
        "experiment": result.experiment,
        "transform": result.transform,
        "engine": result.engine.display().to_string(),
        "steps_completed": result.steps_completed(),
        "stop": result.stop,
        "stop_description": result.stop.reason.describe(),
        "last_error": result.accuracy.last().map(|a| a.error),
        "last_unique": result.accuracy.last().map(|a| a.unique),
    })
}

fn print_summary(summary: &ExperimentSummary) {
    println!("experiment: {}", summary.name);
    println!("engine: {}", summary.engine.display());
    if !summary.engine_exists {
        println!("engine_exists: false (resolved via PATH)");
    }
    if let Some(mode) = &summary.mode {
        println!("mode: {}", mode);
    }
    println!("scene: {}", summary.scene.display());
    println!("work_dir: {}", summary.work_dir.display());
    println!("transform: {}", summary.transform);
    println!("steps: {}", summary.steps);
    println!("fps_frames: {}", summary.fps_frames);
    println!("unique_floor: {}", summary.unique_floor);
    println!("max_step_seconds: {}", summary.max_step_seconds);
}

fn print_result(result: &ExperimentResult) {
    println!("experiment: {}", result.experiment);
    println!("steps_completed: {}", result.steps_completed());
    match result.stop.step {
        Some(step) if result.stop.reason.is_early() => {
            println!("stopped: step {} - {}", step, result.stop.reason.describe())
        }
        _ => println!("stopped: {}", result.stop.reason.describe()),
    }
    if let Some(last) = result.accuracy.last() {
        println!("last_error: {}", last.error);
        println!("last_unique: {}", last.unique);
    }
    if let Some(last) = result.performance.last() {
        println!("last_step_seconds: {:.3}", last.wall_seconds);
    }
}
