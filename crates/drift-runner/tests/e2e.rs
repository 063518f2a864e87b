mod common;

use common::GridEngine;
use drift_runner::config::{EngineConfig, StoppingConfig, TransformConfig};
use drift_runner::protocol::ViewRect;
use drift_runner::{ExperimentConfig, ExperimentRunner, FailureKind, StopReason};
use std::fs;
use std::path::Path;

fn experiment(dir: &Path, engine: &GridEngine, steps: usize, ceiling: f64) -> ExperimentConfig {
    let binary = common::write_engine(dir, "engine.sh", &engine.script());
    ExperimentConfig {
        name: "grid".to_string(),
        engine: EngineConfig {
            binary,
            mode: None,
            read_timeout_seconds: 2.0,
            shutdown_timeout_seconds: 2.0,
        },
        scene: dir.join("grid.svg"),
        initial_bounds: ViewRect::default(),
        steps,
        fps_frames: 5,
        work_dir: dir.join("work"),
        record_view_bounds: None,
        transform: TransformConfig::default(),
        stopping: StoppingConfig {
            unique_floor: None,
            max_step_seconds: ceiling,
        },
    }
}

#[test]
fn fixed_scale_run_measures_drift_against_live_engine() {
    let dir = common::temp_dir("e2e_complete");
    let config = experiment(&dir, &GridEngine::plain(), 3, 60.0);
    let result = ExperimentRunner::new(config).run();

    assert_eq!(result.stop.reason, StopReason::Completed, "{:?}", result.stop);
    assert_eq!(result.accuracy.len(), 3);
    assert_eq!(result.performance.len(), 3);
    // Step i widens the last box to i + 2 units against a unit baseline.
    for (i, sample) in result.accuracy.iter().enumerate() {
        let expected = ((i + 1) as f64).sqrt();
        assert!((sample.error - expected).abs() < 1e-12, "step {}: {}", i, sample.error);
        assert_eq!(sample.unique, 3);
        assert_eq!(sample.view_bounds, vec![0.0, 0.0, 1.0, 1.0]);
    }
    assert_eq!(result.performance[0].counters[0], 5.0);
    assert_eq!(result.baseline_view, Some(ViewRect::default()));

    let leftovers: Vec<_> = fs::read_dir(dir.join("work"))
        .expect("work dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.ends_with(".dat"))
        .collect();
    assert!(leftovers.is_empty(), "telemetry left behind: {:?}", leftovers);
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn slow_second_step_stops_with_two_samples() {
    let dir = common::temp_dir("e2e_slow");
    let engine = GridEngine {
        slow_query: Some(2),
        ..GridEngine::plain()
    };
    let config = experiment(&dir, &engine, 3, 0.5);
    let result = ExperimentRunner::new(config).run();

    assert_eq!(result.accuracy.len(), 2);
    assert_eq!(result.performance.len(), 2);
    assert_eq!(result.stop.step, Some(1));
    assert!(
        matches!(result.stop.reason, StopReason::PerformanceCollapse { .. }),
        "{:?}",
        result.stop
    );
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn engine_that_stops_answering_yields_partial_result() {
    let dir = common::temp_dir("e2e_mute");
    let engine = GridEngine {
        mute_query: Some(2),
        ..GridEngine::plain()
    };
    let mut config = experiment(&dir, &engine, 5, 60.0);
    config.engine.read_timeout_seconds = 0.3;
    let result = ExperimentRunner::new(config).run();

    assert_eq!(result.accuracy.len(), 1);
    assert_eq!(result.stop.step, Some(1));
    match &result.stop.reason {
        StopReason::StepFailure { kind, .. } => assert_eq!(*kind, FailureKind::EngineUnresponsive),
        other => panic!("unexpected stop {:?}", other),
    }
    assert!(!dir.join("work").join("step1.dat").exists());
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn crashed_engine_is_a_step_failure_not_a_panic() {
    let dir = common::temp_dir("e2e_crash");
    let engine = GridEngine {
        crash_query: Some(3),
        ..GridEngine::plain()
    };
    let config = experiment(&dir, &engine, 5, 60.0);
    let result = ExperimentRunner::new(config).run();

    assert_eq!(result.accuracy.len(), 2);
    assert_eq!(result.stop.step, Some(2));
    match &result.stop.reason {
        StopReason::StepFailure { kind, .. } => assert_eq!(*kind, FailureKind::ProcessExited),
        other => panic!("unexpected stop {:?}", other),
    }
    let _ = fs::remove_dir_all(dir);
}

#[test]
fn engine_silent_at_startup_reports_unresponsive_with_empty_series() {
    let dir = common::temp_dir("e2e_startup");
    let binary = common::write_engine(
        &dir,
        "silent.sh",
        "while IFS= read -r line; do\n  [ \"$line\" = quit ] && exit 0\ndone",
    );
    let mut config = experiment(&dir, &GridEngine::plain(), 3, 60.0);
    config.engine.binary = binary;
    config.engine.read_timeout_seconds = 0.3;
    let result = ExperimentRunner::new(config).run();

    assert!(result.accuracy.is_empty() && result.performance.is_empty());
    assert_eq!(result.stop.step, None);
    match &result.stop.reason {
        StopReason::StartupFailure { kind, .. } => {
            assert_eq!(*kind, FailureKind::EngineUnresponsive)
        }
        other => panic!("unexpected stop {:?}", other),
    }
    let _ = fs::remove_dir_all(dir);
}
