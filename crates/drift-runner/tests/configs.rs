use drift_runner::{ExperimentConfig, SweepConfig, TransformConfig};
use std::path::PathBuf;

fn demos() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("demos")
}

#[test]
fn demo_experiments_load_and_resolve_paths() {
    let fixed = ExperimentConfig::load(&demos().join("fixed_scale.yaml")).expect("fixed");
    assert!(matches!(fixed.transform, TransformConfig::FixedScale { .. }));
    assert!(fixed.scene.ends_with("svg-tests/grid.svg"));
    assert!(fixed.scene.starts_with(demos()));
    assert!(fixed.engine.binary.starts_with(demos()));

    let invariance = ExperimentConfig::load(&demos().join("invariance.yaml")).expect("invariance");
    assert_eq!(invariance.steps, 20);
    assert_eq!(invariance.transform.strategy().default_unique_floor(), 10);
}

#[test]
fn demo_sweep_expands_per_engine() {
    let sweep = SweepConfig::load(&demos().join("sweep.yaml")).expect("sweep");
    let configs = sweep.expand();
    assert_eq!(configs.len(), 3);
    assert!(configs[2].work_dir.ends_with("runs/sweep/mpfr-1024"));
    assert!(configs[1].engine.binary.ends_with("ipdf-double"));
}
