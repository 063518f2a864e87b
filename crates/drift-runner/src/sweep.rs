//! Independent experiments, one thread and one engine process each.

use crate::config::ExperimentConfig;
use crate::runner::{CancelToken, ExperimentResult, ExperimentRunner};
use std::thread;
use tracing::info;

/// Runs every config concurrently and returns results in input order.
///
/// Each experiment owns its engine and work directory; the only shared state
/// is the cancellation flag.
pub fn run_sweep(configs: Vec<ExperimentConfig>, cancel: &CancelToken) -> Vec<ExperimentResult> {
    info!(experiments = configs.len(), "sweep started");
    thread::scope(|scope| {
        let handles: Vec<_> = configs
            .into_iter()
            .map(|config| {
                let cancel = cancel.clone();
                scope.spawn(move || ExperimentRunner::new(config).with_cancel(cancel).run())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}
