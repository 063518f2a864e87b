//! Error accumulation between two telemetry snapshots of the same scene.

use crate::bounds::BoundsRecord;
use crate::error::{DriftError, Result};
use std::collections::HashSet;

/// Accumulated geometric error of `other` relative to `reference`.
///
/// Records are aligned positionally. For each pair the contribution is
/// `sqrt(|area(b) - area(a)|) + |(b.x - a.x) + (b.y - a.y)|`. Both snapshots
/// must describe the same objects in the same order, so differing lengths
/// fail with [`DriftError::MismatchedSnapshot`] before anything is summed.
pub fn compute_error(reference: &[BoundsRecord], other: &[BoundsRecord]) -> Result<f64> {
    if reference.len() != other.len() {
        return Err(DriftError::MismatchedSnapshot {
            reference: reference.len(),
            other: other.len(),
        });
    }
    Ok(reference
        .iter()
        .zip(other)
        .map(|(a, b)| {
            let delta_area = (b.area() - a.area()).abs();
            let delta_coord = (b.x - a.x) + (b.y - a.y);
            delta_area.sqrt() + delta_coord.abs()
        })
        .sum())
}

/// Number of distinct bounding boxes, keyed on every field except `id`.
pub fn count_unique(snapshot: &[BoundsRecord]) -> usize {
    snapshot
        .iter()
        .map(|r| r.shape().map(canonical_bits).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

// -0.0 and 0.0 describe the same box edge.
fn canonical_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}
