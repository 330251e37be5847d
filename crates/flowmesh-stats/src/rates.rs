//! Pure rate estimation over counter windows.
//!
//! Windows hold monotonically non-decreasing counter snapshots; a rate is
//! the counter delta between the oldest and newest snapshot divided by the
//! elapsed time. None of these functions error: degenerate input degrades
//! to a neutral value so one bad report can never stall the control loop.

use flowmesh_core::Sample;

use crate::window::FixedWindow;

/// How far in the past the synthesized zero-count sample is placed when a
/// window holds a single observation, milliseconds.
pub const VIRTUAL_SAMPLE_BACKOFF_MS: u64 = 2_000;

/// Events per second across the window.
///
/// A single-sample window synthesizes a virtual earlier sample of count
/// zero, [`VIRTUAL_SAMPLE_BACKOFF_MS`] before the real one, so a node's
/// very first report already yields a usable estimate. An empty window or
/// a zero time delta rates to 0.
pub fn rate(window: &FixedWindow<Sample>) -> f64 {
    let Some(last) = window.last() else {
        return 0.0;
    };

    let first = if window.len() == 1 {
        Sample {
            time: last.time.saturating_sub(VIRTUAL_SAMPLE_BACKOFF_MS),
            count: 0,
        }
    } else {
        *window.first().unwrap_or(last)
    };

    let elapsed_ms = last.time.saturating_sub(first.time);
    if elapsed_ms == 0 {
        return 0.0;
    }
    let delta = last.count.saturating_sub(first.count);
    delta as f64 / (elapsed_ms as f64 / 1_000.0)
}

/// `a / b` when both are positive, otherwise 1 (the neutral "keeping up"
/// answer when either side is unknown).
pub fn ratio(a: f64, b: f64) -> f64 {
    if a > 0.0 && b > 0.0 { a / b } else { 1.0 }
}

/// Standard median; 0 for empty input.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}
