//! Aggregation functions
//!
//! Each function takes the values (or points) of one window and returns
//! `None` when the window cannot produce a value.

use crate::query::request::Aggregation;
use crate::types::DataPoint;

// ============================================================================
// Basic Aggregations
// ============================================================================

/// Sum using Kahan compensated summation
pub fn sum(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sum = 0.0f64;
    let mut c = 0.0f64;
    for &v in values {
        let y = v - c;
        let t = sum + y;
        c = (t - sum) - y;
        sum = t;
    }
    Some(sum)
}

/// Mean using Welford's running update
pub fn avg(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut mean = 0.0f64;
    for (i, &v) in values.iter().enumerate() {
        mean += (v - mean) / (i + 1) as f64;
    }
    Some(mean)
}

/// Minimum value
pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

/// Maximum value
pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Number of values
pub fn count(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.len() as f64)
    }
}

// ============================================================================
// Percentiles
// ============================================================================

/// 1-indexed nearest rank `ceil(p/100 * n)` clamped to `[1, n]`
pub fn nearest_rank(percentile: u8, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let rank = (u64::from(percentile) * n as u64).div_ceil(100) as usize;
    rank.clamp(1, n)
}

/// Nearest-rank percentile over a stable sort of `values`
pub fn percentile(values: &[f64], percentile: u8) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted[nearest_rank(percentile, sorted.len()) - 1])
}

// ============================================================================
// Counter Functions
// ============================================================================

/// Per-second rate of increase with counter reset handling
///
/// A point flagged as a reset, or lower than its predecessor, contributes
/// its own value instead of a negative delta. Needs at least two points
/// spanning a positive duration.
pub fn rate_with_resets(points: &[DataPoint]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }

    let first = points.first()?;
    let last = points.last()?;
    let elapsed_secs = (last.timestamp - first.timestamp) as f64 / 1000.0;
    if elapsed_secs <= 0.0 {
        return None;
    }

    let mut total_increase = 0.0;
    for pair in points.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if cur.reset || cur.value < prev.value {
            total_increase += cur.value;
        } else {
            total_increase += cur.value - prev.value;
        }
    }

    Some(total_increase / elapsed_secs)
}

// ============================================================================
// Dispatch
// ============================================================================

/// Apply a value aggregation
///
/// `Rate` needs timestamps and is handled by [`rate_with_resets`]; passing
/// it here yields `None`.
pub fn aggregate(aggregation: Aggregation, values: &[f64]) -> Option<f64> {
    match aggregation {
        Aggregation::Sum => sum(values),
        Aggregation::Avg => avg(values),
        Aggregation::Min => min(values),
        Aggregation::Max => max(values),
        Aggregation::Count => count(values),
        Aggregation::Percentile(p) => percentile(values, p),
        Aggregation::Rate => None,
    }
}
