//! Property tests for series identity and aggregation functions
//!
//! Uses proptest to check invariants that must hold for any input:
//! series keys ignore label insertion order, nearest-rank stays in bounds,
//! percentiles return an observed value and rate never goes negative.

use proptest::prelude::*;

use metric_store::query::functions::{nearest_rank, percentile, rate_with_resets, sum};
use metric_store::types::identify_series;
use metric_store::{DataPoint, Labels};

// =============================================================================
// Test Data Strategies
// =============================================================================

/// Values a sample may legally carry
fn finite_f64() -> impl Strategy<Value = f64> {
    prop_oneof![
        (-1e9..1e9f64),
        (-1.0..1.0f64),
        Just(0.0),
        (-1000i32..1000).prop_map(|i| i as f64),
    ]
}

/// Distinct label pairs with keys drawn from the label grammar
fn label_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z][a-z0-9_]{0,8}", "[a-zA-Z0-9._-]{0,12}", 0..8)
        .prop_map(|m| m.into_iter().collect())
}

/// Counter points with strictly increasing timestamps and non-negative values
fn counter_points() -> impl Strategy<Value = Vec<DataPoint>> {
    prop::collection::vec((1i64..60_000, 0.0..1e6f64), 2..50).prop_map(|steps| {
        let mut ts = 1_700_000_000_000i64;
        steps
            .into_iter()
            .map(|(delta, value)| {
                ts += delta;
                DataPoint::new(ts, value)
            })
            .collect()
    })
}

// =============================================================================
// Series Identity
// =============================================================================

proptest! {
    /// The same label set yields the same key whatever order it was built in
    #[test]
    fn series_key_ignores_label_order(
        pairs in label_pairs(),
        seed in any::<u64>()
    ) {
        let forward: Labels = pairs.iter().cloned().collect();

        // Deterministic shuffle driven by the seed
        let mut shuffled = pairs.clone();
        let mut state = seed;
        for i in (1..shuffled.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }
        let backward: Labels = shuffled.into_iter().collect();

        prop_assert_eq!(
            identify_series("cpu_usage", &forward),
            identify_series("cpu_usage", &backward)
        );
    }

    /// Different metric names never share a key for the same labels
    #[test]
    fn series_key_depends_on_metric_name(pairs in label_pairs()) {
        let labels: Labels = pairs.into_iter().collect();
        prop_assert_ne!(
            identify_series("disk_read", &labels),
            identify_series("disk_write", &labels)
        );
    }
}

// =============================================================================
// Percentiles
// =============================================================================

proptest! {
    /// Nearest rank is always a valid 1-indexed position
    #[test]
    fn nearest_rank_in_bounds(p in 1u8..=100, n in 1usize..10_000) {
        let rank = nearest_rank(p, n);
        prop_assert!(rank >= 1 && rank <= n, "rank {} out of [1, {}]", rank, n);
    }

    /// Nearest rank never decreases as the percentile grows
    #[test]
    fn nearest_rank_is_monotonic(p in 1u8..100, n in 1usize..10_000) {
        prop_assert!(nearest_rank(p, n) <= nearest_rank(p + 1, n));
    }

    /// A percentile is always one of the observed values
    #[test]
    fn percentile_returns_observed_value(
        values in prop::collection::vec(finite_f64(), 1..200),
        p in 1u8..=100
    ) {
        let result = percentile(&values, p).unwrap();
        prop_assert!(values.contains(&result));
    }

    /// The 100th percentile is the maximum
    #[test]
    fn p100_is_max(values in prop::collection::vec(finite_f64(), 1..200)) {
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(percentile(&values, 100), Some(max));
    }
}

// =============================================================================
// Sum and Rate
// =============================================================================

proptest! {
    /// Compensated sum of small integers is exact
    #[test]
    fn sum_of_integers_is_exact(values in prop::collection::vec(-1000i32..1000, 1..500)) {
        let floats: Vec<f64> = values.iter().map(|&v| v as f64).collect();
        let expected: i64 = values.iter().map(|&v| i64::from(v)).sum();
        prop_assert_eq!(sum(&floats), Some(expected as f64));
    }

    /// Counter resets never make the rate negative
    #[test]
    fn rate_is_non_negative(points in counter_points()) {
        let rate = rate_with_resets(&points).unwrap();
        prop_assert!(rate >= 0.0, "negative rate {}", rate);
    }

    /// A monotonic counter's rate is its net increase over the elapsed time
    #[test]
    fn monotonic_rate_matches_net_increase(points in counter_points()) {
        let mut monotonic = points.clone();
        let mut running = 0.0;
        for p in monotonic.iter_mut() {
            running += p.value;
            p.value = running;
        }

        let first = monotonic[0];
        let last = monotonic[monotonic.len() - 1];
        let elapsed_secs = (last.timestamp - first.timestamp) as f64 / 1000.0;
        let rate = rate_with_resets(&monotonic).unwrap();
        let increase = rate * elapsed_secs;
        prop_assert!((increase - (last.value - first.value)).abs() <= last.value * 1e-9 + 1e-9);
    }
}
