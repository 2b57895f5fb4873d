//! Per-sample semantic checks run at flush time
//!
//! Label limits live in [`crate::cardinality`]; this module covers the value
//! and the timestamp.

use crate::clock::{SharedClock, MILLIS_PER_DAY};
use crate::error::SampleRejection;
use crate::types::Sample;

/// 2000-01-01T00:00:00Z; nothing older is accepted regardless of configuration
pub const MIN_ACCEPTED_TIMESTAMP: i64 = 946_684_800_000;

/// Value and timestamp checks against the current clock
#[derive(Clone)]
pub struct SampleValidator {
    max_future_skew_ms: i64,
    max_sample_age_ms: i64,
    clock: SharedClock,
}

impl SampleValidator {
    /// Create a validator
    pub fn new(max_future_skew_ms: i64, max_sample_age_days: u32, clock: SharedClock) -> Self {
        Self {
            max_future_skew_ms,
            max_sample_age_ms: i64::from(max_sample_age_days).saturating_mul(MILLIS_PER_DAY),
            clock,
        }
    }

    /// Oldest timestamp accepted right now
    pub fn min_timestamp(&self) -> i64 {
        self.clock
            .now_millis()
            .saturating_sub(self.max_sample_age_ms)
            .max(MIN_ACCEPTED_TIMESTAMP)
    }

    /// Check a sample's value and timestamp
    pub fn check(&self, sample: &Sample) -> Result<(), SampleRejection> {
        if !sample.value.is_finite() {
            return Err(SampleRejection::NonFiniteValue(sample.value));
        }

        let now = self.clock.now_millis();
        if sample.timestamp > now.saturating_add(self.max_future_skew_ms) {
            return Err(SampleRejection::TimestampTooFuture {
                timestamp: sample.timestamp,
                max_skew_ms: self.max_future_skew_ms,
            });
        }

        let min_timestamp = self.min_timestamp();
        if sample.timestamp < min_timestamp {
            return Err(SampleRejection::TimestampTooOld {
                timestamp: sample.timestamp,
                min_timestamp,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::Labels;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn validator() -> SampleValidator {
        SampleValidator::new(300_000, 365, Arc::new(ManualClock::new(NOW)))
    }

    fn sample(value: f64, timestamp: i64) -> Sample {
        Sample::new("cpu", value, timestamp, Labels::new())
    }

    #[test]
    fn test_non_finite_values() {
        let v = validator();
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                v.check(&sample(value, NOW)),
                Err(SampleRejection::NonFiniteValue(_))
            ));
        }
        assert!(v.check(&sample(-1.5, NOW)).is_ok());
    }

    #[test]
    fn test_future_skew() {
        let v = validator();
        assert!(v.check(&sample(1.0, NOW + 300_000)).is_ok());
        assert!(matches!(
            v.check(&sample(1.0, NOW + 300_001)),
            Err(SampleRejection::TimestampTooFuture { .. })
        ));
    }

    #[test]
    fn test_too_old() {
        let v = validator();
        let oldest = NOW - 365 * MILLIS_PER_DAY;
        assert!(v.check(&sample(1.0, oldest)).is_ok());
        assert!(matches!(
            v.check(&sample(1.0, oldest - 1)),
            Err(SampleRejection::TimestampTooOld { .. })
        ));
    }

    #[test]
    fn test_floor_applies_with_long_age_limit() {
        let v = SampleValidator::new(0, u32::MAX, Arc::new(ManualClock::new(NOW)));
        assert_eq!(v.min_timestamp(), MIN_ACCEPTED_TIMESTAMP);
        assert!(v.check(&sample(1.0, 0)).is_err());
    }
}
