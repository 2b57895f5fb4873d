//! Cardinality guard
//!
//! Per-sample label checks applied on the flush path before anything reaches
//! the store:
//!
//! 1. **Label count**: at most `max_labels` entries per sample
//! 2. **Label value length**: no value longer than `max_label_value_length` chars
//! 3. **Series ceiling**: a metric may not grow past `max_series_per_metric`
//!    distinct series; points for existing series are always accepted
//!
//! The first two checks are pure functions of the sample. The ceiling check
//! takes the metric's current series count from the caller, so the guard
//! itself keeps no per-metric state.
//!
//! # Example
//!
//! ```rust
//! use metric_store::cardinality::{CardinalityConfig, CardinalityGuard};
//! use metric_store::types::Labels;
//!
//! let guard = CardinalityGuard::new(CardinalityConfig::default());
//!
//! let mut labels = Labels::new();
//! labels.insert("host".to_string(), "web1".to_string());
//! assert!(guard.check_labels(&labels).is_ok());
//!
//! let too_many: Labels = (0..11).map(|i| (format!("k{i}"), "v".to_string())).collect();
//! assert!(guard.check_labels(&too_many).is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::SampleRejection;
use crate::types::Labels;

// ============================================================================
// Cardinality Configuration
// ============================================================================

/// Configuration for cardinality control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardinalityConfig {
    /// Maximum number of labels per sample
    #[serde(default = "default_max_labels")]
    pub max_labels: usize,

    /// Maximum label value length in characters
    #[serde(default = "default_max_label_value_length")]
    pub max_label_value_length: usize,

    /// Maximum distinct series per metric
    #[serde(default = "default_max_series_per_metric")]
    pub max_series_per_metric: usize,
}

fn default_max_labels() -> usize {
    10
}
fn default_max_label_value_length() -> usize {
    100
}
fn default_max_series_per_metric() -> usize {
    10_000
}

impl Default for CardinalityConfig {
    fn default() -> Self {
        Self {
            max_labels: default_max_labels(),
            max_label_value_length: default_max_label_value_length(),
            max_series_per_metric: default_max_series_per_metric(),
        }
    }
}

impl CardinalityConfig {
    /// Set max labels per sample
    pub fn with_max_labels(mut self, max: usize) -> Self {
        self.max_labels = max;
        self
    }

    /// Set max label value length
    pub fn with_max_label_value_length(mut self, max: usize) -> Self {
        self.max_label_value_length = max;
        self
    }

    /// Set max series per metric
    pub fn with_max_series_per_metric(mut self, max: usize) -> Self {
        self.max_series_per_metric = max;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_label_value_length == 0 {
            return Err("max_label_value_length must be > 0".to_string());
        }
        if self.max_series_per_metric == 0 {
            return Err("max_series_per_metric must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Cardinality Statistics
// ============================================================================

/// Rejection counts since startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CardinalityStats {
    /// Samples checked
    pub checked: u64,
    /// Rejected for label count
    pub too_many_labels: u64,
    /// Rejected for label value length
    pub label_value_too_long: u64,
    /// Rejected by the series ceiling
    pub series_limit_exceeded: u64,
}

impl fmt::Display for CardinalityStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked={} too_many_labels={} label_value_too_long={} series_limit_exceeded={}",
            self.checked,
            self.too_many_labels,
            self.label_value_too_long,
            self.series_limit_exceeded
        )
    }
}

// ============================================================================
// Cardinality Guard
// ============================================================================

/// Validates sample label sets against cardinality limits
#[derive(Debug)]
pub struct CardinalityGuard {
    config: CardinalityConfig,
    checked: AtomicU64,
    too_many_labels: AtomicU64,
    label_value_too_long: AtomicU64,
    series_limit_exceeded: AtomicU64,
}

impl CardinalityGuard {
    /// Create a guard
    pub fn new(config: CardinalityConfig) -> Self {
        Self {
            config,
            checked: AtomicU64::new(0),
            too_many_labels: AtomicU64::new(0),
            label_value_too_long: AtomicU64::new(0),
            series_limit_exceeded: AtomicU64::new(0),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CardinalityConfig {
        &self.config
    }

    /// Check label count and value lengths
    pub fn check_labels(&self, labels: &Labels) -> Result<(), SampleRejection> {
        self.checked.fetch_add(1, Ordering::Relaxed);

        if labels.len() > self.config.max_labels {
            self.too_many_labels.fetch_add(1, Ordering::Relaxed);
            return Err(SampleRejection::TooManyLabels {
                count: labels.len(),
                max: self.config.max_labels,
            });
        }

        for (key, value) in labels {
            let length = value.chars().count();
            if length > self.config.max_label_value_length {
                self.label_value_too_long.fetch_add(1, Ordering::Relaxed);
                return Err(SampleRejection::LabelValueTooLong {
                    key: key.clone(),
                    length,
                    max: self.config.max_label_value_length,
                });
            }
        }

        Ok(())
    }

    /// Check whether a sample may create a new series
    ///
    /// `current_series` is the number of series the metric already has,
    /// including ones created earlier in the same flush.
    pub fn check_series_ceiling(
        &self,
        metric: &str,
        current_series: usize,
        creates_series: bool,
    ) -> Result<(), SampleRejection> {
        if creates_series && current_series >= self.config.max_series_per_metric {
            self.series_limit_exceeded.fetch_add(1, Ordering::Relaxed);
            return Err(SampleRejection::SeriesLimitExceeded {
                metric: metric.to_string(),
                max: self.config.max_series_per_metric,
            });
        }
        Ok(())
    }

    /// Snapshot of rejection counts
    pub fn stats(&self) -> CardinalityStats {
        CardinalityStats {
            checked: self.checked.load(Ordering::Relaxed),
            too_many_labels: self.too_many_labels.load(Ordering::Relaxed),
            label_value_too_long: self.label_value_too_long.load(Ordering::Relaxed),
            series_limit_exceeded: self.series_limit_exceeded.load(Ordering::Relaxed),
        }
    }
}

impl Default for CardinalityGuard {
    fn default() -> Self {
        Self::new(CardinalityConfig::default())
    }
}
