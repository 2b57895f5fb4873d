//! Core data types used throughout the metric store
//!
//! # Key Types
//!
//! - **`MetricType`**: GAUGE or COUNTER
//! - **`Sample`**: One submitted measurement (metric name, value, timestamp, labels)
//! - **`DataPoint`**: A stored point (timestamp + value + counter-reset flag)
//! - **`SeriesKey`**: Deterministic identity of (metric name, label set)
//! - **`TimeRange`**: Inclusive time window for scans and queries
//!
//! # Example
//!
//! ```rust
//! use metric_store::types::{identify_series, Labels, TimeRange};
//!
//! let mut a = Labels::new();
//! a.insert("host".to_string(), "web1".to_string());
//! a.insert("dc".to_string(), "eu".to_string());
//!
//! let mut b = Labels::new();
//! b.insert("dc".to_string(), "eu".to_string());
//! b.insert("host".to_string(), "web1".to_string());
//!
//! assert_eq!(identify_series("cpu", &a), identify_series("cpu", &b));
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1500));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Label set of a sample or series
///
/// A `BTreeMap` keeps keys sorted, so hashing and serialization are
/// independent of submission order.
pub type Labels = BTreeMap<String, String>;

/// Kind of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricType {
    /// Point-in-time reading that may go up or down
    Gauge,
    /// Monotonically increasing total; drops are counter resets
    Counter,
}

impl MetricType {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "GAUGE",
            MetricType::Counter => "COUNTER",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GAUGE" => Ok(MetricType::Gauge),
            "COUNTER" => Ok(MetricType::Counter),
            other => Err(Error::InvalidDefinition(format!(
                "type must be GAUGE or COUNTER, got '{}'",
                other
            ))),
        }
    }
}

/// A measurement as submitted for ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Name of the registered metric
    pub metric_name: String,
    /// Measured value
    pub value: f64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Series labels
    #[serde(default)]
    pub labels: Labels,
}

impl Sample {
    /// Create a sample
    pub fn new(metric_name: impl Into<String>, value: f64, timestamp: i64, labels: Labels) -> Self {
        Self {
            metric_name: metric_name.into(),
            value,
            timestamp,
            labels,
        }
    }

    /// Series identity of this sample
    pub fn series_key(&self) -> SeriesKey {
        identify_series(&self.metric_name, &self.labels)
    }
}

/// A stored point within a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Value
    pub value: f64,
    /// COUNTER only: value dropped below its predecessor
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reset: bool,
}

impl DataPoint {
    /// Create a point with no reset flag
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            reset: false,
        }
    }
}

/// Identity of a series: hash of metric name and sorted label set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey(pub u64);

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Compute the series key for a metric name and label set
///
/// Labels are hashed in key order, so the same logical label set always
/// yields the same key no matter how it was assembled.
pub fn identify_series(metric_name: &str, labels: &Labels) -> SeriesKey {
    let mut hasher = DefaultHasher::new();
    metric_name.hash(&mut hasher);
    labels.len().hash(&mut hasher);
    for (key, value) in labels {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    SeriesKey(hasher.finish())
}

/// Superset label match: every filter pair must be present with an equal value
pub fn labels_match(series_labels: &Labels, filter: &Labels) -> bool {
    filter
        .iter()
        .all(|(k, v)| series_labels.get(k).is_some_and(|sv| sv == v))
}

/// Inclusive time range in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: i64,
    /// End timestamp (inclusive)
    pub end: i64,
}

impl TimeRange {
    /// Create a time range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidQuery(format!(
                "start time {} is after end time {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Range covering every representable timestamp
    pub fn unbounded() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    /// Range from optional bounds; missing bounds are open
    pub fn from_bounds(start: Option<i64>, end: Option<i64>) -> Result<Self> {
        Self::new(start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX))
    }

    /// Check if timestamp is within range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    /// Whether any part of the range lies before `boundary`
    pub fn starts_before(&self, boundary: i64) -> bool {
        self.start < boundary
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::unbounded()
    }
}
