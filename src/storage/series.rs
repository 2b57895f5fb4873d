//! In-memory series with timestamp-ordered points
//!
//! Points are kept in a `Vec` sorted by timestamp. Equal timestamps are all
//! retained, in insertion order. COUNTER series flag each point whose value is
//! lower than its immediate predecessor as a reset.

use serde::Serialize;

use crate::types::{DataPoint, Labels, SeriesKey, TimeRange};

/// Identity of a series without its points
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesInfo {
    /// Series key
    pub key: SeriesKey,
    /// Owning metric
    pub metric: String,
    /// Label set
    pub labels: Labels,
    /// COUNTER series track resets
    pub is_counter: bool,
}

/// Point-in-time copy of a series' points within a range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    /// Series key
    pub key: SeriesKey,
    /// Label set
    pub labels: Labels,
    /// Points ordered by timestamp
    pub points: Vec<DataPoint>,
}

/// A live series
#[derive(Debug)]
pub struct Series {
    info: SeriesInfo,
    points: Vec<DataPoint>,
}

impl Series {
    /// Create an empty series
    pub fn new(info: SeriesInfo) -> Self {
        Self {
            info,
            points: Vec::new(),
        }
    }

    /// Series identity
    pub fn info(&self) -> &SeriesInfo {
        &self.info
    }

    /// Insert a point keeping timestamp order
    ///
    /// Returns whether the point was flagged as a counter reset.
    pub fn insert(&mut self, timestamp: i64, value: f64) -> bool {
        // Fast path: in-order append
        let idx = match self.points.last() {
            Some(last) if last.timestamp > timestamp => {
                self.points.partition_point(|p| p.timestamp <= timestamp)
            },
            _ => self.points.len(),
        };

        let reset = self.info.is_counter && idx > 0 && value < self.points[idx - 1].value;
        self.points.insert(
            idx,
            DataPoint {
                timestamp,
                value,
                reset,
            },
        );

        // An out-of-order insert changes the successor's predecessor
        if self.info.is_counter {
            if let Some(next) = self.points.get_mut(idx + 1) {
                next.reset = next.value < value;
            }
        }

        reset
    }

    /// Copy of the points within `range`
    pub fn range(&self, range: &TimeRange) -> Vec<DataPoint> {
        let lo = self.points.partition_point(|p| p.timestamp < range.start);
        let hi = self.points.partition_point(|p| p.timestamp <= range.end);
        if lo >= hi {
            return Vec::new();
        }
        self.points[lo..hi].to_vec()
    }

    /// Number of points strictly older than `cutoff`
    pub fn count_before(&self, cutoff: i64) -> usize {
        self.points.partition_point(|p| p.timestamp < cutoff)
    }

    /// Points strictly older than `cutoff`, without removing them
    pub fn peek_before(&self, cutoff: i64) -> &[DataPoint] {
        &self.points[..self.count_before(cutoff)]
    }

    /// Remove the first `count` points
    pub fn truncate_front(&mut self, count: usize) {
        let count = count.min(self.points.len());
        self.points.drain(..count);
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series holds no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
