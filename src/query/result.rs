//! Query result types

use serde::{Deserialize, Serialize};

use crate::query::request::{Aggregation, Interval};
use crate::types::Labels;

// ============================================================================
// Query Result Types
// ============================================================================

/// Result of one aggregation request
///
/// `data` is always present, possibly empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Queried metric
    pub metric_name: String,
    /// Aggregation applied, `None` for raw results
    pub aggregation: Option<Aggregation>,
    /// Bucket length, `None` for whole-range and raw results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    /// Rows in time order
    pub data: Vec<DataRow>,
}

impl QueryResult {
    /// Empty result for a request
    pub fn empty(
        metric_name: impl Into<String>,
        aggregation: Option<Aggregation>,
        interval: Option<Interval>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            aggregation,
            interval,
            data: Vec::new(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether there are no rows
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Keep only the first `limit` rows
    pub fn truncate(&mut self, limit: Option<usize>) {
        if let Some(limit) = limit {
            self.data.truncate(limit);
        }
    }
}

/// One result row: a raw point or an aggregated window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    /// Point timestamp, or window start (Unix ms)
    pub timestamp: i64,
    /// Point or aggregate value
    pub value: f64,
    /// Series labels; raw rows only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
}

impl DataRow {
    /// Aggregated row
    pub fn aggregate(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            labels: None,
        }
    }

    /// Raw row carrying its series labels
    pub fn raw(timestamp: i64, value: f64, labels: Labels) -> Self {
        Self {
            timestamp,
            value,
            labels: Some(labels),
        }
    }
}
