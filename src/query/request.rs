//! Aggregation request, aggregation vocabulary and interval grammar

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{Labels, TimeRange};

// =============================================================================
// Aggregation
// =============================================================================

/// Aggregation verbs accepted by the query engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Aggregation {
    /// Sum of values
    Sum,
    /// Arithmetic mean
    Avg,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Number of points
    Count,
    /// Nearest-rank percentile; one of 50, 75, 90, 95, 99
    Percentile(u8),
    /// Per-second rate of increase (COUNTER only)
    Rate,
}

/// Percentiles in the vocabulary
pub const SUPPORTED_PERCENTILES: [u8; 5] = [50, 75, 90, 95, 99];

impl Aggregation {
    /// Every supported aggregation
    pub fn all() -> Vec<Aggregation> {
        let mut all = vec![
            Aggregation::Sum,
            Aggregation::Avg,
            Aggregation::Min,
            Aggregation::Max,
            Aggregation::Count,
        ];
        all.extend(SUPPORTED_PERCENTILES.iter().map(|p| Aggregation::Percentile(*p)));
        all.push(Aggregation::Rate);
        all
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Sum => f.write_str("SUM"),
            Aggregation::Avg => f.write_str("AVG"),
            Aggregation::Min => f.write_str("MIN"),
            Aggregation::Max => f.write_str("MAX"),
            Aggregation::Count => f.write_str("COUNT"),
            Aggregation::Percentile(p) => write!(f, "P{}", p),
            Aggregation::Rate => f.write_str("RATE"),
        }
    }
}

impl FromStr for Aggregation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let agg = match upper.as_str() {
            "SUM" => Aggregation::Sum,
            "AVG" => Aggregation::Avg,
            "MIN" => Aggregation::Min,
            "MAX" => Aggregation::Max,
            "COUNT" => Aggregation::Count,
            "RATE" => Aggregation::Rate,
            other => other
                .strip_prefix('P')
                .and_then(|p| p.parse::<u8>().ok())
                .filter(|p| SUPPORTED_PERCENTILES.contains(p))
                .map(Aggregation::Percentile)
                .ok_or_else(|| {
                    Error::UnsupportedAggregation(format!(
                        "'{}' is not one of SUM, AVG, MIN, MAX, COUNT, \
                         P50, P75, P90, P95, P99, RATE",
                        s
                    ))
                })?,
        };
        Ok(agg)
    }
}

impl TryFrom<String> for Aggregation {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Aggregation> for String {
    fn from(agg: Aggregation) -> Self {
        agg.to_string()
    }
}

// =============================================================================
// Interval
// =============================================================================

/// Bucket length parsed from `<integer><s|m|h|d>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    millis: i64,
}

impl Interval {
    /// Interval from a positive number of milliseconds
    pub fn from_millis(millis: i64) -> Result<Self> {
        if millis <= 0 {
            return Err(Error::InvalidInterval(format!("{}ms", millis)));
        }
        Ok(Self { millis })
    }

    /// Length in milliseconds
    pub fn as_millis(&self) -> i64 {
        self.millis
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInterval(s.to_string());

        let unit = s.chars().last().ok_or_else(invalid)?;
        let digits = &s[..s.len() - unit.len_utf8()];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let unit_ms: i64 = match unit {
            's' => 1_000,
            'm' => 60_000,
            'h' => 3_600_000,
            'd' => 86_400_000,
            _ => return Err(invalid()),
        };

        let count: i64 = digits.parse().map_err(|_| invalid())?;
        let millis = count.checked_mul(unit_ms).ok_or_else(invalid)?;
        Self::from_millis(millis).map_err(|_| invalid())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.millis;
        if ms % 86_400_000 == 0 {
            write!(f, "{}d", ms / 86_400_000)
        } else if ms % 3_600_000 == 0 {
            write!(f, "{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 {
            write!(f, "{}m", ms / 60_000)
        } else if ms % 1_000 == 0 {
            write!(f, "{}s", ms / 1_000)
        } else {
            write!(f, "{}ms", ms)
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

// =============================================================================
// Request
// =============================================================================

/// A query over one metric
///
/// Without an aggregation the raw points are returned. With an aggregation
/// and no interval, one row covers the whole range; with an interval, one row
/// per non-empty window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    /// Metric to query
    pub metric_name: String,
    /// Aggregation verb
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    /// Inclusive start (Unix ms); open when absent
    #[serde(default)]
    pub start_time: Option<i64>,
    /// Inclusive end (Unix ms); open when absent
    #[serde(default)]
    pub end_time: Option<i64>,
    /// Bucket length
    #[serde(default)]
    pub interval: Option<Interval>,
    /// Superset label filter
    #[serde(default)]
    pub labels: Option<Labels>,
    /// Maximum rows returned
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AggregationRequest {
    /// Raw query over all data of a metric
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            metric_name: metric_name.into(),
            aggregation: None,
            start_time: None,
            end_time: None,
            interval: None,
            labels: None,
            limit: None,
        }
    }

    /// Set the aggregation
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Set both range bounds
    pub fn with_range(mut self, start: i64, end: i64) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Set the bucket interval
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Set the label filter
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Cap the number of rows
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requested range with open bounds filled in
    pub fn time_range(&self) -> Result<TimeRange> {
        TimeRange::from_bounds(self.start_time, self.end_time)
    }

    /// Label filter, `None` when absent or empty
    pub fn label_filter(&self) -> Option<&Labels> {
        self.labels.as_ref().filter(|l| !l.is_empty())
    }

    /// Shape checks that need no catalog or data
    pub fn validate(&self) -> Result<()> {
        if self.metric_name.is_empty() {
            return Err(Error::InvalidQuery("metricName is required".to_string()));
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidQuery("limit must be at least 1".to_string()));
        }
        if self.interval.is_some() && self.aggregation.is_none() {
            return Err(Error::InvalidQuery(
                "interval requires an aggregation".to_string(),
            ));
        }
        self.time_range()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aggregations() {
        assert_eq!("sum".parse::<Aggregation>().unwrap(), Aggregation::Sum);
        assert_eq!("P95".parse::<Aggregation>().unwrap(), Aggregation::Percentile(95));
        assert_eq!("rate".parse::<Aggregation>().unwrap(), Aggregation::Rate);
        for bad in ["P42", "MEDIAN", "", "P", "P500"] {
            assert!(matches!(
                bad.parse::<Aggregation>(),
                Err(Error::UnsupportedAggregation(_))
            ));
        }
        for agg in Aggregation::all() {
            assert_eq!(agg.to_string().parse::<Aggregation>().unwrap(), agg);
        }
    }

    #[test]
    fn test_parse_intervals() {
        assert_eq!("30s".parse::<Interval>().unwrap().as_millis(), 30_000);
        assert_eq!("15m".parse::<Interval>().unwrap().as_millis(), 900_000);
        assert_eq!("2h".parse::<Interval>().unwrap().as_millis(), 7_200_000);
        assert_eq!("1d".parse::<Interval>().unwrap().as_millis(), 86_400_000);
        assert_eq!("15m".parse::<Interval>().unwrap().to_string(), "15m");
    }

    #[test]
    fn test_reject_invalid_intervals() {
        let cases = [
            "invalid",
            "",
            "m",
            "5",
            "5w",
            "-5m",
            "0s",
            "1.5h",
            " 5m",
            "5M",
            "99999999999999999d",
        ];
        for bad in cases {
            assert!(
                matches!(bad.parse::<Interval>(), Err(Error::InvalidInterval(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_request_json() {
        let req: AggregationRequest = serde_json::from_str(
            r#"{"metricName":"cpu","aggregation":"P90","interval":"5m","limit":3}"#,
        )
        .unwrap();
        assert_eq!(req.aggregation, Some(Aggregation::Percentile(90)));
        assert_eq!(req.interval.unwrap().as_millis(), 300_000);
        assert!(req.validate().is_ok());

        let bad = serde_json::from_str::<AggregationRequest>(
            r#"{"metricName":"cpu","interval":"invalid"}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_request_validation() {
        assert!(AggregationRequest::new("cpu").with_limit(0).validate().is_err());
        assert!(AggregationRequest::new("cpu").with_range(10, 5).validate().is_err());
        assert!(AggregationRequest::new("cpu")
            .with_interval("1m".parse().unwrap())
            .validate()
            .is_err());
        assert!(AggregationRequest::new("cpu")
            .with_labels(Labels::new())
            .label_filter()
            .is_none());
    }
}
