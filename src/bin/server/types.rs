//! Request and Response Types for the Metric Store HTTP Server
//!
//! This module contains the wire types of the HTTP API and the conversions
//! from wire shapes into library requests.

use chrono::{DateTime, NaiveDateTime};
use metric_store::query::{Aggregation, Interval};
use metric_store::services::ServiceStatus;
use metric_store::{AggregationRequest, Error, Labels, Result, Sample};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Timestamps
// =============================================================================

/// Timestamp as it may arrive on the wire
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    /// Unix milliseconds
    Millis(i64),
    /// RFC 3339, naive ISO-8601 (UTC) or a decimal millisecond string
    Text(String),
}

/// Naive formats read as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a wire timestamp into Unix milliseconds
pub fn parse_timestamp(ts: &WireTimestamp) -> Result<i64> {
    let text = match ts {
        WireTimestamp::Millis(ms) => return Ok(*ms),
        WireTimestamp::Text(text) => text.trim(),
    };

    if let Ok(ms) = text.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }

    Err(Error::MalformedRequest(format!("unrecognized timestamp '{}'", text)))
}

fn parse_optional(ts: Option<&WireTimestamp>) -> Result<Option<i64>> {
    ts.map(parse_timestamp).transpose()
}

// =============================================================================
// Ingest API Types
// =============================================================================

/// Ingest request body
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    /// Samples to ingest
    pub metrics: Vec<IngestSample>,
}

/// Single sample in an ingest request
///
/// Unknown fields such as `type` are ignored.
#[derive(Debug, Deserialize)]
pub struct IngestSample {
    /// Metric name
    pub name: String,
    /// Sample value
    pub value: f64,
    /// Sample time; the server's clock when absent
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    /// Label set
    #[serde(default)]
    pub labels: Labels,
}

impl IngestRequest {
    /// Convert into samples, stamping missing timestamps with `now`
    pub fn into_samples(self, now: i64) -> Result<Vec<Sample>> {
        self.metrics
            .into_iter()
            .map(|s| {
                let timestamp = parse_optional(s.timestamp.as_ref())?.unwrap_or(now);
                Ok(Sample::new(s.name, s.value, timestamp, s.labels))
            })
            .collect()
    }
}

/// Ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Always "accepted"
    pub status: &'static str,
    /// Samples admitted
    pub accepted: usize,
    /// Samples waiting for the next flush
    pub buffered: usize,
}

// =============================================================================
// Query API Types
// =============================================================================

/// Query request body
///
/// Kept loose so that aggregation and interval errors surface with their
/// own codes instead of a generic parse failure.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Metric to query
    #[serde(default)]
    pub metric_name: String,
    /// Aggregation name
    #[serde(default)]
    pub aggregation: Option<String>,
    /// Inclusive start
    #[serde(default)]
    pub start_time: Option<WireTimestamp>,
    /// Inclusive end
    #[serde(default)]
    pub end_time: Option<WireTimestamp>,
    /// Bucket length such as `5m`
    #[serde(default)]
    pub interval: Option<String>,
    /// Label filter
    #[serde(default)]
    pub labels: Option<Labels>,
    /// Row cap
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TryFrom<QueryRequest> for AggregationRequest {
    type Error = Error;

    fn try_from(req: QueryRequest) -> Result<Self> {
        let aggregation = req
            .aggregation
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .map(str::parse::<Aggregation>)
            .transpose()?;
        let interval = req
            .interval
            .as_deref()
            .filter(|i| !i.trim().is_empty())
            .map(|i| i.trim().parse::<Interval>())
            .transpose()?;

        Ok(AggregationRequest {
            metric_name: req.metric_name,
            aggregation,
            start_time: parse_optional(req.start_time.as_ref())?,
            end_time: parse_optional(req.end_time.as_ref())?,
            interval,
            labels: req.labels,
            limit: req.limit,
        })
    }
}

// =============================================================================
// Archive API Types
// =============================================================================

/// Query string of `GET /archive/query`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveQueryParams {
    /// Metric UUID or name
    pub metric_id: String,
    /// Inclusive start
    #[serde(default)]
    pub start_time: Option<String>,
    /// Inclusive end
    #[serde(default)]
    pub end_time: Option<String>,
}

impl ArchiveQueryParams {
    /// Parsed bounds
    pub fn bounds(&self) -> Result<(Option<i64>, Option<i64>)> {
        let parse = |s: &Option<String>| {
            s.as_ref()
                .map(|text| parse_timestamp(&WireTimestamp::Text(text.clone())))
                .transpose()
        };
        Ok((parse(&self.start_time)?, parse(&self.end_time)?))
    }
}

// =============================================================================
// Health and Error Types
// =============================================================================

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "UP" or "DOWN"
    pub status: &'static str,
    /// Background service states
    pub services: BTreeMap<&'static str, ServiceStatus>,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message
    pub error: String,
    /// Machine-readable kind
    pub code: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = 1_700_000_000_000;
        let forms = [
            WireTimestamp::Millis(expected),
            WireTimestamp::Text("1700000000000".to_string()),
            WireTimestamp::Text("2023-11-14T22:13:20Z".to_string()),
            WireTimestamp::Text("2023-11-14T22:13:20+00:00".to_string()),
            WireTimestamp::Text("2023-11-15T00:13:20.000+02:00".to_string()),
            WireTimestamp::Text("2023-11-14T22:13:20".to_string()),
            WireTimestamp::Text("2023-11-14T22:13:20.000".to_string()),
            WireTimestamp::Text("2023-11-14 22:13:20".to_string()),
        ];
        for ts in &forms {
            assert_eq!(parse_timestamp(ts).unwrap(), expected, "{:?}", ts);
        }
    }

    #[test]
    fn test_parse_timestamp_garbage() {
        let err = parse_timestamp(&WireTimestamp::Text("yesterday".to_string())).unwrap_err();
        assert!(matches!(err, Error::MalformedRequest(_)));
    }

    #[test]
    fn test_ingest_request_ignores_type_field() {
        let body = r#"{"metrics":[
            {"name":"cpu","value":1.5,"timestamp":"2023-11-14T22:13:20Z","labels":{"host":"a"},"type":"GAUGE"},
            {"name":"cpu","value":2.0}
        ]}"#;
        let req: IngestRequest = serde_json::from_str(body).unwrap();
        let samples = req.into_samples(42).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp, 1_700_000_000_000);
        assert_eq!(samples[0].labels["host"], "a");
        assert_eq!(samples[1].timestamp, 42);
    }

    #[test]
    fn test_query_request_conversion() {
        let body = r#"{"metricName":"cpu","aggregation":"p95","interval":"5m",
            "startTime":"2023-11-14T22:13:20Z","endTime":1700000600000}"#;
        let req: QueryRequest = serde_json::from_str(body).unwrap();
        let req = AggregationRequest::try_from(req).unwrap();
        assert_eq!(req.aggregation, Some(Aggregation::Percentile(95)));
        assert_eq!(req.interval.map(|i| i.as_millis()), Some(300_000));
        assert_eq!(req.start_time, Some(1_700_000_000_000));
        assert_eq!(req.end_time, Some(1_700_000_600_000));
    }

    #[test]
    fn test_query_request_errors() {
        let bad_agg: QueryRequest =
            serde_json::from_str(r#"{"metricName":"cpu","aggregation":"MEDIAN"}"#).unwrap();
        assert!(matches!(
            AggregationRequest::try_from(bad_agg),
            Err(Error::UnsupportedAggregation(_))
        ));

        let bad_interval: QueryRequest = serde_json::from_str(
            r#"{"metricName":"cpu","aggregation":"SUM","interval":"5 minutes"}"#,
        )
        .unwrap();
        assert!(matches!(
            AggregationRequest::try_from(bad_interval),
            Err(Error::InvalidInterval(_))
        ));
    }
}
