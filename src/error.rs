//! Error types for the metric store

use std::time::Duration;
use thiserror::Error;

use crate::services::ServiceError;

/// Main error type for the metric store
#[derive(Error, Debug)]
pub enum Error {
    /// Metric definition failed validation (name pattern, type, required fields)
    #[error("Invalid metric definition: {0}")]
    InvalidDefinition(String),

    /// A metric with this name is already registered
    #[error("Metric already exists: {0}")]
    AlreadyExists(String),

    /// Payload could not be parsed into the expected shape
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Ingest batch contained no samples
    #[error("Batch contains no samples")]
    EmptyBatch,

    /// Interval string does not match `<integer><s|m|h|d>`
    #[error("Invalid interval '{0}': expected <integer><s|m|h|d>")]
    InvalidInterval(String),

    /// Aggregation name outside the vocabulary, or not valid for the metric type
    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    /// Query request is inconsistent (interval without aggregation, inverted range, zero limit)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Metric unknown or no series matched
    #[error("Not found: {0}")]
    NotFound(String),

    /// Archive tier is disabled or unreachable
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Query exceeded its time budget
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Ingestion buffer is full
    #[error("Backpressure: {0}")]
    Backpressure(String),

    /// Sample rejected by semantic validation
    ///
    /// Carries the per-sample kinds (too many labels, label value too long,
    /// non-finite value and the timestamp and cardinality checks).
    #[error(transparent)]
    Rejected(#[from] SampleRejection),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Background service failure
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

impl Error {
    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Backpressure(_) | Error::Timeout(_) | Error::Unavailable(_)
        )
    }

    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidDefinition(_) => "INVALID_DEFINITION",
            Error::AlreadyExists(_) => "ALREADY_EXISTS",
            Error::MalformedRequest(_) => "MALFORMED_REQUEST",
            Error::EmptyBatch => "EMPTY_BATCH",
            Error::InvalidInterval(_) => "INVALID_INTERVAL",
            Error::UnsupportedAggregation(_) => "UNSUPPORTED_AGGREGATION",
            Error::InvalidQuery(_) => "INVALID_QUERY",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Unavailable(_) => "UNAVAILABLE",
            Error::Timeout(_) => "TIMEOUT",
            Error::Backpressure(_) => "BACKPRESSURE",
            Error::Rejected(r) => r.code(),
            Error::Configuration(_) => "CONFIGURATION",
            Error::Service(_) => "SERVICE",
        }
    }
}

/// Reasons a sample is dropped on the flush path
///
/// These never reach the submitter; they are counted and logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleRejection {
    /// Label map has more entries than allowed
    #[error("Too many labels: {count} (max {max})")]
    TooManyLabels {
        /// Number of labels on the sample
        count: usize,
        /// Configured maximum
        max: usize,
    },

    /// A label value exceeds the maximum length
    #[error("Label value for '{key}' too long: {length} chars (max {max})")]
    LabelValueTooLong {
        /// Offending label key
        key: String,
        /// Length in characters
        length: usize,
        /// Configured maximum
        max: usize,
    },

    /// Value is NaN or infinite
    #[error("Value must be finite, got {0}")]
    NonFiniteValue(f64),

    /// Timestamp is beyond the allowed clock skew
    #[error("Timestamp {timestamp} is more than {max_skew_ms}ms in the future")]
    TimestampTooFuture {
        /// Sample timestamp (ms)
        timestamp: i64,
        /// Allowed skew (ms)
        max_skew_ms: i64,
    },

    /// Timestamp is older than the oldest accepted sample
    #[error("Timestamp {timestamp} is older than {min_timestamp}")]
    TimestampTooOld {
        /// Sample timestamp (ms)
        timestamp: i64,
        /// Oldest accepted timestamp (ms)
        min_timestamp: i64,
    },

    /// Metric is not registered
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Sample would create a series past the per-metric ceiling
    #[error("Series limit reached for metric '{metric}' (max {max})")]
    SeriesLimitExceeded {
        /// Metric name
        metric: String,
        /// Configured ceiling
        max: usize,
    },
}

impl SampleRejection {
    /// Stable machine-readable code, also used as the drop-counter key
    pub fn code(&self) -> &'static str {
        match self {
            SampleRejection::TooManyLabels { .. } => "TOO_MANY_LABELS",
            SampleRejection::LabelValueTooLong { .. } => "LABEL_VALUE_TOO_LONG",
            SampleRejection::NonFiniteValue(_) => "NON_FINITE_VALUE",
            SampleRejection::TimestampTooFuture { .. } => "TIMESTAMP_TOO_FUTURE",
            SampleRejection::TimestampTooOld { .. } => "TIMESTAMP_TOO_OLD",
            SampleRejection::UnknownMetric(_) => "UNKNOWN_METRIC",
            SampleRejection::SeriesLimitExceeded { .. } => "SERIES_LIMIT_EXCEEDED",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
