//! Metric definitions and registration-time validation

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::MetricType;

/// Maximum metric name length in characters
pub const MAX_METRIC_NAME_LENGTH: usize = 255;

lazy_static! {
    /// Metric names start with a lowercase letter and continue with [a-z0-9_]
    static ref METRIC_NAME_PATTERN: Regex =
        Regex::new(r"^[a-z][a-z0-9_]*$").expect("metric name pattern compiles");
}

/// A registered metric
///
/// Immutable once registered. Serialized in camelCase because the same
/// shape is returned over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    /// Identifier assigned at registration
    pub id: Uuid,
    /// Unique metric name
    pub name: String,
    /// GAUGE or COUNTER
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    /// Free-form description
    pub description: String,
    /// Unit of measurement
    pub unit: String,
    /// Declared label keys, documentation only
    #[serde(rename = "labels")]
    pub label_names: Vec<String>,
    /// Length of the hot window in days
    pub retention_days: u32,
    /// Registration time (Unix ms)
    pub created_at: i64,
}

impl MetricDefinition {
    /// Whether this metric is a COUNTER
    pub fn is_counter(&self) -> bool {
        self.metric_type == MetricType::Counter
    }
}

/// Registration request
///
/// Fields are optional so that missing `name`/`type` surface as
/// `InvalidDefinition` instead of a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMetric {
    /// Metric name
    pub name: Option<String>,
    /// Metric type, case-insensitive GAUGE or COUNTER
    #[serde(rename = "type")]
    pub metric_type: Option<String>,
    /// Description
    #[serde(default)]
    pub description: Option<String>,
    /// Unit
    #[serde(default)]
    pub unit: Option<String>,
    /// Declared label keys
    #[serde(default, rename = "labels")]
    pub label_names: Vec<String>,
    /// Hot-window length in days; the catalog default applies when absent
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl NewMetric {
    /// Start a registration request
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: Some(name.into()),
            metric_type: Some(metric_type.as_str().to_string()),
            ..Self::default()
        }
    }

    /// GAUGE registration request
    pub fn gauge(name: impl Into<String>) -> Self {
        Self::new(name, MetricType::Gauge)
    }

    /// COUNTER registration request
    pub fn counter(name: impl Into<String>) -> Self {
        Self::new(name, MetricType::Counter)
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set unit
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set declared label keys
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set hot-window length
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// The requested name, checked against the naming rules
    pub(crate) fn validated_name(&self) -> Result<&str> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| Error::InvalidDefinition("name is required".to_string()))?;
        validate_metric_name(name)?;
        Ok(name)
    }

    /// Validate and turn into a definition
    pub(crate) fn into_definition(
        self,
        default_retention_days: u32,
        created_at: i64,
    ) -> Result<MetricDefinition> {
        let name = self.validated_name()?.to_string();

        let metric_type = self
            .metric_type
            .ok_or_else(|| Error::InvalidDefinition("type is required".to_string()))?
            .parse::<MetricType>()?;

        let retention_days = self.retention_days.unwrap_or(default_retention_days);
        if retention_days == 0 {
            return Err(Error::InvalidDefinition(
                "retentionDays must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for label in &self.label_names {
            if label.is_empty() {
                return Err(Error::InvalidDefinition(
                    "label names must not be empty".to_string(),
                ));
            }
            if !seen.insert(label.as_str()) {
                return Err(Error::InvalidDefinition(format!(
                    "duplicate label name '{}'",
                    label
                )));
            }
        }

        Ok(MetricDefinition {
            id: Uuid::new_v4(),
            name,
            metric_type,
            description: self.description.unwrap_or_default(),
            unit: self.unit.unwrap_or_default(),
            label_names: self.label_names,
            retention_days,
            created_at,
        })
    }
}

/// Check a metric name against the length limit and `[a-z][a-z0-9_]*`
pub fn validate_metric_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidDefinition("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_METRIC_NAME_LENGTH {
        return Err(Error::InvalidDefinition(format!(
            "name exceeds {} characters",
            MAX_METRIC_NAME_LENGTH
        )));
    }
    if !METRIC_NAME_PATTERN.is_match(name) {
        return Err(Error::InvalidDefinition(format!(
            "name '{}' must match [a-z][a-z0-9_]*",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert!(validate_metric_name("cpu_usage").is_ok());
        assert!(validate_metric_name("a").is_ok());
        assert!(validate_metric_name("http_requests_total_2").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "123-invalid-name!@#", "Cpu", "_cpu", "cpu-usage", "cpu usage"] {
            assert!(
                matches!(validate_metric_name(name), Err(Error::InvalidDefinition(_))),
                "{name} should be rejected"
            );
        }
        assert!(validate_metric_name(&"a".repeat(255)).is_ok());
        assert!(validate_metric_name(&"a".repeat(300)).is_err());
    }

    #[test]
    fn test_missing_fields() {
        let missing_type = NewMetric {
            name: Some("cpu".to_string()),
            ..NewMetric::default()
        };
        assert!(matches!(
            missing_type.into_definition(30, 0),
            Err(Error::InvalidDefinition(_))
        ));

        let missing_name = NewMetric {
            metric_type: Some("GAUGE".to_string()),
            ..NewMetric::default()
        };
        assert!(missing_name.into_definition(30, 0).is_err());
    }

    #[test]
    fn test_defaults_and_labels() {
        let def = NewMetric::counter("requests_total")
            .with_labels(["endpoint", "status_code"])
            .into_definition(30, 42)
            .unwrap();
        assert_eq!(def.retention_days, 30);
        assert_eq!(def.created_at, 42);
        assert!(def.is_counter());
        assert_eq!(def.description, "");

        let dup = NewMetric::gauge("temp").with_labels(["a", "a"]);
        assert!(dup.into_definition(30, 0).is_err());

        let zero = NewMetric::gauge("temp").with_retention_days(0);
        assert!(zero.into_definition(30, 0).is_err());
    }

    #[test]
    fn test_definition_json_shape() {
        let def = NewMetric::gauge("temperature")
            .with_unit("celsius")
            .into_definition(7, 0)
            .unwrap();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "GAUGE");
        assert_eq!(json["retentionDays"], 7);
        assert_eq!(json["unit"], "celsius");
    }
}
