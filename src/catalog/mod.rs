//! Series catalog: metric definitions and series identity

mod definition;
mod registry;

pub use definition::{validate_metric_name, MetricDefinition, NewMetric, MAX_METRIC_NAME_LENGTH};
pub use registry::MetricCatalog;
