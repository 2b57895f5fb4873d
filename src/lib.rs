//! Metric Store - in-memory metric store with asynchronous ingestion
//!
//! This library provides:
//! - A catalog of named GAUGE and COUNTER metrics
//! - Label-identified series with cardinality limits
//! - Buffered ingestion flushed by a background worker
//! - Whole-range and windowed aggregations (SUM, AVG, MIN, MAX, COUNT, Pxx, RATE)
//! - An archive tier that takes over points past each metric's retention
//!
//! # Example
//!
//! ```rust,no_run
//! use metric_store::{AggregationRequest, MetricStore, NewMetric, Sample};
//! use metric_store::query::Aggregation;
//!
//! # async fn example() -> metric_store::Result<()> {
//! let store = MetricStore::builder().build()?;
//! store.start().await?;
//!
//! store.register_metric(NewMetric::gauge("cpu_usage"))?;
//! store.ingest(vec![Sample::new("cpu_usage", 42.0, 1_700_000_000_000, Default::default())])?;
//! store.flush().await?;
//!
//! let result = store
//!     .query(AggregationRequest::new("cpu_usage").with_aggregation(Aggregation::Avg))
//!     .await?;
//! println!("{:?}", result.data);
//!
//! store.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod types;

/// Configuration management with TOML support
pub mod config;

/// Metric definitions and series identity
pub mod catalog;

/// Label count, label length and series-per-metric limits
pub mod cardinality;

/// Hot tier: per-series ordered point storage
pub mod storage;

/// Buffered ingestion with backpressure and parallel flush
pub mod ingestion;

/// Aggregation queries over the hot and archive tiers
pub mod query;

/// Cold tier and the retention-driven migrator
pub mod archive;

/// Background services with lifecycle management and graceful shutdown
pub mod services;

/// Store assembly
pub mod engine;

// Re-export main types
pub use catalog::{MetricDefinition, NewMetric};
pub use config::Config;
pub use engine::{MetricStore, MetricStoreBuilder};
pub use error::{Error, Result, SampleRejection};
pub use query::{AggregationRequest, QueryResult};
pub use types::{DataPoint, Labels, MetricType, Sample, SeriesKey, TimeRange};
