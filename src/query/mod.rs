//! Aggregation queries over the hot store and the archive
//!
//! # Architecture
//!
//! ```text
//! AggregationRequest
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Validate   │  vocabulary, interval grammar, RATE needs COUNTER
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Fetch     │  hot scan, plus archive when the range predates the hot window
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Aggregate  │  whole range, or one row per non-empty window
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Limit     │  first `limit` rows in time order
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use metric_store::query::{Aggregation, AggregationRequest, Interval};
//!
//! let request = AggregationRequest::new("temperature")
//!     .with_aggregation("p95".parse::<Aggregation>().unwrap())
//!     .with_interval("15m".parse::<Interval>().unwrap())
//!     .with_limit(100);
//! assert!(request.validate().is_ok());
//! assert!("15x".parse::<Interval>().is_err());
//! ```

mod engine;
pub mod functions;
mod request;
mod result;

pub use engine::{ExecutionContext, QueryConfig, QueryEngine};
pub use request::{Aggregation, AggregationRequest, Interval, SUPPORTED_PERCENTILES};
pub use result::{DataRow, QueryResult};
