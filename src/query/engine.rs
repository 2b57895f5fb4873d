//! Query engine
//!
//! Evaluates one [`AggregationRequest`] per call:
//!
//! ```text
//! validate → resolve metric → resolve series → fetch (hot ± cold)
//!          → bucket → aggregate → limit
//! ```
//!
//! Cold data is fetched only when the requested range starts before the
//! metric's hot-window boundary. If the archive is unavailable the query
//! degrades to hot-only results.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::archive::ArchiveTier;
use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::query::functions::{aggregate, rate_with_resets};
use crate::query::request::{Aggregation, AggregationRequest, Interval};
use crate::query::result::{DataRow, QueryResult};
use crate::services::ServiceError;
use crate::storage::{SeriesSnapshot, TimeSeriesStore};
use crate::types::{DataPoint, Labels, SeriesKey, TimeRange};

// ============================================================================
// Configuration
// ============================================================================

/// Query engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Time budget per query in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl QueryConfig {
    /// Set query timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Time budget per query
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.timeout_ms == 0 {
            return Err("query timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Deadline tracking for one query
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext {
    start_time: Instant,
    timeout: Duration,
}

impl ExecutionContext {
    /// Start the clock for a query
    pub fn new(timeout: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            timeout,
        }
    }

    /// Check if query has timed out
    pub fn is_timed_out(&self) -> bool {
        self.start_time.elapsed() > self.timeout
    }

    fn check(&self) -> Result<()> {
        if self.is_timed_out() {
            return Err(Error::Timeout(self.timeout));
        }
        Ok(())
    }
}

// ============================================================================
// Query Engine
// ============================================================================

/// Aggregation engine over the hot store and the archive
#[derive(Clone)]
pub struct QueryEngine {
    catalog: Arc<MetricCatalog>,
    store: Arc<TimeSeriesStore>,
    archive: Arc<ArchiveTier>,
    clock: SharedClock,
    config: QueryConfig,
}

impl QueryEngine {
    /// Create an engine
    pub fn new(
        catalog: Arc<MetricCatalog>,
        store: Arc<TimeSeriesStore>,
        archive: Arc<ArchiveTier>,
        clock: SharedClock,
        config: QueryConfig,
    ) -> Self {
        Self {
            catalog,
            store,
            archive,
            clock,
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Run a query on the blocking pool under the configured time budget
    ///
    /// Fails with [`Error::Timeout`] rather than returning partial results.
    pub async fn query(&self, request: AggregationRequest) -> Result<QueryResult> {
        let timeout = self.config.timeout();
        let engine = self.clone();
        let ctx = ExecutionContext::new(timeout);
        let task = tokio::task::spawn_blocking(move || engine.execute(&request, &ctx));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(Error::Service(ServiceError::RuntimeError(format!(
                "query task failed: {}",
                e
            )))),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    /// Evaluate a query synchronously
    pub fn execute(
        &self,
        request: &AggregationRequest,
        ctx: &ExecutionContext,
    ) -> Result<QueryResult> {
        request.validate()?;
        let def = self.catalog.resolve(&request.metric_name)?;

        if request.aggregation == Some(Aggregation::Rate) && !def.is_counter() {
            return Err(Error::UnsupportedAggregation(format!(
                "RATE requires a COUNTER metric, '{}' is {}",
                def.name, def.metric_type
            )));
        }

        let range = request.time_range()?;
        let filter = request.label_filter().cloned().unwrap_or_default();
        let series = self.fetch(&def, &filter, &range)?;
        ctx.check()?;

        if request.label_filter().is_some() && series.is_empty() {
            return Err(Error::NotFound(format!(
                "no series of '{}' match labels {:?}",
                def.name, filter
            )));
        }

        let mut result = QueryResult::empty(&def.name, request.aggregation, request.interval);
        result.data = match (request.aggregation, request.interval) {
            (None, _) => raw_rows(&series, ctx)?,
            (Some(agg), None) => whole_range(agg, request.start_time, &series),
            (Some(agg), Some(interval)) => {
                bucketed(agg, interval, request.start_time, &series, ctx)?
            },
        };
        result.truncate(request.limit);

        debug!(
            metric = %def.name,
            series = series.len(),
            rows = result.len(),
            "Query evaluated"
        );
        Ok(result)
    }

    /// Matching series with hot and cold points merged, in key order
    fn fetch(
        &self,
        def: &MetricDefinition,
        filter: &Labels,
        range: &TimeRange,
    ) -> Result<Vec<SeriesSnapshot>> {
        let hot = self.store.scan_all(&def.name, filter, range);

        let boundary = self.clock.retention_cutoff(def.retention_days);
        if !range.starts_before(boundary) {
            return Ok(hot);
        }

        let cold = match self.archive.scan_metric(&def.name, filter, range) {
            Ok(cold) => cold,
            Err(Error::Unavailable(reason)) => {
                debug!(metric = %def.name, %reason, "Archive unavailable, serving hot tier only");
                Vec::new()
            },
            Err(e) => return Err(e),
        };

        Ok(merge_tiers(hot, cold))
    }
}

/// Merge cold snapshots into hot ones
///
/// A cold point whose timestamp also exists in the hot tier is dropped.
fn merge_tiers(hot: Vec<SeriesSnapshot>, cold: Vec<SeriesSnapshot>) -> Vec<SeriesSnapshot> {
    let mut merged: BTreeMap<SeriesKey, SeriesSnapshot> =
        hot.into_iter().map(|s| (s.key, s)).collect();

    for cold_series in cold {
        match merged.get_mut(&cold_series.key) {
            Some(hot_series) => {
                let hot_ts: HashSet<i64> = hot_series.points.iter().map(|p| p.timestamp).collect();
                let mut points: Vec<DataPoint> = cold_series
                    .points
                    .into_iter()
                    .filter(|p| !hot_ts.contains(&p.timestamp))
                    .collect();
                points.append(&mut hot_series.points);
                points.sort_by_key(|p| p.timestamp);
                hot_series.points = points;
            },
            None => {
                merged.insert(cold_series.key, cold_series);
            },
        }
    }

    merged.into_values().collect()
}

fn raw_rows(series: &[SeriesSnapshot], ctx: &ExecutionContext) -> Result<Vec<DataRow>> {
    let mut rows = Vec::new();
    for s in series {
        ctx.check()?;
        rows.extend(
            s.points
                .iter()
                .map(|p| DataRow::raw(p.timestamp, p.value, s.labels.clone())),
        );
    }
    // Stable: equal timestamps stay in series key order
    rows.sort_by_key(|r| r.timestamp);
    Ok(rows)
}

fn earliest(series: &[SeriesSnapshot]) -> Option<i64> {
    series
        .iter()
        .filter_map(|s| s.points.first().map(|p| p.timestamp))
        .min()
}

/// Apply `agg` to per-series point slices of one window
fn evaluate(agg: Aggregation, slices: &[&[DataPoint]]) -> Option<f64> {
    match agg {
        Aggregation::Rate => slices
            .iter()
            .filter_map(|points| rate_with_resets(points))
            .reduce(|a, b| a + b),
        _ => {
            let values: Vec<f64> = slices.iter().flat_map(|s| s.iter().map(|p| p.value)).collect();
            aggregate(agg, &values)
        },
    }
}

fn whole_range(
    agg: Aggregation,
    start_time: Option<i64>,
    series: &[SeriesSnapshot],
) -> Vec<DataRow> {
    let Some(origin) = start_time.or_else(|| earliest(series)) else {
        return Vec::new();
    };

    let slices: Vec<&[DataPoint]> = series
        .iter()
        .filter(|s| !s.points.is_empty())
        .map(|s| s.points.as_slice())
        .collect();

    evaluate(agg, &slices)
        .map(|value| vec![DataRow::aggregate(origin, value)])
        .unwrap_or_default()
}

fn bucketed(
    agg: Aggregation,
    interval: Interval,
    start_time: Option<i64>,
    series: &[SeriesSnapshot],
    ctx: &ExecutionContext,
) -> Result<Vec<DataRow>> {
    let Some(origin) = start_time.or_else(|| earliest(series)) else {
        return Ok(Vec::new());
    };
    let width = interval.as_millis();
    let bucket_of = |ts: i64| {
        origin.saturating_add(ts.saturating_sub(origin).div_euclid(width).saturating_mul(width))
    };

    // Window start -> contiguous point runs, one per series
    let mut buckets: BTreeMap<i64, Vec<&[DataPoint]>> = BTreeMap::new();
    for s in series {
        ctx.check()?;
        for run in s.points.chunk_by(|a, b| bucket_of(a.timestamp) == bucket_of(b.timestamp)) {
            buckets.entry(bucket_of(run[0].timestamp)).or_default().push(run);
        }
    }

    let mut rows = Vec::with_capacity(buckets.len());
    for (start, slices) in &buckets {
        ctx.check()?;
        if let Some(value) = evaluate(agg, slices) {
            rows.push(DataRow::aggregate(*start, value));
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveConfig;
    use crate::catalog::NewMetric;
    use crate::clock::{ManualClock, MILLIS_PER_DAY};
    use crate::storage::SeriesInfo;
    use crate::types::identify_series;

    const NOW: i64 = 100 * MILLIS_PER_DAY;

    struct Fixture {
        engine: QueryEngine,
        catalog: Arc<MetricCatalog>,
        store: Arc<TimeSeriesStore>,
        archive: Arc<ArchiveTier>,
    }

    fn fixture() -> Fixture {
        let clock: SharedClock = Arc::new(ManualClock::new(NOW));
        let catalog = Arc::new(MetricCatalog::new(30, clock.clone()));
        let store = Arc::new(TimeSeriesStore::new());
        let archive = Arc::new(ArchiveTier::new(&ArchiveConfig::default()));
        let engine = QueryEngine::new(
            catalog.clone(),
            store.clone(),
            archive.clone(),
            clock,
            QueryConfig::default(),
        );
        Fixture {
            engine,
            catalog,
            store,
            archive,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn info(metric: &str, labels: Labels, is_counter: bool) -> SeriesInfo {
        SeriesInfo {
            key: identify_series(metric, &labels),
            metric: metric.to_string(),
            labels,
            is_counter,
        }
    }

    fn run(f: &Fixture, request: AggregationRequest) -> Result<QueryResult> {
        f.engine
            .execute(&request, &ExecutionContext::new(Duration::from_secs(10)))
    }

    fn values(result: &QueryResult) -> Vec<f64> {
        result.data.iter().map(|r| r.value).collect()
    }

    #[test]
    fn test_unknown_metric_is_not_found() {
        let f = fixture();
        let err = run(&f, AggregationRequest::new("missing")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_rate_on_gauge_is_unsupported() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        let err = run(
            &f,
            AggregationRequest::new("temperature").with_aggregation(Aggregation::Rate),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAggregation(_)));
    }

    #[test]
    fn test_raw_rows_in_time_order() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        f.store.append_batch(
            info("temperature", labels(&[("room", "a")]), false),
            &[(NOW - 3000, 1.0), (NOW - 1000, 3.0)],
        );
        f.store.append_batch(
            info("temperature", labels(&[("room", "b")]), false),
            &[(NOW - 2000, 2.0)],
        );

        let result = run(&f, AggregationRequest::new("temperature")).unwrap();
        assert_eq!(values(&result), vec![1.0, 2.0, 3.0]);
        assert_eq!(result.data[1].labels.as_ref().unwrap()["room"], "b");
        assert!(result.aggregation.is_none());

        let limited = run(&f, AggregationRequest::new("temperature").with_limit(2)).unwrap();
        assert_eq!(values(&limited), vec![1.0, 2.0]);
    }

    #[test]
    fn test_whole_range_aggregations_pool_series() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        f.store.append_batch(
            info("temperature", labels(&[("room", "a")]), false),
            &[(NOW - 4000, 1.0), (NOW - 3000, 2.0)],
        );
        f.store.append_batch(
            info("temperature", labels(&[("room", "b")]), false),
            &[(NOW - 2000, 3.0), (NOW - 1000, 4.0)],
        );

        let cases = [
            (Aggregation::Sum, 10.0),
            (Aggregation::Avg, 2.5),
            (Aggregation::Min, 1.0),
            (Aggregation::Max, 4.0),
            (Aggregation::Count, 4.0),
            (Aggregation::Percentile(50), 2.0),
            (Aggregation::Percentile(99), 4.0),
        ];
        for (agg, expected) in cases {
            let request = AggregationRequest::new("temperature").with_aggregation(agg);
            let result = run(&f, request).unwrap();
            assert_eq!(values(&result), vec![expected], "{}", agg);
            assert_eq!(result.data[0].timestamp, NOW - 4000);
        }
    }

    #[test]
    fn test_bucketed_windows_skip_empty() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        let start = NOW - 60_000;
        f.store.append_batch(
            info("temperature", Labels::new(), false),
            &[(start, 1.0), (start + 5_000, 3.0), (start + 25_000, 10.0)],
        );

        let request = AggregationRequest::new("temperature")
            .with_aggregation(Aggregation::Avg)
            .with_interval("10s".parse().unwrap())
            .with_range(start, NOW);
        let result = run(&f, request).unwrap();

        // Window [start+10s, start+20s) is empty and produces no row
        let rows: Vec<(i64, f64)> = result.data.iter().map(|r| (r.timestamp, r.value)).collect();
        assert_eq!(rows, vec![(start, 2.0), (start + 20_000, 10.0)]);
    }

    #[test]
    fn test_rate_handles_counter_reset() {
        let f = fixture();
        f.catalog.register(NewMetric::counter("requests_total")).unwrap();
        let start = NOW - 10_000;
        // Monotonic
        f.store.append_batch(
            info("requests_total", labels(&[("host", "a")]), true),
            &[(start, 0.0), (start + 10_000, 100.0)],
        );

        let request = AggregationRequest::new("requests_total")
            .with_aggregation(Aggregation::Rate)
            .with_labels(labels(&[("host", "a")]));
        assert_eq!(values(&run(&f, request).unwrap()), vec![10.0]);

        // Drop then rise: 0 -> 50 -> 10 -> 30 over 10s = (50 + 10 + 20) / 10
        f.store.append_batch(
            info("requests_total", labels(&[("host", "b")]), true),
            &[(start, 0.0), (start + 4_000, 50.0), (start + 6_000, 10.0), (start + 10_000, 30.0)],
        );
        let request = AggregationRequest::new("requests_total")
            .with_aggregation(Aggregation::Rate)
            .with_labels(labels(&[("host", "b")]));
        let rate = values(&run(&f, request).unwrap())[0];
        assert!(rate >= 0.0);
        assert!((rate - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_label_filter_without_match_is_not_found() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        f.store.append_batch(
            info("temperature", labels(&[("location", "room1")]), false),
            &[(NOW, 1.0)],
        );

        let hit =
            AggregationRequest::new("temperature").with_labels(labels(&[("location", "room1")]));
        assert_eq!(run(&f, hit).unwrap().len(), 1);

        let miss =
            AggregationRequest::new("temperature").with_labels(labels(&[("location", "room9")]));
        assert!(matches!(run(&f, miss), Err(Error::NotFound(_))));

        // No filter and no data: empty 200-style result
        f.catalog.register(NewMetric::gauge("humidity")).unwrap();
        assert!(run(&f, AggregationRequest::new("humidity")).unwrap().is_empty());
    }

    #[test]
    fn test_cold_points_merge_with_hot_taking_precedence() {
        let f = fixture();
        let def = f
            .catalog
            .register(NewMetric::gauge("temperature").with_retention_days(1))
            .unwrap();
        let series = info("temperature", Labels::new(), false);
        let old = NOW - 2 * MILLIS_PER_DAY;

        f.archive
            .archive(def.id, &series, &[DataPoint::new(old, 1.0), DataPoint::new(NOW - 1000, 99.0)])
            .unwrap();
        f.store.append_batch(series.clone(), &[(NOW - 1000, 5.0)]);

        let result = run(&f, AggregationRequest::new("temperature")).unwrap();
        assert_eq!(values(&result), vec![1.0, 5.0]);

        // Range entirely inside the hot window never touches the archive
        let hot_only = AggregationRequest::new("temperature").with_range(NOW - 10_000, NOW);
        assert_eq!(values(&run(&f, hot_only).unwrap()), vec![5.0]);

        // Disabled archive degrades to hot-only
        f.archive.set_enabled(false);
        let result = run(&f, AggregationRequest::new("temperature")).unwrap();
        assert_eq!(values(&result), vec![5.0]);
    }

    #[test]
    fn test_repeated_query_is_identical() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        for host in ["a", "b", "c"] {
            f.store.append_batch(
                info("temperature", labels(&[("host", host)]), false),
                &[(NOW - 2000, 1.5), (NOW - 1000, 2.5)],
            );
        }
        let request = AggregationRequest::new("temperature")
            .with_aggregation(Aggregation::Percentile(90))
            .with_interval("1s".parse().unwrap());

        let a = serde_json::to_vec(&run(&f, request.clone()).unwrap()).unwrap();
        let b = serde_json::to_vec(&run(&f, request).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_expired_context_times_out() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        let ctx = ExecutionContext::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));
        let err = f
            .engine
            .execute(&AggregationRequest::new("temperature"), &ctx)
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_async_query() {
        let f = fixture();
        f.catalog.register(NewMetric::gauge("temperature")).unwrap();
        f.store
            .append_batch(info("temperature", Labels::new(), false), &[(NOW, 21.5)]);

        let result = f
            .engine
            .query(AggregationRequest::new("temperature").with_aggregation(Aggregation::Max))
            .await
            .unwrap();
        assert_eq!(values(&result), vec![21.5]);
    }
}
