//! Integration tests for the archive tier
//!
//! A manual clock moves points past their metric's retention so that:
//! - Expired points migrate exactly once, with stable statistics
//! - Queries spanning the boundary merge hot and archived points
//! - A disabled archive degrades reads to the hot tier

use std::sync::Arc;

use metric_store::archive::ARCHIVED_POINT_BYTES;
use metric_store::clock::{ManualClock, MILLIS_PER_DAY};
use metric_store::query::Aggregation;
use metric_store::{AggregationRequest, Config, Error, Labels, MetricStore, NewMetric, Sample};

// ============================================================================
// Helper Functions
// ============================================================================

const NOW: i64 = 1_700_000_000_000;
const HOUR: i64 = 3_600_000;

fn setup() -> (MetricStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(NOW));
    let store = MetricStore::builder()
        .with_config(Config::default())
        .with_clock(clock.clone())
        .build()
        .expect("store builds");
    store
        .register_metric(NewMetric::gauge("disk_io").with_retention_days(1))
        .unwrap();
    (store, clock)
}

fn device(name: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert("device".to_string(), name.to_string());
    labels
}

async fn ingest_hourly(store: &MetricStore, end: i64, hours: i64, labels: Labels) {
    let samples: Vec<Sample> = (0..hours)
        .map(|h| Sample::new("disk_io", (h + 1) as f64, end - (hours - h) * HOUR, labels.clone()))
        .collect();
    store.ingest(samples).unwrap();
    store.flush().await.unwrap();
}

async fn count(store: &MetricStore, request: AggregationRequest) -> f64 {
    let result = store
        .query(request.with_aggregation(Aggregation::Count))
        .await
        .unwrap();
    result.data.first().map(|r| r.value).unwrap_or(0.0)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_expired_points_migrate_once() {
    let (store, clock) = setup();
    ingest_hourly(&store, NOW, 6, device("sda")).await;
    assert_eq!(store.store().stats().points, 6);

    clock.advance(2 * MILLIS_PER_DAY);
    let report = store.trigger_archival().await.unwrap();
    assert_eq!(report.rows_archived, 6);
    assert_eq!(report.bytes_archived, 6 * ARCHIVED_POINT_BYTES);
    assert_eq!(store.store().stats().points, 0);

    let again = store.trigger_archival().await.unwrap();
    assert_eq!(again.rows_archived, 0);

    let stats = store.archive_stats().unwrap();
    assert_eq!(stats.total_rows_archived, 6);
    assert_eq!(stats.total_bytes_archived, 6 * ARCHIVED_POINT_BYTES);
    assert_eq!(stats.segments_written, 1);
}

#[tokio::test]
async fn test_query_spans_both_tiers() {
    let (store, clock) = setup();
    ingest_hourly(&store, NOW, 4, device("sda")).await;

    clock.advance(2 * MILLIS_PER_DAY);
    let now = NOW + 2 * MILLIS_PER_DAY;
    ingest_hourly(&store, now, 3, device("sda")).await;
    store.trigger_archival().await.unwrap();
    assert_eq!(store.store().stats().points, 3);

    // Open range reaches into the archive
    assert_eq!(count(&store, AggregationRequest::new("disk_io")).await, 7.0);

    // A range entirely inside the hot window never consults the archive
    let hot_only = AggregationRequest::new("disk_io").with_range(now - 12 * HOUR, now);
    assert_eq!(count(&store, hot_only).await, 3.0);

    // Raw rows come back in timestamp order across the boundary
    let raw = store.query(AggregationRequest::new("disk_io")).await.unwrap();
    assert!(raw.data.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(raw.data.first().map(|r| r.value), Some(1.0));
}

#[tokio::test]
async fn test_archive_query_filters_by_range() {
    let (store, clock) = setup();
    ingest_hourly(&store, NOW, 4, device("sda")).await;
    ingest_hourly(&store, NOW, 2, device("sdb")).await;
    clock.advance(2 * MILLIS_PER_DAY);
    store.trigger_archival().await.unwrap();

    let all = store.archive_query("disk_io", None, None).unwrap();
    assert_eq!(all.data.len(), 6);

    let recent = store
        .archive_query("disk_io", Some(NOW - 2 * HOUR), Some(NOW))
        .unwrap();
    assert_eq!(recent.data.len(), 4);
    assert!(recent.data.iter().all(|p| p.timestamp >= NOW - 2 * HOUR));

    let by_id = store
        .archive_query(&all.metric_id.to_string(), None, None)
        .unwrap();
    assert_eq!(by_id.data, all.data);
}

#[tokio::test]
async fn test_disabled_archive_degrades_reads() {
    let (store, clock) = setup();
    ingest_hourly(&store, NOW, 2, device("sda")).await;
    clock.advance(2 * MILLIS_PER_DAY);
    store.trigger_archival().await.unwrap();
    ingest_hourly(&store, NOW + 2 * MILLIS_PER_DAY, 1, device("sda")).await;

    store.archive().set_enabled(false);

    assert_eq!(count(&store, AggregationRequest::new("disk_io")).await, 1.0);
    assert!(matches!(store.archive_stats(), Err(Error::Unavailable(_))));
    assert!(matches!(
        store.trigger_archival().await,
        Err(Error::Unavailable(_))
    ));
    assert!(matches!(
        store.archive_query("disk_io", None, None),
        Err(Error::Unavailable(_))
    ));

    store.archive().set_enabled(true);
    assert_eq!(count(&store, AggregationRequest::new("disk_io")).await, 3.0);
}

#[tokio::test]
async fn test_per_metric_retention() {
    let (store, clock) = setup();
    store
        .register_metric(NewMetric::gauge("slow_metric").with_retention_days(30))
        .unwrap();

    ingest_hourly(&store, NOW, 2, device("sda")).await;
    store
        .ingest(vec![Sample::new("slow_metric", 1.0, NOW - HOUR, Labels::new())])
        .unwrap();
    store.flush().await.unwrap();

    clock.advance(2 * MILLIS_PER_DAY);
    let report = store.trigger_archival().await.unwrap();
    assert_eq!(report.rows_archived, 2);
    assert_eq!(store.store().series_count("slow_metric"), 1);
    assert_eq!(store.store().stats().points, 1);
}
