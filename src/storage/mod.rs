//! Hot time-series store
//!
//! Holds the points of every live series inside its metric's hot window.
//!
//! # Concurrency
//!
//! ```text
//! DashMap<SeriesKey, Arc<RwLock<Series>>>
//!            │             │
//!            │             └─ one writer per series, snapshot reads
//!            └─ sharded map, lookups never block on other series
//! ```
//!
//! Flush workers take a series' write lock for the duration of one batch of
//! appends. Scans take the read lock only long enough to copy the requested
//! range out. Archival migration holds the write lock while it hands the
//! expired prefix to the archive, so a point is never archived and appended
//! next to at the same time.
//!
//! # Example
//!
//! ```rust
//! use metric_store::storage::{SeriesInfo, TimeSeriesStore};
//! use metric_store::types::{identify_series, Labels, TimeRange};
//!
//! let store = TimeSeriesStore::new();
//! let labels = Labels::new();
//! let key = identify_series("cpu", &labels);
//! store.append_batch(
//!     SeriesInfo { key, metric: "cpu".into(), labels, is_counter: false },
//!     &[(1000, 0.5), (2000, 0.7)],
//! );
//!
//! let points = store.scan(key, &TimeRange::unbounded()).unwrap();
//! assert_eq!(points.len(), 2);
//! ```

mod series;

pub use series::{Series, SeriesInfo, SeriesSnapshot};

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{labels_match, DataPoint, Labels, SeriesKey, TimeRange};

/// Shared handle to one series
pub type SeriesHandle = Arc<RwLock<Series>>;

/// Counts returned by [`TimeSeriesStore::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    /// Live series
    pub series: usize,
    /// Points across all series
    pub points: usize,
}

/// Hot tier of the metric store
#[derive(Default)]
pub struct TimeSeriesStore {
    series: DashMap<SeriesKey, SeriesHandle>,
    by_metric: DashMap<String, BTreeSet<SeriesKey>>,
}

impl TimeSeriesStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the series described by `info`
    pub fn get_or_create(&self, info: SeriesInfo) -> SeriesHandle {
        if let Some(handle) = self.series.get(&info.key) {
            return handle.value().clone();
        }

        // Index under the series entry guard so both maps change together
        let key = info.key;
        self.series
            .entry(key)
            .or_insert_with(|| {
                self.by_metric
                    .entry(info.metric.clone())
                    .or_default()
                    .insert(key);
                Arc::new(RwLock::new(Series::new(info)))
            })
            .value()
            .clone()
    }

    /// Append one point to an existing series
    ///
    /// Returns whether the point was flagged as a counter reset.
    pub fn append(&self, key: SeriesKey, timestamp: i64, value: f64) -> Result<bool> {
        let handle = self.handle(key)?;
        let reset = handle.write().insert(timestamp, value);
        Ok(reset)
    }

    /// Append points to a series, creating it on first write
    ///
    /// All points go in under a single write lock, in slice order.
    /// Returns the number of counter resets flagged.
    pub fn append_batch(&self, info: SeriesInfo, points: &[(i64, f64)]) -> usize {
        let handle = self.get_or_create(info);
        let mut series = handle.write();
        points
            .iter()
            .filter(|(ts, value)| series.insert(*ts, *value))
            .count()
    }

    /// Points of one series within `range`
    pub fn scan(&self, key: SeriesKey, range: &TimeRange) -> Result<Vec<DataPoint>> {
        let handle = self.handle(key)?;
        let points = handle.read().range(range);
        Ok(points)
    }

    /// Points of every series of `metric` whose labels match `filter`
    ///
    /// Series are returned in key order. Matching series with no points in
    /// range are included with an empty point list.
    pub fn scan_all(
        &self,
        metric: &str,
        filter: &Labels,
        range: &TimeRange,
    ) -> Vec<SeriesSnapshot> {
        self.matching_handles(metric, filter)
            .into_iter()
            .map(|handle| {
                let series = handle.read();
                SeriesSnapshot {
                    key: series.info().key,
                    labels: series.info().labels.clone(),
                    points: series.range(range),
                }
            })
            .collect()
    }

    /// Identity of every series of `metric`, in key order
    pub fn metric_series(&self, metric: &str) -> Vec<SeriesInfo> {
        self.matching_handles(metric, &Labels::new())
            .into_iter()
            .map(|handle| handle.read().info().clone())
            .collect()
    }

    /// Whether a series exists
    pub fn contains(&self, key: SeriesKey) -> bool {
        self.series.contains_key(&key)
    }

    /// Number of series a metric currently has
    pub fn series_count(&self, metric: &str) -> usize {
        self.by_metric.get(metric).map_or(0, |keys| keys.len())
    }

    /// Every series key with its metric name
    pub fn series_index(&self) -> Vec<(String, SeriesKey)> {
        let mut index: Vec<(String, SeriesKey)> = self
            .by_metric
            .iter()
            .flat_map(|entry| {
                let metric = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(move |key| (metric.clone(), *key))
                    .collect::<Vec<_>>()
            })
            .collect();
        index.sort();
        index
    }

    /// Move points older than `cutoff` out of a series
    ///
    /// `sink` receives the expired prefix while the series' write lock is
    /// held. The points are removed only if `sink` succeeds, so each point
    /// leaves the store exactly once. Returns the number of points moved.
    pub fn migrate_before<F>(&self, key: SeriesKey, cutoff: i64, sink: F) -> Result<usize>
    where
        F: FnOnce(&SeriesInfo, &[DataPoint]) -> Result<()>,
    {
        let handle = self.handle(key)?;
        let mut series = handle.write();
        let count = series.count_before(cutoff);
        if count == 0 {
            return Ok(0);
        }

        sink(series.info(), series.peek_before(cutoff))?;
        series.truncate_front(count);
        Ok(count)
    }

    /// Drop every series of a metric; returns how many were removed
    pub fn remove_metric(&self, metric: &str) -> usize {
        let Some((_, keys)) = self.by_metric.remove(metric) else {
            return 0;
        };
        for key in &keys {
            self.series.remove(key);
        }
        debug!(metric, series = keys.len(), "Removed metric series from hot store");
        keys.len()
    }

    /// Series and point counts
    pub fn stats(&self) -> StoreStats {
        let points = self
            .series
            .iter()
            .map(|entry| entry.value().read().len())
            .sum();
        StoreStats {
            series: self.series.len(),
            points,
        }
    }

    fn handle(&self, key: SeriesKey) -> Result<SeriesHandle> {
        self.series
            .get(&key)
            .map(|h| h.value().clone())
            .ok_or_else(|| Error::NotFound(format!("series {}", key)))
    }

    fn matching_handles(&self, metric: &str, filter: &Labels) -> Vec<SeriesHandle> {
        let keys: Vec<SeriesKey> = match self.by_metric.get(metric) {
            Some(keys) => keys.iter().copied().collect(),
            None => return Vec::new(),
        };

        keys.into_iter()
            .filter_map(|key| self.series.get(&key).map(|h| h.value().clone()))
            .filter(|handle| labels_match(&handle.read().info().labels, filter))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::identify_series;

    fn info(metric: &str, pairs: &[(&str, &str)], is_counter: bool) -> SeriesInfo {
        let labels: Labels = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SeriesInfo {
            key: identify_series(metric, &labels),
            metric: metric.to_string(),
            labels,
            is_counter,
        }
    }

    #[test]
    fn test_append_and_scan() {
        let store = TimeSeriesStore::new();
        let series = info("temp", &[("room", "1")], false);
        let key = series.key;
        store.append_batch(series, &[(3, 3.0), (1, 1.0), (2, 2.0)]);

        let points = store.scan(key, &TimeRange::unbounded()).unwrap();
        let ts: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![1, 2, 3]);

        assert!(store.append(key, 4, 4.0).is_ok());
        assert_eq!(store.stats().points, 4);
    }

    #[test]
    fn test_append_unknown_series() {
        let store = TimeSeriesStore::new();
        assert!(matches!(
            store.append(SeriesKey(42), 1, 1.0),
            Err(Error::NotFound(_))
        ));
        assert!(store.scan(SeriesKey(42), &TimeRange::unbounded()).is_err());
    }

    #[test]
    fn test_counter_resets_counted() {
        let store = TimeSeriesStore::new();
        let resets = store.append_batch(
            info("requests", &[], true),
            &[(1, 10.0), (2, 20.0), (3, 2.0), (4, 4.0)],
        );
        assert_eq!(resets, 1);
    }

    #[test]
    fn test_recreated_series_is_indexed() {
        let store = TimeSeriesStore::new();
        let series = info("temp", &[("room", "1")], false);
        let key = series.key;
        store.append_batch(series.clone(), &[(1, 1.0)]);
        assert_eq!(store.remove_metric("temp"), 1);
        assert!(!store.contains(key));
        assert_eq!(store.series_count("temp"), 0);

        store.append_batch(series, &[(2, 2.0)]);
        assert!(store.contains(key));
        assert_eq!(store.series_count("temp"), 1);
        assert_eq!(store.series_index(), vec![("temp".to_string(), key)]);
        assert_eq!(store.stats(), StoreStats { series: 1, points: 1 });
    }

    #[test]
    fn test_scan_all_filters_by_labels() {
        let store = TimeSeriesStore::new();
        store.append_batch(info("temp", &[("room", "1"), ("floor", "a")], false), &[(1, 1.0)]);
        store.append_batch(info("temp", &[("room", "2"), ("floor", "a")], false), &[(1, 2.0)]);
        store.append_batch(info("humidity", &[("room", "1")], false), &[(1, 3.0)]);

        let mut filter = Labels::new();
        filter.insert("floor".to_string(), "a".to_string());
        assert_eq!(store.scan_all("temp", &filter, &TimeRange::unbounded()).len(), 2);

        filter.insert("room".to_string(), "2".to_string());
        let hits = store.scan_all("temp", &filter, &TimeRange::unbounded());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].points[0].value, 2.0);

        assert!(store.scan_all("missing", &Labels::new(), &TimeRange::unbounded()).is_empty());
        assert_eq!(store.series_count("temp"), 2);
    }

    #[test]
    fn test_migrate_before_moves_prefix_once() {
        let store = TimeSeriesStore::new();
        let series = info("temp", &[], false);
        let key = series.key;
        store.append_batch(series, &[(1, 1.0), (2, 2.0), (3, 3.0), (10, 10.0)]);

        let mut moved = Vec::new();
        let count = store
            .migrate_before(key, 5, |_, points| {
                moved.extend_from_slice(points);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(moved.len(), 3);

        let again = store.migrate_before(key, 5, |_, _| Ok(())).unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.scan(key, &TimeRange::unbounded()).unwrap().len(), 1);
    }

    #[test]
    fn test_migrate_before_keeps_points_on_sink_failure() {
        let store = TimeSeriesStore::new();
        let series = info("temp", &[], false);
        let key = series.key;
        store.append_batch(series, &[(1, 1.0), (2, 2.0)]);

        let result = store.migrate_before(key, 5, |_, _| {
            Err(Error::Unavailable("archive offline".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.scan(key, &TimeRange::unbounded()).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_metric() {
        let store = TimeSeriesStore::new();
        store.append_batch(info("temp", &[("room", "1")], false), &[(1, 1.0)]);
        store.append_batch(info("temp", &[("room", "2")], false), &[(1, 1.0)]);
        store.append_batch(info("other", &[], false), &[(1, 1.0)]);

        assert_eq!(store.remove_metric("temp"), 2);
        assert_eq!(store.series_count("temp"), 0);
        assert_eq!(store.stats().series, 1);
        assert_eq!(store.series_index().len(), 1);
    }

    #[test]
    fn test_concurrent_appends_to_one_series() {
        let store = Arc::new(TimeSeriesStore::new());
        let series = info("temp", &[], false);
        let key = series.key;
        store.get_or_create(series);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        store.append(key, (i * 4 + t) as i64, 1.0).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let points = store.scan(key, &TimeRange::unbounded()).unwrap();
        assert_eq!(points.len(), 1000);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
