//! Cold archive tier
//!
//! Points that age out of a metric's hot window are migrated here by the
//! [`ArchiveMigrator`]. The archive owns them from then on; the hot store keeps
//! no copy.
//!
//! ```text
//! TimeSeriesStore ──migrate_before(cutoff)──▶ ArchiveTier
//!   (hot window)        per-series lock        segments per series
//!                                              totalRowsArchived / totalBytesArchived
//! ```
//!
//! When archival is administratively disabled, [`ArchiveTier::stats`] and every
//! read return `Unavailable` instead of empty results.

mod migrator;

pub use migrator::{ArchiveCycleReport, ArchiveMigrator};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{SeriesInfo, SeriesSnapshot};
use crate::types::{labels_match, DataPoint, Labels, SeriesKey, TimeRange};

/// Encoded size of one archived point: timestamp, value and reset flag
pub const ARCHIVED_POINT_BYTES: u64 = 17;

// ============================================================================
// Configuration
// ============================================================================

/// Archive tier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Whether archival runs and archive reads are served
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between scheduled migration cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_enabled() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    3600
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl ArchiveConfig {
    /// Disabled archive
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Migration interval
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.enabled && self.interval_secs == 0 {
            return Err("archive interval_secs must be > 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Segments and Statistics
// ============================================================================

/// One migration's worth of points for one series
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSegment {
    /// Owning metric's registration id
    pub metric_id: Uuid,
    /// Series the points came from
    pub series_key: SeriesKey,
    /// Number of points
    pub point_count: u64,
    /// Encoded size
    pub byte_size: u64,
    /// First and last timestamp in the segment
    pub covered_range: TimeRange,
    #[serde(skip)]
    points: Vec<DataPoint>,
}

/// Archived series: identity plus its segments in migration order
#[derive(Debug, Clone)]
struct ColdSeries {
    info: SeriesInfo,
    segments: Vec<ArchiveSegment>,
}

impl ColdSeries {
    fn range(&self, range: &TimeRange) -> Vec<DataPoint> {
        let mut points: Vec<DataPoint> = self
            .segments
            .iter()
            .filter(|s| s.covered_range.start <= range.end && s.covered_range.end >= range.start)
            .flat_map(|s| s.points.iter().filter(|p| range.contains(p.timestamp)).copied())
            .collect();
        // Late points can land in a later segment with an earlier range
        points.sort_by_key(|p| p.timestamp);
        points
    }
}

/// Process-wide archival counters
///
/// Incremented only after a segment is stored; never reset while running.
#[derive(Debug, Default)]
pub struct ArchivalStats {
    total_rows_archived: AtomicU64,
    total_bytes_archived: AtomicU64,
    segments_written: AtomicU64,
}

/// Snapshot of [`ArchivalStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStatsSnapshot {
    /// Points archived since startup
    pub total_rows_archived: u64,
    /// Bytes archived since startup
    pub total_bytes_archived: u64,
    /// Segments written since startup
    pub segments_written: u64,
}

impl ArchivalStats {
    fn record(&self, rows: u64, bytes: u64) {
        self.total_rows_archived.fetch_add(rows, Ordering::AcqRel);
        self.total_bytes_archived.fetch_add(bytes, Ordering::AcqRel);
        self.segments_written.fetch_add(1, Ordering::AcqRel);
    }

    fn snapshot(&self) -> ArchiveStatsSnapshot {
        ArchiveStatsSnapshot {
            total_rows_archived: self.total_rows_archived.load(Ordering::Acquire),
            total_bytes_archived: self.total_bytes_archived.load(Ordering::Acquire),
            segments_written: self.segments_written.load(Ordering::Acquire),
        }
    }
}

// ============================================================================
// Archive Tier
// ============================================================================

/// Cold storage for migrated points
pub struct ArchiveTier {
    enabled: AtomicBool,
    series: DashMap<SeriesKey, ColdSeries>,
    by_metric: DashMap<String, BTreeSet<SeriesKey>>,
    stats: ArchivalStats,
}

impl ArchiveTier {
    /// Create an empty archive
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            series: DashMap::new(),
            by_metric: DashMap::new(),
            stats: ArchivalStats::default(),
        }
    }

    /// Whether archival is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable archival at runtime
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Error::Unavailable("archival is disabled".to_string()))
        }
    }

    /// Store points of one series as a new segment
    ///
    /// Counters are bumped after the segment is in place.
    pub fn archive(
        &self,
        metric_id: Uuid,
        info: &SeriesInfo,
        points: &[DataPoint],
    ) -> Result<ArchiveSegment> {
        self.ensure_enabled()?;
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(Error::InvalidQuery("cannot archive an empty segment".to_string())),
        };

        let point_count = points.len() as u64;
        let segment = ArchiveSegment {
            metric_id,
            series_key: info.key,
            point_count,
            byte_size: point_count * ARCHIVED_POINT_BYTES,
            covered_range: TimeRange {
                start: first,
                end: last,
            },
            points: points.to_vec(),
        };

        self.series
            .entry(info.key)
            .or_insert_with(|| ColdSeries {
                info: info.clone(),
                segments: Vec::new(),
            })
            .segments
            .push(segment.clone());
        self.by_metric
            .entry(info.metric.clone())
            .or_default()
            .insert(info.key);

        self.stats.record(segment.point_count, segment.byte_size);
        debug!(
            series = %info.key,
            points = segment.point_count,
            bytes = segment.byte_size,
            "Archived segment"
        );
        Ok(segment)
    }

    /// Archival counters, or `Unavailable` when disabled
    pub fn stats(&self) -> Result<ArchiveStatsSnapshot> {
        self.ensure_enabled()?;
        Ok(self.stats.snapshot())
    }

    /// Archived points of one series within `range`
    pub fn scan_series(&self, key: SeriesKey, range: &TimeRange) -> Result<Vec<DataPoint>> {
        self.ensure_enabled()?;
        Ok(self
            .series
            .get(&key)
            .map(|cold| cold.range(range))
            .unwrap_or_default())
    }

    /// Archived points of every matching series of a metric, in key order
    pub fn scan_metric(
        &self,
        metric: &str,
        filter: &Labels,
        range: &TimeRange,
    ) -> Result<Vec<SeriesSnapshot>> {
        self.ensure_enabled()?;
        let keys: Vec<SeriesKey> = match self.by_metric.get(metric) {
            Some(keys) => keys.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };

        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let cold = self.series.get(&key)?;
                if !labels_match(&cold.info.labels, filter) {
                    return None;
                }
                Some(SeriesSnapshot {
                    key,
                    labels: cold.info.labels.clone(),
                    points: cold.range(range),
                })
            })
            .collect())
    }

    /// Segment metadata of a metric, in series key then migration order
    pub fn segments(&self, metric: &str) -> Result<Vec<ArchiveSegment>> {
        self.ensure_enabled()?;
        let keys: Vec<SeriesKey> = self
            .by_metric
            .get(metric)
            .map(|keys| keys.iter().copied().collect())
            .unwrap_or_default();
        Ok(keys
            .into_iter()
            .filter_map(|key| self.series.get(&key).map(|cold| cold.segments.clone()))
            .flatten()
            .collect())
    }

    /// Drop every archived series of a metric
    ///
    /// Counters are left untouched; they count migrations, not residency.
    pub fn purge_metric(&self, metric: &str) -> usize {
        let Some((_, keys)) = self.by_metric.remove(metric) else {
            return 0;
        };
        for key in &keys {
            self.series.remove(key);
        }
        keys.len()
    }
}
