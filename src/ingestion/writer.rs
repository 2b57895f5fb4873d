//! Parallel flush writer
//!
//! Validated samples arrive grouped by series. Groups are spread over a fixed
//! number of shards and each shard is written on the blocking pool. A series
//! lives in exactly one shard, so its points are appended by one worker in
//! the order the group holds them.
//!
//! Each batch is appended only while the registration it was validated
//! against is still live in the catalog. Batches for a metric deregistered
//! mid-flush are counted as orphaned instead of resurrecting its series.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::MetricCatalog;
use crate::error::{Error, Result};
use crate::services::ServiceError;
use crate::storage::{SeriesInfo, TimeSeriesStore};

/// Points bound for one series
#[derive(Debug, Clone)]
pub struct SeriesBatch {
    /// Target series
    pub info: SeriesInfo,
    /// Registration the points were validated against
    pub metric_id: Uuid,
    /// `(timestamp, value)` in write order
    pub points: Vec<(i64, f64)>,
}

/// Totals of one parallel write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Points appended
    pub written: u64,
    /// Counter resets flagged
    pub resets: u64,
    /// Series touched
    pub series: u64,
    /// Points discarded because their metric was deregistered
    pub orphaned: u64,
}

impl WriteSummary {
    fn merge(&mut self, other: WriteSummary) {
        self.written += other.written;
        self.resets += other.resets;
        self.series += other.series;
        self.orphaned += other.orphaned;
    }
}

/// Write series batches across `workers` shards
pub async fn write_parallel(
    store: Arc<TimeSeriesStore>,
    catalog: Arc<MetricCatalog>,
    batches: Vec<SeriesBatch>,
    workers: usize,
) -> Result<WriteSummary> {
    if batches.is_empty() {
        return Ok(WriteSummary::default());
    }

    let workers = workers.clamp(1, batches.len());
    let mut shards: Vec<Vec<SeriesBatch>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, batch) in batches.into_iter().enumerate() {
        shards[i % workers].push(batch);
    }

    let tasks = shards.into_iter().enumerate().map(|(worker_id, shard)| {
        let store = Arc::clone(&store);
        let catalog = Arc::clone(&catalog);
        tokio::task::spawn_blocking(move || write_shard(worker_id, &store, &catalog, shard))
    });

    let mut summary = WriteSummary::default();
    for joined in join_all(tasks).await {
        let shard = joined.map_err(|e| {
            Error::Service(ServiceError::RuntimeError(format!(
                "flush worker failed: {}",
                e
            )))
        })?;
        summary.merge(shard);
    }
    Ok(summary)
}

fn write_shard(
    worker_id: usize,
    store: &TimeSeriesStore,
    catalog: &MetricCatalog,
    shard: Vec<SeriesBatch>,
) -> WriteSummary {
    let mut summary = WriteSummary::default();
    for SeriesBatch {
        info,
        metric_id,
        points,
    } in shard
    {
        let metric = info.metric.clone();
        let appended =
            catalog.while_registered(&metric, metric_id, || store.append_batch(info, &points));
        match appended {
            Some(resets) => summary.merge(WriteSummary {
                written: points.len() as u64,
                resets: resets as u64,
                series: 1,
                orphaned: 0,
            }),
            None => {
                debug!(
                    metric = %metric,
                    points = points.len(),
                    "Metric deregistered during flush"
                );
                summary.orphaned += points.len() as u64;
            },
        }
    }
    debug!(
        worker_id,
        series = summary.series,
        points = summary.written,
        orphaned = summary.orphaned,
        "Flush worker wrote shard"
    );
    summary
}
