//! Hot-to-cold migration

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use super::ArchiveTier;
use crate::catalog::MetricCatalog;
use crate::clock::SharedClock;
use crate::error::{Error, Result};
use crate::storage::TimeSeriesStore;

/// Outcome of one migration cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveCycleReport {
    /// Series inspected
    pub series_scanned: u64,
    /// Series that had expired points moved
    pub series_migrated: u64,
    /// Series whose migration failed
    pub series_failed: u64,
    /// Points moved to the archive
    pub rows_archived: u64,
    /// Bytes written to the archive
    pub bytes_archived: u64,
}

/// Moves points older than each metric's hot window into the archive
pub struct ArchiveMigrator {
    store: Arc<TimeSeriesStore>,
    catalog: Arc<MetricCatalog>,
    tier: Arc<ArchiveTier>,
    clock: SharedClock,
    cycles: AtomicU64,
}

impl ArchiveMigrator {
    /// Create a migrator
    pub fn new(
        store: Arc<TimeSeriesStore>,
        catalog: Arc<MetricCatalog>,
        tier: Arc<ArchiveTier>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            catalog,
            tier,
            clock,
            cycles: AtomicU64::new(0),
        }
    }

    /// Archive tier this migrator feeds
    pub fn tier(&self) -> &Arc<ArchiveTier> {
        &self.tier
    }

    /// Cycles run since startup
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Run a single migration cycle over every series
    ///
    /// Each series is migrated under its own write lock; a failure on one
    /// series leaves its points in the hot store and the cycle continues.
    pub fn run_cycle(&self) -> Result<ArchiveCycleReport> {
        if !self.tier.is_enabled() {
            return Err(Error::Unavailable("archival is disabled".to_string()));
        }
        self.cycles.fetch_add(1, Ordering::Relaxed);

        let mut report = ArchiveCycleReport::default();
        for (metric, key) in self.store.series_index() {
            report.series_scanned += 1;

            // Deregistered concurrently
            let Ok(def) = self.catalog.resolve(&metric) else {
                continue;
            };
            let cutoff = self.clock.retention_cutoff(def.retention_days);

            let mut bytes = 0;
            let moved = self.store.migrate_before(key, cutoff, |info, points| {
                let segment = self.tier.archive(def.id, info, points)?;
                bytes = segment.byte_size;
                Ok(())
            });

            match moved {
                Ok(0) => {},
                Ok(rows) => {
                    report.series_migrated += 1;
                    report.rows_archived += rows as u64;
                    report.bytes_archived += bytes;
                },
                // Removed between indexing and migration
                Err(Error::NotFound(_)) => {},
                Err(e) => {
                    report.series_failed += 1;
                    error!(metric = %metric, series = %key, "Archive migration failed: {}", e);
                },
            }
        }

        info!(
            series_scanned = report.series_scanned,
            series_migrated = report.series_migrated,
            rows_archived = report.rows_archived,
            bytes_archived = report.bytes_archived,
            "Archive cycle complete"
        );
        Ok(report)
    }
}
