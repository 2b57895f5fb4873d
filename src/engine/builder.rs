//! Metric store builder
//!
//! This module provides the main MetricStore type that wires the catalog,
//! hot store, ingestion pipeline, archive tier, query engine and background
//! services into one handle.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::{ArchiveCycleReport, ArchiveMigrator, ArchiveStatsSnapshot, ArchiveTier};
use crate::cardinality::{CardinalityGuard, CardinalityStats};
use crate::catalog::{MetricCatalog, MetricDefinition, NewMetric};
use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ingestion::{FlushReport, IngestAck, IngestionPipeline, IngestionStats};
use crate::query::{AggregationRequest, QueryEngine, QueryResult};
use crate::services::{
    ArchivalService, FlushService, ServiceConfig, ServiceError, ServiceManager, ServiceStatus,
};
use crate::storage::{StoreStats, TimeSeriesStore};
use crate::types::{Labels, Sample, SeriesKey, TimeRange};

// ============================================================================
// Builder
// ============================================================================

/// Builder for a [`MetricStore`]
pub struct MetricStoreBuilder {
    config: Config,
    clock: Option<SharedClock>,
}

impl MetricStoreBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            clock: None,
        }
    }

    /// Set store configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the clock used for every "now" decision
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the store
    ///
    /// Background services are registered but not started; call
    /// [`MetricStore::start`].
    pub fn build(self) -> Result<MetricStore> {
        self.config.validate().map_err(Error::Configuration)?;

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let catalog = Arc::new(MetricCatalog::new(
            config.catalog.default_retention_days,
            Arc::clone(&clock),
        ));
        let store = Arc::new(TimeSeriesStore::new());
        let guard = Arc::new(CardinalityGuard::new(config.cardinality.clone()));
        let pipeline = Arc::new(IngestionPipeline::new(
            config.ingestion.clone(),
            Arc::clone(&catalog),
            Arc::clone(&store),
            Arc::clone(&guard),
            Arc::clone(&clock),
        ));
        let archive = Arc::new(ArchiveTier::new(&config.archive));
        let migrator = Arc::new(ArchiveMigrator::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&archive),
            Arc::clone(&clock),
        ));
        let queries = QueryEngine::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            Arc::clone(&archive),
            Arc::clone(&clock),
            config.query.clone(),
        );

        let services = ServiceManager::new(
            ServiceConfig::default().with_shutdown_timeout(config.server.shutdown_timeout()),
        );
        services.register(Arc::new(FlushService::new(Arc::clone(&pipeline))))?;
        services.register(Arc::new(ArchivalService::new(
            Arc::clone(&migrator),
            config.archive.interval(),
        )))?;

        debug!(
            archive_enabled = config.archive.enabled,
            flush_interval_ms = config.ingestion.flush_interval_ms,
            "Metric store built"
        );

        Ok(MetricStore {
            config,
            clock,
            catalog,
            store,
            guard,
            pipeline,
            archive,
            migrator,
            queries,
            services,
        })
    }
}

impl Default for MetricStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Metric Store
// ============================================================================

/// Points read back from the archive tier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveQueryResult {
    /// Metric id
    pub metric_id: Uuid,
    /// Metric name
    pub metric_name: String,
    /// Archived points in timestamp order
    pub data: Vec<ArchivedPoint>,
}

/// One archived point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedPoint {
    /// Unix milliseconds
    pub timestamp: i64,
    /// Stored value
    pub value: f64,
    /// Series labels
    pub labels: Labels,
}

/// Combined statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStoreStats {
    /// Registered metrics
    pub metrics: usize,
    /// Hot tier counts
    pub store: StoreStats,
    /// Ingestion counters
    pub ingestion: IngestionStats,
    /// Cardinality rejections
    pub cardinality: CardinalityStats,
    /// Archive counters, absent while the tier is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveStatsSnapshot>,
}

/// Main metric store instance
pub struct MetricStore {
    config: Config,
    clock: SharedClock,
    catalog: Arc<MetricCatalog>,
    store: Arc<TimeSeriesStore>,
    guard: Arc<CardinalityGuard>,
    pipeline: Arc<IngestionPipeline>,
    archive: Arc<ArchiveTier>,
    migrator: Arc<ArchiveMigrator>,
    queries: QueryEngine,
    services: ServiceManager,
}

impl MetricStore {
    /// Start a builder
    pub fn builder() -> MetricStoreBuilder {
        MetricStoreBuilder::new()
    }

    /// Get store configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the clock
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Get reference to the catalog
    pub fn catalog(&self) -> &Arc<MetricCatalog> {
        &self.catalog
    }

    /// Get reference to the hot store
    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    /// Get reference to the archive tier
    pub fn archive(&self) -> &Arc<ArchiveTier> {
        &self.archive
    }

    // === Catalog ===

    /// Register a metric
    pub fn register_metric(&self, request: NewMetric) -> Result<Arc<MetricDefinition>> {
        self.catalog.register(request)
    }

    /// Look up a metric by name
    pub fn metric(&self, name: &str) -> Result<Arc<MetricDefinition>> {
        self.catalog.resolve(name)
    }

    /// All metrics, sorted by name
    pub fn list_metrics(&self) -> Vec<Arc<MetricDefinition>> {
        self.catalog.list()
    }

    /// Remove a metric together with its hot series and archived segments
    pub fn deregister_metric(&self, name: &str) -> Result<Arc<MetricDefinition>> {
        let definition = self.catalog.deregister(name)?;
        let series = self.store.remove_metric(name);
        let segments = self.archive.purge_metric(name);

        info!(
            metric = name,
            series_removed = series,
            segments_purged = segments,
            "Metric deregistered"
        );
        Ok(definition)
    }

    /// Series key for a metric and label set
    pub fn identify_series(&self, metric_name: &str, labels: &Labels) -> SeriesKey {
        self.catalog.identify_series(metric_name, labels)
    }

    // === Ingestion ===

    /// Admit a batch of samples
    pub fn ingest(&self, samples: Vec<Sample>) -> Result<IngestAck> {
        self.pipeline.ingest(samples)
    }

    /// Flush buffered samples now
    pub async fn flush(&self) -> Result<FlushReport> {
        self.pipeline.flush().await
    }

    /// Ingestion counters
    pub fn ingestion_stats(&self) -> IngestionStats {
        self.pipeline.stats()
    }

    // === Query ===

    /// Run an aggregation query
    pub async fn query(&self, request: AggregationRequest) -> Result<QueryResult> {
        self.queries.query(request).await
    }

    // === Archive ===

    /// Archive counters
    pub fn archive_stats(&self) -> Result<ArchiveStatsSnapshot> {
        self.archive.stats()
    }

    /// Archived points of one metric, by id or name
    pub fn archive_query(
        &self,
        metric_ref: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<ArchiveQueryResult> {
        if !self.archive.is_enabled() {
            return Err(Error::Unavailable("archive tier is disabled".to_string()));
        }
        let definition = self.catalog.resolve_ref(metric_ref)?;
        let range = TimeRange::from_bounds(start, end)?;

        let mut data: Vec<ArchivedPoint> = self
            .archive
            .scan_metric(&definition.name, &Labels::new(), &range)?
            .into_iter()
            .flat_map(|series| {
                let labels = series.labels;
                series.points.into_iter().map(move |p| ArchivedPoint {
                    timestamp: p.timestamp,
                    value: p.value,
                    labels: labels.clone(),
                })
            })
            .collect();
        data.sort_by_key(|p| p.timestamp);

        Ok(ArchiveQueryResult {
            metric_id: definition.id,
            metric_name: definition.name.clone(),
            data,
        })
    }

    /// Run one archival cycle now
    pub async fn trigger_archival(&self) -> Result<ArchiveCycleReport> {
        let migrator = Arc::clone(&self.migrator);
        tokio::task::spawn_blocking(move || migrator.run_cycle())
            .await
            .map_err(|e| {
                Error::Service(ServiceError::RuntimeError(format!(
                    "archival task failed: {}",
                    e
                )))
            })?
    }

    // === Lifecycle ===

    /// Start background services
    pub async fn start(&self) -> Result<()> {
        self.services.start_all().await?;
        info!("Metric store started");
        Ok(())
    }

    /// Stop background services; the flush service drains the buffer first
    pub async fn shutdown(&self) -> Result<()> {
        self.services.shutdown().await?;
        info!("Metric store stopped");
        Ok(())
    }

    /// Whether every background service is running
    pub fn is_healthy(&self) -> bool {
        self.services.is_running() && self.services.is_healthy()
    }

    /// Per-service status
    pub fn service_status(&self) -> BTreeMap<&'static str, ServiceStatus> {
        self.services.status()
    }

    /// Get combined statistics
    pub fn stats(&self) -> MetricStoreStats {
        MetricStoreStats {
            metrics: self.catalog.len(),
            store: self.store.stats(),
            ingestion: self.pipeline.stats(),
            cardinality: self.guard.stats(),
            archive: self.archive.stats().ok(),
        }
    }
}
