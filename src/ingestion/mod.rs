//! Two-phase ingestion pipeline
//!
//! Submission is cheap and synchronous; semantic validation happens later on
//! the flush path.
//!
//! # Architecture
//!
//! ```text
//! ingest(batch) ──shape checks──▶ SampleBuffer ──flush──▶ validate ──▶ group by series
//!      │                            (bounded)              │                 │
//!      └─ EmptyBatch /              overflow policy:       └─ drops counted  └─ parallel writer
//!         MalformedRequest /        reject | drop_oldest      by reason          ──▶ TimeSeriesStore
//!         Backpressure
//! ```
//!
//! A flush runs when the buffer reaches `flush_threshold` samples or when
//! `flush_interval_ms` elapses, whichever comes first. Samples accepted by
//! `ingest` but failing validation are dropped without reaching the caller.
//!
//! COUNTER series are written in `(timestamp, submission order)` so reset
//! detection sees a consistent sequence; GAUGE series keep submission order.
//!
//! # Example
//!
//! ```rust
//! use metric_store::ingestion::{BackpressureStrategy, IngestionConfig};
//!
//! let config = IngestionConfig::default()
//!     .with_buffer_capacity(50_000)
//!     .with_overflow_policy(BackpressureStrategy::DropOldest);
//! assert!(config.validate().is_ok());
//! ```

pub mod backpressure;
pub mod metrics;
pub mod validation;
pub mod writer;

pub use backpressure::{Admission, BackpressureStrategy, Pending, SampleBuffer};
pub use metrics::{IngestionMetrics, IngestionStats};
pub use validation::{SampleValidator, MIN_ACCEPTED_TIMESTAMP};
pub use writer::{write_parallel, SeriesBatch, WriteSummary};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cardinality::CardinalityGuard;
use crate::catalog::{MetricCatalog, MetricDefinition};
use crate::clock::SharedClock;
use crate::error::{Error, Result, SampleRejection};
use crate::storage::{SeriesInfo, TimeSeriesStore};
use crate::types::{Sample, SeriesKey};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Maximum buffered samples
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Buffered samples that trigger an early flush
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Milliseconds between scheduled flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Parallel writers per flush
    #[serde(default = "default_flush_workers")]
    pub flush_workers: usize,

    /// Policy when a batch does not fit
    #[serde(default)]
    pub overflow_policy: BackpressureStrategy,

    /// Largest batch accepted by one `ingest` call
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Allowed clock skew for future timestamps
    #[serde(default = "default_max_future_skew_ms")]
    pub max_future_skew_ms: i64,

    /// Oldest sample accepted, in days before now
    #[serde(default = "default_max_sample_age_days")]
    pub max_sample_age_days: u32,
}

fn default_buffer_capacity() -> usize {
    100_000
}
fn default_flush_threshold() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    5000
}
fn default_flush_workers() -> usize {
    4
}
fn default_max_batch_size() -> usize {
    10_000
}
fn default_max_future_skew_ms() -> i64 {
    300_000
}
fn default_max_sample_age_days() -> u32 {
    365
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            flush_threshold: default_flush_threshold(),
            flush_interval_ms: default_flush_interval_ms(),
            flush_workers: default_flush_workers(),
            overflow_policy: BackpressureStrategy::default(),
            max_batch_size: default_max_batch_size(),
            max_future_skew_ms: default_max_future_skew_ms(),
            max_sample_age_days: default_max_sample_age_days(),
        }
    }
}

impl IngestionConfig {
    /// Set buffer capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set early-flush threshold
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Set flush interval
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set overflow policy
    pub fn with_overflow_policy(mut self, policy: BackpressureStrategy) -> Self {
        self.overflow_policy = policy;
        self
    }

    /// Set max batch size
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Flush interval as a duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.buffer_capacity == 0 {
            return Err("buffer_capacity must be > 0".to_string());
        }
        if self.flush_threshold == 0 || self.flush_threshold > self.buffer_capacity {
            return Err("flush_threshold must be in 1..=buffer_capacity".to_string());
        }
        if self.flush_interval_ms == 0 {
            return Err("flush_interval_ms must be > 0".to_string());
        }
        if self.flush_workers == 0 {
            return Err("flush_workers must be > 0".to_string());
        }
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be > 0".to_string());
        }
        if self.max_future_skew_ms < 0 {
            return Err("max_future_skew_ms must be >= 0".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Acknowledgment for an admitted batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestAck {
    /// Samples admitted
    pub accepted: usize,
    /// Samples buffered after admission
    pub buffered: usize,
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Samples taken from the buffer
    pub drained: u64,
    /// Samples written to the store
    pub written: u64,
    /// Series written to
    pub series: u64,
    /// Counter resets flagged
    pub resets: u64,
    /// Dropped samples keyed by rejection code
    pub dropped: BTreeMap<String, u64>,
}

impl FlushReport {
    /// Total dropped samples
    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }
}

/// Validated points of one series gathered during a flush
struct SeriesGroup {
    info: SeriesInfo,
    metric_id: Uuid,
    /// `(timestamp, seq, value)`
    points: Vec<(i64, u64, f64)>,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Buffered ingestion into the hot store
pub struct IngestionPipeline {
    config: IngestionConfig,
    catalog: Arc<MetricCatalog>,
    store: Arc<TimeSeriesStore>,
    guard: Arc<CardinalityGuard>,
    validator: SampleValidator,
    buffer: SampleBuffer,
    metrics: IngestionMetrics,
    flush_signal: Notify,
    // One flush at a time keeps per-series write order intact
    flush_lock: Mutex<()>,
}

impl IngestionPipeline {
    /// Create a pipeline
    pub fn new(
        config: IngestionConfig,
        catalog: Arc<MetricCatalog>,
        store: Arc<TimeSeriesStore>,
        guard: Arc<CardinalityGuard>,
        clock: SharedClock,
    ) -> Self {
        let validator =
            SampleValidator::new(config.max_future_skew_ms, config.max_sample_age_days, clock);
        let buffer = SampleBuffer::new(config.buffer_capacity, config.overflow_policy);
        Self {
            config,
            catalog,
            store,
            guard,
            validator,
            buffer,
            metrics: IngestionMetrics::new(),
            flush_signal: Notify::new(),
            flush_lock: Mutex::new(()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &IngestionConfig {
        &self.config
    }

    /// Admit a batch for asynchronous validation and storage
    ///
    /// Only the batch shape is checked here. Never blocks.
    pub fn ingest(&self, samples: Vec<Sample>) -> Result<IngestAck> {
        if samples.is_empty() {
            self.metrics.record_rejected();
            return Err(Error::EmptyBatch);
        }
        if samples.len() > self.config.max_batch_size {
            self.metrics.record_rejected();
            return Err(Error::MalformedRequest(format!(
                "batch of {} samples exceeds the maximum of {}",
                samples.len(),
                self.config.max_batch_size
            )));
        }

        let accepted = samples.len();
        let admission = match self.buffer.push_batch(samples) {
            Ok(admission) => admission,
            Err(e) => {
                self.metrics.record_rejected();
                return Err(e);
            },
        };
        self.metrics
            .record_accepted(accepted as u64, admission.evicted as u64);

        if admission.buffered >= self.config.flush_threshold {
            self.flush_signal.notify_one();
        }

        Ok(IngestAck {
            accepted,
            buffered: admission.buffered,
        })
    }

    /// Wait until the buffer crosses the flush threshold
    pub async fn flush_requested(&self) {
        self.flush_signal.notified().await;
    }

    /// Samples waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drain the buffer, validate and write
    pub async fn flush(&self) -> Result<FlushReport> {
        let _flushing = self.flush_lock.lock().await;
        let started = Instant::now();

        let pending = self.buffer.drain();
        if pending.is_empty() {
            return Ok(FlushReport::default());
        }
        let drained = pending.len() as u64;

        let mut dropped: BTreeMap<&'static str, u64> = BTreeMap::new();
        let mut defs: HashMap<String, Option<Arc<MetricDefinition>>> = HashMap::new();
        let mut new_series: HashMap<String, usize> = HashMap::new();
        let mut groups: BTreeMap<SeriesKey, SeriesGroup> = BTreeMap::new();

        for Pending { sample, seq } in pending {
            let def = defs
                .entry(sample.metric_name.clone())
                .or_insert_with(|| self.catalog.resolve(&sample.metric_name).ok())
                .clone();
            let Some(def) = def else {
                let rejection = SampleRejection::UnknownMetric(sample.metric_name.clone());
                record_drop(&mut dropped, &sample, rejection);
                continue;
            };

            if let Err(rejection) = self
                .guard
                .check_labels(&sample.labels)
                .and_then(|_| self.validator.check(&sample))
            {
                record_drop(&mut dropped, &sample, rejection);
                continue;
            }

            let key = sample.series_key();
            if !groups.contains_key(&key) && !self.store.contains(key) {
                let fresh = new_series.entry(def.name.clone()).or_insert(0);
                let current = self.store.series_count(&def.name) + *fresh;
                if let Err(rejection) = self.guard.check_series_ceiling(&def.name, current, true) {
                    record_drop(&mut dropped, &sample, rejection);
                    continue;
                }
                *fresh += 1;
            }

            groups
                .entry(key)
                .or_insert_with(|| SeriesGroup {
                    info: SeriesInfo {
                        key,
                        metric: def.name.clone(),
                        labels: sample.labels.clone(),
                        is_counter: def.is_counter(),
                    },
                    metric_id: def.id,
                    points: Vec::new(),
                })
                .points
                .push((sample.timestamp, seq, sample.value));
        }

        let batches: Vec<SeriesBatch> = groups
            .into_values()
            .map(|mut group| {
                if group.info.is_counter {
                    group.points.sort_by_key(|(ts, seq, _)| (*ts, *seq));
                }
                SeriesBatch {
                    info: group.info,
                    metric_id: group.metric_id,
                    points: group.points.into_iter().map(|(ts, _, v)| (ts, v)).collect(),
                }
            })
            .collect();

        let summary = write_parallel(
            Arc::clone(&self.store),
            Arc::clone(&self.catalog),
            batches,
            self.config.flush_workers,
        )
        .await?;
        if summary.orphaned > 0 {
            *dropped.entry("UNKNOWN_METRIC").or_insert(0) += summary.orphaned;
        }

        for (reason, count) in &dropped {
            self.metrics.record_dropped(reason, *count);
        }
        let elapsed = started.elapsed();
        self.metrics
            .record_flush(summary.written, summary.resets, elapsed);

        let report = FlushReport {
            drained,
            written: summary.written,
            series: summary.series,
            resets: summary.resets,
            dropped: dropped.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        };
        if report.dropped_total() > 0 {
            warn!(
                drained = report.drained,
                dropped = report.dropped_total(),
                "Flush dropped invalid samples"
            );
        }
        debug!(
            drained = report.drained,
            written = report.written,
            series = report.series,
            elapsed_us = elapsed.as_micros() as u64,
            "Flush complete"
        );
        Ok(report)
    }

    /// Counters plus current buffer depth
    pub fn stats(&self) -> IngestionStats {
        self.metrics.snapshot(self.buffer.len())
    }
}

fn record_drop(
    dropped: &mut BTreeMap<&'static str, u64>,
    sample: &Sample,
    rejection: SampleRejection,
) {
    debug!(
        metric = %sample.metric_name,
        timestamp = sample.timestamp,
        reason = rejection.code(),
        "Dropped sample: {}",
        rejection
    );
    *dropped.entry(rejection.code()).or_insert(0) += 1;
}
