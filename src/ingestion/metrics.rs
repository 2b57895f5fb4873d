//! Ingestion counters
//!
//! Lock-free counters updated by `ingest` callers and the flush path, plus a
//! small per-reason drop table guarded by a mutex.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Ingestion metrics collector
pub struct IngestionMetrics {
    // === Submission ===
    /// Samples in admitted batches
    samples_received: AtomicU64,
    /// Batches admitted into the buffer
    batches_accepted: AtomicU64,
    /// Batches refused (empty, oversized, backpressure)
    batches_rejected: AtomicU64,
    /// Samples evicted by the drop-oldest policy
    dropped_overflow: AtomicU64,

    // === Flush ===
    /// Flush runs that drained at least one sample
    flushes: AtomicU64,
    /// Samples written to the store
    samples_written: AtomicU64,
    /// Samples dropped by semantic validation
    dropped_invalid: AtomicU64,
    /// Counter resets flagged while writing
    counter_resets: AtomicU64,
    /// Sum of flush durations in microseconds
    flush_time_sum_us: AtomicU64,

    dropped_by_reason: Mutex<BTreeMap<&'static str, u64>>,

    start_time: Instant,
}

impl IngestionMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            batches_accepted: AtomicU64::new(0),
            batches_rejected: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
            dropped_invalid: AtomicU64::new(0),
            counter_resets: AtomicU64::new(0),
            flush_time_sum_us: AtomicU64::new(0),
            dropped_by_reason: Mutex::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    // === Recording Methods ===

    /// Record an admitted batch
    #[inline]
    pub fn record_accepted(&self, samples: u64, evicted: u64) {
        self.batches_accepted.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .samples_received
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(samples))
            });
        if evicted > 0 {
            self.dropped_overflow.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Record a refused batch
    #[inline]
    pub fn record_rejected(&self) {
        self.batches_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record samples dropped for one reason
    pub fn record_dropped(&self, reason: &'static str, count: u64) {
        self.dropped_invalid.fetch_add(count, Ordering::Relaxed);
        *self.dropped_by_reason.lock().entry(reason).or_insert(0) += count;
    }

    /// Record a completed flush
    pub fn record_flush(&self, written: u64, resets: u64, elapsed: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.samples_written.fetch_add(written, Ordering::Relaxed);
        self.counter_resets.fetch_add(resets, Ordering::Relaxed);
        self.flush_time_sum_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    // === Accessors ===

    /// Samples written to the store
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    /// Samples dropped by validation
    pub fn dropped_invalid(&self) -> u64 {
        self.dropped_invalid.load(Ordering::Relaxed)
    }

    /// Average flush duration in microseconds
    pub fn avg_flush_time_us(&self) -> u64 {
        let count = self.flushes.load(Ordering::Relaxed);
        if count > 0 {
            self.flush_time_sum_us.load(Ordering::Relaxed) / count
        } else {
            0
        }
    }

    /// Written samples per second since startup
    pub fn samples_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.samples_written() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Snapshot combined with the current buffer depth
    pub fn snapshot(&self, buffered: usize) -> IngestionStats {
        IngestionStats {
            received: self.samples_received.load(Ordering::Relaxed),
            accepted_batches: self.batches_accepted.load(Ordering::Relaxed),
            rejected_batches: self.batches_rejected.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            written: self.samples_written(),
            dropped_invalid: self.dropped_invalid(),
            dropped_by_reason: self
                .dropped_by_reason
                .lock()
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            counter_resets: self.counter_resets.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            avg_flush_time_us: self.avg_flush_time_us(),
            samples_per_second: self.samples_per_second(),
            buffered,
        }
    }
}

impl Default for IngestionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time ingestion statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    /// Samples in admitted batches
    pub received: u64,
    /// Batches admitted
    pub accepted_batches: u64,
    /// Batches refused
    pub rejected_batches: u64,
    /// Samples evicted by the overflow policy
    pub dropped_overflow: u64,
    /// Samples written to the store
    pub written: u64,
    /// Samples dropped by validation
    pub dropped_invalid: u64,
    /// Validation drops keyed by rejection code
    pub dropped_by_reason: BTreeMap<String, u64>,
    /// Counter resets flagged
    pub counter_resets: u64,
    /// Flush runs
    pub flushes: u64,
    /// Average flush duration in microseconds
    pub avg_flush_time_us: u64,
    /// Written samples per second since startup
    pub samples_per_second: f64,
    /// Samples waiting for the next flush
    pub buffered: usize,
}
