//! Bounded sample buffer with an explicit overflow policy
//!
//! Producers push whole batches; the flush path drains everything at once.
//! A batch is admitted or refused as a unit, so a caller never sees a
//! partially buffered batch.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::Sample;

/// What to do when a batch does not fit in the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategy {
    /// Reject the new batch with a retryable error
    #[default]
    Reject,
    /// Evict the oldest buffered samples to make room
    DropOldest,
}

impl fmt::Display for BackpressureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackpressureStrategy::Reject => f.write_str("reject"),
            BackpressureStrategy::DropOldest => f.write_str("drop_oldest"),
        }
    }
}

impl FromStr for BackpressureStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(BackpressureStrategy::Reject),
            "drop_oldest" | "drop-oldest" => Ok(BackpressureStrategy::DropOldest),
            other => Err(format!("unknown overflow policy '{}'", other)),
        }
    }
}

/// A buffered sample with its submission sequence number
#[derive(Debug, Clone, PartialEq)]
pub struct Pending {
    /// The sample as submitted
    pub sample: Sample,
    /// Monotonic submission order across all producers
    pub seq: u64,
}

/// Result of admitting a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Samples buffered after the push
    pub buffered: usize,
    /// Samples evicted to make room (`DropOldest` only)
    pub evicted: usize,
}

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Pending>,
    next_seq: u64,
}

/// Shared bounded buffer between `ingest` callers and the flush worker
#[derive(Debug)]
pub struct SampleBuffer {
    capacity: usize,
    strategy: BackpressureStrategy,
    state: Mutex<BufferState>,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn new(capacity: usize, strategy: BackpressureStrategy) -> Self {
        Self {
            capacity,
            strategy,
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Maximum number of buffered samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Active overflow policy
    pub fn strategy(&self) -> BackpressureStrategy {
        self.strategy
    }

    /// Samples currently buffered
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Admit a batch, or refuse it with [`Error::Backpressure`]
    pub fn push_batch(&self, samples: Vec<Sample>) -> Result<Admission> {
        let incoming = samples.len();
        if incoming > self.capacity {
            return Err(Error::Backpressure(format!(
                "batch of {} samples exceeds buffer capacity {}",
                incoming, self.capacity
            )));
        }

        let mut state = self.state.lock();
        let free = self.capacity - state.queue.len();
        let mut evicted = 0;
        if incoming > free {
            match self.strategy {
                BackpressureStrategy::Reject => {
                    warn!(
                        buffered = state.queue.len(),
                        capacity = self.capacity,
                        incoming,
                        "Ingestion buffer full, rejecting batch"
                    );
                    return Err(Error::Backpressure(format!(
                        "ingestion buffer full ({} of {} samples buffered)",
                        state.queue.len(),
                        self.capacity
                    )));
                },
                BackpressureStrategy::DropOldest => {
                    evicted = incoming - free;
                    state.queue.drain(..evicted);
                    warn!(
                        evicted,
                        capacity = self.capacity,
                        "Ingestion buffer full, evicted oldest samples"
                    );
                },
            }
        }

        for sample in samples {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push_back(Pending { sample, seq });
        }

        Ok(Admission {
            buffered: state.queue.len(),
            evicted,
        })
    }

    /// Take everything currently buffered, oldest first
    pub fn drain(&self) -> Vec<Pending> {
        let mut state = self.state.lock();
        state.queue.drain(..).collect()
    }
}
