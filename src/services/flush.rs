//! Flush worker service
//!
//! Flushes the ingestion buffer on a fixed interval or as soon as the buffer
//! crosses its threshold. On shutdown the buffer is drained one last time.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};

use super::framework::{Service, ServiceError, ServiceStatus};
use crate::ingestion::IngestionPipeline;

/// Background flush loop for an [`IngestionPipeline`]
pub struct FlushService {
    pipeline: Arc<IngestionPipeline>,
    status: RwLock<ServiceStatus>,
}

impl FlushService {
    /// Service name
    pub const NAME: &'static str = "ingestion-flush";

    /// Create the service
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            pipeline,
            status: RwLock::new(ServiceStatus::Starting),
        }
    }

    async fn flush(&self, trigger: &'static str) {
        match self.pipeline.flush().await {
            Ok(report) if report.drained > 0 => {
                tracing::debug!(
                    trigger,
                    drained = report.drained,
                    written = report.written,
                    "Buffer flushed"
                );
            },
            Ok(_) => {},
            Err(e) => tracing::error!(trigger, error = %e, "Flush failed"),
        }
    }
}

#[async_trait::async_trait]
impl Service for FlushService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        let period = self.pipeline.config().flush_interval();
        tracing::debug!(interval_ms = period.as_millis() as u64, "Flush service started");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Flush service broadcast receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => self.flush("interval").await,

                _ = self.pipeline.flush_requested() => {
                    self.flush("threshold").await;
                    ticker.reset();
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopping;
        self.flush("shutdown").await;

        *self.status.write() = ServiceStatus::Stopped;
        tracing::debug!("Flush service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
