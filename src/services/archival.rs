//! Scheduled archive migration

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};

use super::flush::FlushService;
use super::framework::{Service, ServiceError, ServiceStatus};
use crate::archive::ArchiveMigrator;

/// Runs [`ArchiveMigrator::run_cycle`] on a fixed interval
pub struct ArchivalService {
    migrator: Arc<ArchiveMigrator>,
    period: Duration,
    status: RwLock<ServiceStatus>,
}

impl ArchivalService {
    /// Service name
    pub const NAME: &'static str = "archival";

    /// Create the service
    pub fn new(migrator: Arc<ArchiveMigrator>, period: Duration) -> Self {
        Self {
            migrator,
            period,
            status: RwLock::new(ServiceStatus::Starting),
        }
    }

    async fn run_cycle(&self) {
        if !self.migrator.tier().is_enabled() {
            tracing::debug!("Archival disabled, skipping cycle");
            return;
        }

        let migrator = Arc::clone(&self.migrator);
        match tokio::task::spawn_blocking(move || migrator.run_cycle()).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => tracing::warn!(error = %e, "Archive cycle failed"),
            Err(e) => tracing::error!(error = %e, "Archive cycle task panicked"),
        }
    }
}

#[async_trait::async_trait]
impl Service for ArchivalService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        tracing::debug!(interval_secs = self.period.as_secs(), "Archival service started");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(n)) => {
                            tracing::debug!(
                                missed = n,
                                "Archival service broadcast receiver lagged"
                            );
                        }
                    }
                }

                _ = ticker.tick() => self.run_cycle().await,
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::debug!("Archival service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![FlushService::NAME]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveConfig, ArchiveTier};
    use crate::catalog::{MetricCatalog, NewMetric};
    use crate::clock::{ManualClock, SharedClock, MILLIS_PER_DAY};
    use crate::storage::{SeriesInfo, TimeSeriesStore};
    use crate::types::{identify_series, Labels};

    #[tokio::test]
    async fn test_scheduled_cycle_archives_expired_points() {
        let now = 50 * MILLIS_PER_DAY;
        let clock: SharedClock = Arc::new(ManualClock::new(now));
        let catalog = Arc::new(MetricCatalog::new(30, clock.clone()));
        catalog
            .register(NewMetric::gauge("cpu").with_retention_days(1))
            .unwrap();
        let store = Arc::new(TimeSeriesStore::new());
        let labels = Labels::new();
        store.append_batch(
            SeriesInfo {
                key: identify_series("cpu", &labels),
                metric: "cpu".to_string(),
                labels,
                is_counter: false,
            },
            &[(now - 2 * MILLIS_PER_DAY, 1.0), (now, 2.0)],
        );
        let tier = Arc::new(ArchiveTier::new(&ArchiveConfig::default()));
        let migrator = Arc::new(ArchiveMigrator::new(store.clone(), catalog, tier.clone(), clock));

        let service = ArchivalService::new(migrator, Duration::from_millis(20));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move {
            service.start(rx).await.unwrap();
            service
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        let service = handle.await.unwrap();

        assert_eq!(service.status(), ServiceStatus::Stopped);
        assert_eq!(tier.stats().unwrap().total_rows_archived, 1);
        assert_eq!(store.stats().points, 1);
    }
}
