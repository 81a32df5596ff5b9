//! Health monitor
//!
//! Produces immutable, append-only [`HealthSnapshot`]s. The failover
//! orchestrator consumes snapshots only, never raw metrics.

use crate::collaborators::{notify_best_effort, AlertSeverity, MetricsSource, Notifier};
use crate::metrics::HEALTH_SEVERITY;
use crate::replication::ReplicationManager;
use crate::retry::{retry_transient, RetryPolicy};
use crate::{map_storage_error, Result};
use chrono::{DateTime, Duration, Utc};
use palisade_core::{HealthInputs, HealthSnapshot, HealthThresholds, RegionId, Severity};
use palisade_storage::MetadataStore;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn MetadataStore>,
    metrics: Arc<dyn MetricsSource>,
    replication: ReplicationManager,
    notifier: Arc<dyn Notifier>,
    thresholds: HealthThresholds,
    retry: RetryPolicy,
    snapshot_retention: Duration,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        metrics: Arc<dyn MetricsSource>,
        replication: ReplicationManager,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            metrics,
            replication,
            notifier,
            thresholds: HealthThresholds::default(),
            retry: RetryPolicy::default(),
            snapshot_retention: Duration::days(7),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_snapshot_retention(mut self, retention: Duration) -> Self {
        self.snapshot_retention = retention;
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Sample, classify and persist the health of `primary`
    #[instrument(skip(self), fields(region = %primary))]
    pub async fn snapshot(&self, primary: &RegionId) -> Result<HealthSnapshot> {
        let now = Utc::now();

        let raw = retry_transient(&self.retry, "metrics.sample", || {
            self.metrics.sample(primary)
        })
        .await?;
        let max_replication_lag = self.replication.max_lag_for_primary(primary).await?;

        let since = now - Duration::hours(24);
        let failed_backups_24h = retry_transient(&self.retry, "store.count_failed", || {
            self.store.count_failed_executions_since(since)
        })
        .await
        .map_err(|e| map_storage_error(e, "Failed to count failed backups"))?;

        let jobs = retry_transient(&self.retry, "store.list_jobs", || self.store.list_jobs())
            .await
            .map_err(|e| map_storage_error(e, "Failed to list backup jobs"))?;
        let consecutive_backup_failures = jobs
            .iter()
            .map(|job| job.statistics.consecutive_failures)
            .max()
            .unwrap_or(0);

        let previous = retry_transient(&self.retry, "store.latest_snapshot", || {
            self.store.latest_snapshot(primary)
        })
        .await
        .map_err(|e| map_storage_error(e, "Failed to load latest snapshot"))?;

        let snapshot = HealthSnapshot::evaluate(
            primary.clone(),
            HealthInputs {
                active_connections: raw.active_connections,
                max_replication_lag,
                saturation: raw.saturation,
                failed_backups_24h,
                consecutive_backup_failures,
            },
            &self.thresholds,
            now,
        );

        self.store
            .append_snapshot(&snapshot)
            .await
            .map_err(|e| map_storage_error(e, "Failed to append health snapshot"))?;

        HEALTH_SEVERITY
            .with_label_values(&[primary.as_str()])
            .set(severity_level(snapshot.severity));

        let escalated = snapshot.severity == Severity::Critical
            && previous
                .map(|p| p.severity != Severity::Critical)
                .unwrap_or(true);
        if escalated {
            warn!(signals = ?snapshot.signals, "Region health is critical");
            notify_best_effort(
                &self.notifier,
                AlertSeverity::Critical,
                &format!("Region {} health is critical", primary),
                json!({
                    "region": primary.as_str(),
                    "snapshot_id": snapshot.id,
                    "signals": snapshot.signals,
                    "failover_recommended": snapshot.failover_recommended,
                }),
            )
            .await;
        }

        info!(
            snapshot_id = %snapshot.id,
            severity = snapshot.severity.as_str(),
            failover_recommended = snapshot.failover_recommended,
            "Health snapshot recorded"
        );
        Ok(snapshot)
    }

    /// Latest committed snapshot for `primary`
    pub async fn latest(&self, primary: &RegionId) -> Result<Option<HealthSnapshot>> {
        self.store
            .latest_snapshot(primary)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load latest snapshot"))
    }

    /// Drop snapshots older than the retention window
    #[instrument(skip(self))]
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = self
            .store
            .prune_snapshots(now - self.snapshot_retention)
            .await
            .map_err(|e| map_storage_error(e, "Failed to prune health snapshots"))?;
        if removed > 0 {
            info!(removed, "Pruned health snapshots");
        }
        Ok(removed)
    }
}

fn severity_level(severity: Severity) -> i64 {
    match severity {
        Severity::Healthy => 0,
        Severity::Warning => 1,
        Severity::Critical => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        CollaboratorError, CollaboratorResult, FeedPositions, RawMetrics, ReplicationFeed,
    };
    use async_trait::async_trait;
    use palisade_core::{ReplicationMode, ResourceSaturation};
    use palisade_storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedMetrics(f64);

    #[async_trait]
    impl MetricsSource for FixedMetrics {
        async fn sample(&self, _region: &RegionId) -> CollaboratorResult<RawMetrics> {
            Ok(RawMetrics {
                active_connections: 12,
                saturation: ResourceSaturation::uniform(self.0),
            })
        }
    }

    struct NoFeed;

    #[async_trait]
    impl ReplicationFeed for NoFeed {
        async fn create_slot(
            &self,
            _primary: &RegionId,
            _replica: &RegionId,
            _mode: ReplicationMode,
        ) -> CollaboratorResult<String> {
            Err(CollaboratorError::Rejected("no feed".into()))
        }

        async fn set_mode(&self, _slot: &str, _mode: ReplicationMode) -> CollaboratorResult<()> {
            Err(CollaboratorError::Rejected("no feed".into()))
        }

        async fn positions(&self, _slot: &str) -> CollaboratorResult<FeedPositions> {
            Err(CollaboratorError::Rejected("no feed".into()))
        }
    }

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(
            &self,
            _severity: AlertSeverity,
            _message: &str,
            _context: serde_json::Value,
        ) -> CollaboratorResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn monitor(
        saturation: f64,
        notifier: Arc<CountingNotifier>,
    ) -> (HealthMonitor, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let replication = ReplicationManager::new(store.clone(), Arc::new(NoFeed));
        let monitor = HealthMonitor::new(
            store.clone(),
            Arc::new(FixedMetrics(saturation)),
            replication,
            notifier,
        );
        (monitor, store)
    }

    #[tokio::test]
    async fn test_snapshot_is_persisted() {
        let (monitor, _store) = monitor(40.0, Arc::default());
        let region = RegionId::new("us-east").unwrap();

        let snapshot = monitor.snapshot(&region).await.unwrap();
        assert_eq!(snapshot.severity, Severity::Healthy);
        assert_eq!(snapshot.active_connections, 12);
        assert_eq!(snapshot.max_replication_lag, None);
        assert_eq!(monitor.latest(&region).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_critical_escalation_notifies_once() {
        let notifier = Arc::new(CountingNotifier::default());
        let (monitor, _store) = monitor(95.0, notifier.clone());
        let region = RegionId::new("us-east").unwrap();

        assert_eq!(monitor.snapshot(&region).await.unwrap().severity, Severity::Critical);
        assert_eq!(monitor.snapshot(&region).await.unwrap().severity, Severity::Critical);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prune_removes_old_snapshots() {
        let (monitor, _store) = monitor(40.0, Arc::default());
        let region = RegionId::new("us-east").unwrap();
        monitor.snapshot(&region).await.unwrap();

        assert_eq!(monitor.prune(Utc::now()).await.unwrap(), 0);
        assert_eq!(monitor.prune(Utc::now() + Duration::days(8)).await.unwrap(), 1);
        assert_eq!(monitor.latest(&region).await.unwrap(), None);
    }
}
