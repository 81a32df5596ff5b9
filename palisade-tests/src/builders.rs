//! Harness wiring every runtime service around in-memory storage and fakes

use crate::fixtures::{self, region};
use crate::mocks::{
    FakeBackupSource, FakeEnvironment, FakeFeed, FakeMetrics, FakeRegionControl, FakeRouter,
    RecordingNotifier, SwitchableObjectStore, SwitchableStore,
};
use palisade_core::{
    BackupExecution, BackupType, DrScope, FailoverEvent, FailoverState, ReplicationMode,
};
use palisade_runtime::{
    BackupService, ConfigRegistry, DrillRig, FailoverOrchestrator, FailoverSettings,
    HealthMonitor, RecoveryTestRunner, ReplicationManager, RetentionSweeper, RetryPolicy,
};
use palisade_storage::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// How long the polling helpers wait before giving up
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Builder for [`Harness`]
pub struct HarnessBuilder {
    failover_settings: FailoverSettings,
    retry: RetryPolicy,
    drill: bool,
    stale_execution_after: Option<Duration>,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            failover_settings: fixtures::fast_failover_settings(),
            retry: RetryPolicy::none(),
            drill: true,
            stale_execution_after: None,
        }
    }
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failover_settings(mut self, settings: FailoverSettings) -> Self {
        self.failover_settings = settings;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Leave the recovery runner without a drill rig
    pub fn without_drills(mut self) -> Self {
        self.drill = false;
        self
    }

    pub fn with_stale_execution_after(mut self, after: Duration) -> Self {
        self.stale_execution_after = Some(after);
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(SwitchableStore::new());
        let objects = Arc::new(SwitchableObjectStore::new());
        let source = Arc::new(FakeBackupSource::new());
        let feed = Arc::new(FakeFeed::new());
        let control = Arc::new(FakeRegionControl::new());
        let router = Arc::new(FakeRouter::new());
        let metrics = Arc::new(FakeMetrics::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let environment = Arc::new(FakeEnvironment::new());

        let registry = ConfigRegistry::new(store.clone());
        let replication = ReplicationManager::new(store.clone(), feed.clone())
            .with_retry_policy(self.retry.clone());
        let mut backups = BackupService::new(
            store.clone(),
            objects.clone(),
            source.clone(),
            notifier.clone(),
        );
        if let Some(after) = self.stale_execution_after {
            backups = backups.with_stale_execution_after(after);
        }
        let health = HealthMonitor::new(
            store.clone(),
            metrics.clone(),
            replication.clone(),
            notifier.clone(),
        )
        .with_retry_policy(self.retry.clone());
        let failover = FailoverOrchestrator::new(
            store.clone(),
            replication.clone(),
            control.clone(),
            router.clone(),
            notifier.clone(),
            registry.clone(),
            DrScope::System,
        )
        .with_settings(self.failover_settings.clone());

        // Drills get their own store and collaborators, sharing only the notifier
        let drill = Drill::new();
        let drill_registry = ConfigRegistry::new(drill.store.clone());
        let drill_failover = FailoverOrchestrator::new(
            drill.store.clone(),
            ReplicationManager::new(drill.store.clone(), drill.feed.clone()),
            drill.control.clone(),
            drill.router.clone(),
            notifier.clone(),
            drill_registry,
            DrScope::System,
        )
        .with_settings(self.failover_settings);

        let mut recovery = RecoveryTestRunner::new(
            store.clone(),
            objects.clone(),
            environment.clone(),
            notifier.clone(),
            registry.clone(),
            DrScope::System,
        )
        .with_retry_policy(self.retry);
        if self.drill {
            recovery = recovery
                .with_drill_rig(DrillRig::new(fixtures::staging(), drill_failover))
                .expect("drill rig has its own store");
        }
        let retention = RetentionSweeper::new(store.clone(), objects.clone());

        Harness {
            store,
            objects,
            source,
            feed,
            control,
            router,
            metrics,
            notifier,
            environment,
            registry,
            replication,
            backups,
            health,
            failover,
            recovery,
            retention,
            drill,
        }
    }
}

/// Fakes behind the drill rig, standing in for the staging environment
pub struct Drill {
    pub store: Arc<MemoryStore>,
    pub feed: Arc<FakeFeed>,
    pub control: Arc<FakeRegionControl>,
    pub router: Arc<FakeRouter>,
}

impl Drill {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            feed: Arc::new(FakeFeed::new()),
            control: Arc::new(FakeRegionControl::new()),
            router: Arc::new(FakeRouter::new()),
        }
    }
}

/// Every runtime service plus handles on the fakes behind them
pub struct Harness {
    pub store: Arc<SwitchableStore>,
    pub objects: Arc<SwitchableObjectStore>,
    pub source: Arc<FakeBackupSource>,
    pub feed: Arc<FakeFeed>,
    pub control: Arc<FakeRegionControl>,
    pub router: Arc<FakeRouter>,
    pub metrics: Arc<FakeMetrics>,
    pub notifier: Arc<RecordingNotifier>,
    pub environment: Arc<FakeEnvironment>,
    pub registry: ConfigRegistry,
    pub replication: ReplicationManager,
    pub backups: BackupService,
    pub health: HealthMonitor,
    pub failover: FailoverOrchestrator,
    pub recovery: RecoveryTestRunner,
    pub retention: RetentionSweeper,
    pub drill: Drill,
}

impl Harness {
    /// Harness with fast failover settings and no read retries
    pub fn new() -> Self {
        HarnessBuilder::default().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::new()
    }

    /// Link the default primary to both replicas. Returns the link ids as
    /// `(preferred, fallback)`.
    pub async fn establish_default_topology(&self) -> (Uuid, Uuid) {
        let primary = region::primary();
        let preferred = self
            .replication
            .establish_link(&primary, &region::replica(), ReplicationMode::Async)
            .await
            .expect("link to preferred replica");
        let fallback = self
            .replication
            .establish_link(&primary, &region::fallback(), ReplicationMode::Async)
            .await
            .expect("link to fallback replica");
        (preferred, fallback)
    }

    /// Start an execution and wait for it to be finalized and counted in the
    /// job's statistics
    pub async fn run_backup(
        &self,
        job_id: Uuid,
        type_override: Option<BackupType>,
    ) -> BackupExecution {
        let runs_before = self.total_runs(job_id).await;
        let execution_id = self
            .backups
            .execute_now(job_id, type_override)
            .await
            .expect("execution starts");
        let execution = self.wait_for_execution(execution_id).await;

        let deadline = Instant::now() + WAIT_LIMIT;
        while self.total_runs(job_id).await <= runs_before {
            assert!(
                Instant::now() < deadline,
                "statistics of job {} never recorded execution {}",
                job_id,
                execution_id
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        execution
    }

    async fn total_runs(&self, job_id: Uuid) -> u64 {
        self.backups
            .get_job(job_id)
            .await
            .expect("job exists")
            .statistics
            .total_runs
    }

    /// Poll an execution until it leaves `running`
    pub async fn wait_for_execution(&self, execution_id: Uuid) -> BackupExecution {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let execution = self
                .backups
                .execution_status(execution_id)
                .await
                .expect("execution exists");
            if execution.is_finalized() {
                return execution;
            }
            assert!(
                Instant::now() < deadline,
                "execution {} still running after {:?}",
                execution_id,
                WAIT_LIMIT
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll a failover until it has reached `state`
    pub async fn wait_for_state(&self, event_id: Uuid, state: FailoverState) -> FailoverEvent {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let event = self
                .failover
                .get_event(event_id)
                .await
                .expect("failover event exists");
            if event.path().contains(&state) {
                return event;
            }
            assert!(
                Instant::now() < deadline,
                "failover {} never reached {} (now {})",
                event_id,
                state,
                event.state
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
