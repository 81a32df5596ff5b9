//! Wiring of the engine components behind the daemon

use crate::config::WorkerConfig;
use crate::handler::AppState;
use anyhow::{anyhow, Context, Result};
use palisade_core::DrScope;
use palisade_runtime::collaborators::{
    BackupSource, ConnectionRouter, MetricsSource, Notifier, RecoveryEnvironment, RegionControl,
    ReplicationFeed,
};
use palisade_runtime::{
    BackupService, ConfigRegistry, DrillRig, Engine, EngineSettings, FailoverOrchestrator,
    HealthMonitor, RecoveryTestRunner, ReplicationManager, RetentionSweeper,
};
use palisade_storage::{MemoryStore, MetadataStore, ObjectStore};
use std::sync::Arc;

/// Every component the daemon runs, sharing one store and one control plane
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn MetadataStore>,
    pub registry: ConfigRegistry,
    pub replication: ReplicationManager,
    pub backups: BackupService,
    pub health: HealthMonitor,
    pub failover: FailoverOrchestrator,
    pub recovery: RecoveryTestRunner,
    pub engine: Engine,
}

impl Services {
    /// Build all components. `control` serves every collaborator contract.
    ///
    /// `drill_control` is the control plane scoped to the configured drill
    /// environment. Drills get their own in-memory store, registry and
    /// replication manager over it, so they never claim production regions
    /// or links. Notifications still go through `control`.
    pub fn wire<C>(
        config: &WorkerConfig,
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        control: Arc<C>,
        drill_control: Option<Arc<C>>,
    ) -> Result<Self>
    where
        C: ConnectionRouter
            + MetricsSource
            + Notifier
            + RegionControl
            + ReplicationFeed
            + BackupSource
            + RecoveryEnvironment
            + 'static,
    {
        let scope = config
            .tenant
            .clone()
            .map(DrScope::Tenant)
            .unwrap_or(DrScope::System);

        let registry = ConfigRegistry::new(store.clone());
        let replication = ReplicationManager::new(store.clone(), control.clone())
            .with_sync_switch_max_lag(config.sync_switch_max_lag);
        let backups = BackupService::new(
            store.clone(),
            objects.clone(),
            control.clone(),
            control.clone(),
        );
        let health = HealthMonitor::new(
            store.clone(),
            control.clone(),
            replication.clone(),
            control.clone(),
        );
        let failover = FailoverOrchestrator::new(
            store.clone(),
            replication.clone(),
            control.clone(),
            control.clone(),
            control.clone(),
            registry.clone(),
            scope.clone(),
        );
        let mut recovery = RecoveryTestRunner::new(
            store.clone(),
            objects.clone(),
            control.clone(),
            control.clone(),
            registry.clone(),
            scope.clone(),
        );
        match (&config.drill_environment, drill_control) {
            (Some(environment), Some(drill_control)) => {
                let drill_store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
                let drill_failover = FailoverOrchestrator::new(
                    drill_store.clone(),
                    ReplicationManager::new(drill_store.clone(), drill_control.clone()),
                    drill_control.clone(),
                    drill_control,
                    control,
                    ConfigRegistry::new(drill_store),
                    scope,
                );
                recovery = recovery
                    .with_drill_rig(DrillRig::new(environment.clone(), drill_failover))
                    .context("Failed to set up the drill rig")?;
            }
            (Some(environment), None) => {
                return Err(anyhow!(
                    "drill environment {} has no scoped control plane",
                    environment
                ));
            }
            (None, _) => {}
        }
        let retention = RetentionSweeper::new(store.clone(), objects);

        let engine = Engine::new(
            backups.clone(),
            health.clone(),
            failover.clone(),
            recovery.clone(),
            retention,
            EngineSettings {
                primary_regions: config.primary_regions.clone(),
                scheduler_tick: config.scheduler_tick,
                health_interval: config.health_interval,
                recovery_tick: config.recovery_tick,
                retention_sweep: config.retention_sweep,
                ..EngineSettings::default()
            },
        );

        Ok(Self {
            store,
            registry,
            replication,
            backups,
            health,
            failover,
            recovery,
            engine,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            store: self.store.clone(),
            backups: self.backups.clone(),
            failover: self.failover.clone(),
        }
    }
}
