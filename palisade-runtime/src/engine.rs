//! Engine task loop
//!
//! Periodic tickers enqueue [`EngineTask`]s onto a bounded work queue and a
//! dispatcher runs each task on its own tokio task. Every task is idempotent,
//! so a tick dropped while the queue is full is simply picked up by the next.

use crate::backup::BackupService;
use crate::failover::FailoverOrchestrator;
use crate::health::HealthMonitor;
use crate::metrics::ENGINE_TASKS_TOTAL;
use crate::recovery::RecoveryTestRunner;
use crate::retention::RetentionSweeper;
use crate::Result;
use chrono::Utc;
use palisade_core::RegionId;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Unit of background work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineTask {
    /// Start due backup jobs
    BackupTick,
    /// Snapshot a primary region and act on the result
    HealthCheck(RegionId),
    /// Run due recovery tests
    RecoveryTick,
    /// Expire backups and prune health snapshots
    RetentionSweep,
}

impl EngineTask {
    pub fn name(&self) -> &'static str {
        match self {
            EngineTask::BackupTick => "backup_tick",
            EngineTask::HealthCheck(_) => "health_check",
            EngineTask::RecoveryTick => "recovery_tick",
            EngineTask::RetentionSweep => "retention_sweep",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Regions whose health is monitored
    pub primary_regions: Vec<RegionId>,
    pub scheduler_tick: Duration,
    pub health_interval: Duration,
    pub recovery_tick: Duration,
    pub retention_sweep: Duration,
    pub queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            primary_regions: Vec::new(),
            scheduler_tick: Duration::from_secs(60),
            health_interval: Duration::from_secs(300),
            recovery_tick: Duration::from_secs(300),
            retention_sweep: Duration::from_secs(3600),
            queue_capacity: 64,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    backups: BackupService,
    health: HealthMonitor,
    failover: FailoverOrchestrator,
    recovery: RecoveryTestRunner,
    retention: RetentionSweeper,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        backups: BackupService,
        health: HealthMonitor,
        failover: FailoverOrchestrator,
        recovery: RecoveryTestRunner,
        retention: RetentionSweeper,
        settings: EngineSettings,
    ) -> Self {
        Self {
            backups,
            health,
            failover,
            recovery,
            retention,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one task to completion
    pub async fn execute(&self, task: &EngineTask) -> Result<()> {
        let now = Utc::now();
        match task {
            EngineTask::BackupTick => {
                let started = self.backups.tick(now).await?;
                debug!(started = started.len(), "Backup tick finished");
            }
            EngineTask::HealthCheck(region) => {
                let snapshot = self.health.snapshot(region).await?;
                if let Some((event_id, _handle)) = self.failover.handle_snapshot(&snapshot).await? {
                    info!(event_id = %event_id, region = %region, "Automatic failover started");
                }
            }
            EngineTask::RecoveryTick => {
                let finished = self.recovery.run_due(now).await?;
                debug!(finished = finished.len(), "Recovery tick finished");
            }
            EngineTask::RetentionSweep => {
                self.retention.sweep(now).await?;
                self.health.prune(now).await?;
            }
        }
        Ok(())
    }

    /// Run tickers and the dispatcher until `shutdown` flips to true, then
    /// wait for tasks already dispatched
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel(self.settings.queue_capacity);

        let mut tickers = JoinSet::new();
        let mut schedule = vec![
            (EngineTask::BackupTick, self.settings.scheduler_tick),
            (EngineTask::RecoveryTick, self.settings.recovery_tick),
            (EngineTask::RetentionSweep, self.settings.retention_sweep),
        ];
        let health_interval = self.settings.health_interval;
        schedule.extend(
            self.settings
                .primary_regions
                .iter()
                .map(|region| (EngineTask::HealthCheck(region.clone()), health_interval)),
        );
        for (task, period) in schedule {
            tickers.spawn(ticker(tx.clone(), task, period, shutdown.clone()));
        }
        drop(tx);

        info!(
            regions = self.settings.primary_regions.len(),
            "Engine started"
        );

        let mut running = JoinSet::new();
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = rx.recv() => match next {
                    Some(task) => {
                        let engine = self.clone();
                        running.spawn(async move { engine.dispatch(task).await });
                    }
                    None => break,
                },
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Engine task panicked");
                    }
                }
            }
        }

        info!(in_flight = running.len(), "Engine stopping, waiting for running tasks");
        tickers.abort_all();
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Engine task panicked");
            }
        }
        info!("Engine stopped");
    }

    async fn dispatch(&self, task: EngineTask) {
        match self.execute(&task).await {
            Ok(()) => {
                ENGINE_TASKS_TOTAL.with_label_values(&[task.name(), "ok"]).inc();
            }
            Err(e) => {
                ENGINE_TASKS_TOTAL.with_label_values(&[task.name(), "error"]).inc();
                warn!(task = task.name(), error = %e, "Engine task failed");
            }
        }
    }
}

async fn ticker(
    tx: mpsc::Sender<EngineTask>,
    task: EngineTask,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => match tx.try_send(task.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(task = task.name(), "Work queue full, skipping tick");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
}
