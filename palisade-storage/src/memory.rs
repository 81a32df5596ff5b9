//! In-memory metadata store
//!
//! Used by tests and single-node deployments without `DATABASE_URL`. All
//! record-level rules are checked under a single write lock, which gives the
//! same atomicity as the partial unique indexes in PostgreSQL.

use crate::store::{abandoned_reason, FailoverClaim, MetadataStore};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palisade_core::{
    BackupExecution, BackupJob, DrConfiguration, DrScope, ExecutionStatus, FailoverEvent,
    HealthSnapshot, RecoveryTest, RegionId, ReplicationLink,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    configurations: HashMap<String, DrConfiguration>,
    jobs: HashMap<Uuid, BackupJob>,
    executions: HashMap<Uuid, BackupExecution>,
    links: HashMap<Uuid, ReplicationLink>,
    snapshots: Vec<HealthSnapshot>,
    failovers: HashMap<Uuid, FailoverEvent>,
    tests: HashMap<Uuid, RecoveryTest>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn put_configuration(&self, config: &DrConfiguration) -> Result<()> {
        self.state
            .write()
            .await
            .configurations
            .insert(config.scope.key(), config.clone());
        Ok(())
    }

    async fn get_configuration(&self, scope: &DrScope) -> Result<Option<DrConfiguration>> {
        Ok(self.state.read().await.configurations.get(&scope.key()).cloned())
    }

    async fn create_job(&self, job: &BackupJob) -> Result<()> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(Error::AlreadyExists(format!("Backup job {}", job.id)));
        }
        if state.jobs.values().any(|j| j.name == job.name) {
            return Err(Error::AlreadyExists(format!("Backup job named '{}'", job.name)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &BackupJob) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| Error::NotFound(format!("Backup job {}", job.id)))?;
        stored.next_execution = job.next_execution;
        stored.statistics = job.statistics.clone();
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<BackupJob> {
        self.state
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Backup job {}", id)))
    }

    async fn list_jobs(&self) -> Result<Vec<BackupJob>> {
        let jobs = self.state.read().await.jobs.values().cloned().collect();
        Ok(sorted_by(jobs, |j: &BackupJob| j.created_at))
    }

    async fn begin_execution(
        &self,
        execution: &BackupExecution,
        stale_before: DateTime<Utc>,
    ) -> Result<(Uuid, bool)> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&execution.job_id) {
            return Err(Error::NotFound(format!("Backup job {}", execution.job_id)));
        }
        if let Some(running) = state
            .executions
            .values_mut()
            .find(|e| e.job_id == execution.job_id && e.status == ExecutionStatus::Running)
        {
            if running.started_at >= stale_before {
                return Ok((running.id, false));
            }
            running
                .fail(abandoned_reason(stale_before), execution.started_at)
                .map_err(|e| Error::Internal(e.to_string()))?;
        }
        state.executions.insert(execution.id, execution.clone());
        Ok((execution.id, true))
    }

    async fn finalize_execution(&self, execution: &BackupExecution) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .executions
            .get_mut(&execution.id)
            .ok_or_else(|| Error::NotFound(format!("Backup execution {}", execution.id)))?;
        if stored.is_finalized() {
            return Err(Error::InvalidState(format!(
                "Backup execution {} is already {}",
                execution.id,
                stored.status.as_str()
            )));
        }
        if !execution.is_finalized() {
            return Err(Error::InvalidState(format!(
                "Backup execution {} is still running",
                execution.id
            )));
        }
        *stored = execution.clone();
        Ok(())
    }

    async fn mark_recovery_tested(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .executions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Backup execution {}", id)))?;
        if !stored.is_successful() {
            return Err(Error::InvalidState(format!(
                "Backup execution {} did not complete",
                id
            )));
        }
        stored.recovery_tested = true;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<BackupExecution> {
        self.state
            .read()
            .await
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Backup execution {}", id)))
    }

    async fn running_execution(&self, job_id: Uuid) -> Result<Option<BackupExecution>> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .values()
            .find(|e| e.job_id == job_id && e.status == ExecutionStatus::Running)
            .cloned())
    }

    async fn list_executions(&self, job_id: Uuid) -> Result<Vec<BackupExecution>> {
        let executions = self
            .state
            .read()
            .await
            .executions
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        Ok(sorted_by(executions, |e: &BackupExecution| e.started_at))
    }

    async fn delete_execution(&self, id: Uuid) -> Result<()> {
        self.state
            .write()
            .await
            .executions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Backup execution {}", id)))
    }

    async fn count_failed_executions_since(&self, since: DateTime<Utc>) -> Result<u32> {
        let count = self
            .state
            .read()
            .await
            .executions
            .values()
            .filter(|e| {
                e.status == ExecutionStatus::Failed
                    && e.completed_at.map(|at| at >= since).unwrap_or(false)
            })
            .count();
        Ok(count as u32)
    }

    async fn upsert_link(&self, link: &ReplicationLink) -> Result<()> {
        self.state.write().await.links.insert(link.id, link.clone());
        Ok(())
    }

    async fn get_link(&self, id: Uuid) -> Result<ReplicationLink> {
        self.state
            .read()
            .await
            .links
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Replication link {}", id)))
    }

    async fn find_link(
        &self,
        primary: &RegionId,
        replica: &RegionId,
    ) -> Result<Option<ReplicationLink>> {
        Ok(self
            .state
            .read()
            .await
            .links
            .values()
            .filter(|l| &l.primary == primary && &l.replica == replica)
            .max_by_key(|l| l.established_at)
            .cloned())
    }

    async fn links_for_primary(&self, primary: &RegionId) -> Result<Vec<ReplicationLink>> {
        let links = self
            .state
            .read()
            .await
            .links
            .values()
            .filter(|l| &l.primary == primary)
            .cloned()
            .collect();
        Ok(sorted_by(links, |l: &ReplicationLink| l.established_at))
    }

    async fn append_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()> {
        self.state.write().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self, primary: &RegionId) -> Result<Option<HealthSnapshot>> {
        Ok(self
            .state
            .read()
            .await
            .snapshots
            .iter()
            .filter(|s| &s.primary == primary)
            .max_by_key(|s| s.taken_at)
            .cloned())
    }

    async fn snapshots_since(
        &self,
        primary: &RegionId,
        since: DateTime<Utc>,
    ) -> Result<Vec<HealthSnapshot>> {
        let snapshots = self
            .state
            .read()
            .await
            .snapshots
            .iter()
            .filter(|s| &s.primary == primary && s.taken_at >= since)
            .cloned()
            .collect();
        Ok(sorted_by(snapshots, |s: &HealthSnapshot| s.taken_at))
    }

    async fn prune_snapshots(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s.taken_at >= cutoff);
        Ok((before - state.snapshots.len()) as u64)
    }

    async fn try_begin_failover(&self, event: &FailoverEvent) -> Result<FailoverClaim> {
        let mut state = self.state.write().await;
        if let Some(active) = state
            .failovers
            .values()
            .find(|e| e.source_region == event.source_region && e.is_active())
        {
            return Ok(FailoverClaim::Active(active.id));
        }
        if state.failovers.contains_key(&event.id) {
            return Err(Error::AlreadyExists(format!("Failover event {}", event.id)));
        }
        state.failovers.insert(event.id, event.clone());
        Ok(FailoverClaim::Claimed)
    }

    async fn record_failover(&self, event: &FailoverEvent) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .failovers
            .get_mut(&event.id)
            .ok_or_else(|| Error::NotFound(format!("Failover event {}", event.id)))?;
        if !stored.is_active() {
            return Err(Error::InvalidState(format!(
                "Failover event {} is terminal ({})",
                event.id, stored.state
            )));
        }
        *stored = event.clone();
        Ok(())
    }

    async fn get_failover(&self, id: Uuid) -> Result<FailoverEvent> {
        self.state
            .read()
            .await
            .failovers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Failover event {}", id)))
    }

    async fn active_failover(&self, source: &RegionId) -> Result<Option<FailoverEvent>> {
        Ok(self
            .state
            .read()
            .await
            .failovers
            .values()
            .find(|e| &e.source_region == source && e.is_active())
            .cloned())
    }

    async fn list_failovers(&self, source: Option<&RegionId>) -> Result<Vec<FailoverEvent>> {
        let events = self
            .state
            .read()
            .await
            .failovers
            .values()
            .filter(|e| source.map(|s| &e.source_region == s).unwrap_or(true))
            .cloned()
            .collect();
        Ok(sorted_by(events, |e: &FailoverEvent| e.started_at))
    }

    async fn create_test(&self, test: &RecoveryTest) -> Result<()> {
        let mut state = self.state.write().await;
        if state.tests.contains_key(&test.id) {
            return Err(Error::AlreadyExists(format!("Recovery test {}", test.id)));
        }
        state.tests.insert(test.id, test.clone());
        Ok(())
    }

    async fn record_test_result(&self, test: &RecoveryTest) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .tests
            .get_mut(&test.id)
            .ok_or_else(|| Error::NotFound(format!("Recovery test {}", test.id)))?;
        if stored.is_finalized() {
            return Err(Error::InvalidState(format!(
                "Recovery test {} is already finalized",
                test.id
            )));
        }
        *stored = test.clone();
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<RecoveryTest> {
        self.state
            .read()
            .await
            .tests
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Recovery test {}", id)))
    }

    async fn due_tests(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryTest>> {
        let tests = self
            .state
            .read()
            .await
            .tests
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        Ok(sorted_by(tests, |t: &RecoveryTest| t.scheduled_for))
    }

    async fn list_tests(&self) -> Result<Vec<RecoveryTest>> {
        let tests = self.state.read().await.tests.values().cloned().collect();
        Ok(sorted_by(tests, |t: &RecoveryTest| t.created_at))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
