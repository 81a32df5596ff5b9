//! Recovery test runner
//!
//! Exercises restores and failover drills against non-production
//! environments only; a [`RecoveryTest`] cannot be built without a validated
//! [`Environment`]. Expected failures (a missing backup, a failed drill) are
//! recorded on the test. Only an unreachable object store during
//! restore verification surfaces as an error, after the test is recorded as
//! failed.

use crate::collaborators::{
    notify_best_effort, AlertSeverity, Notifier, RecoveryEnvironment, RestoreArtifact,
};
use crate::config_registry::ConfigRegistry;
use crate::failover::{FailoverOrchestrator, FailoverRequest};
use crate::replication::ReplicationManager;
use crate::metrics::RECOVERY_TESTS_TOTAL;
use crate::retry::{retry_transient, RetryPolicy};
use crate::{map_storage_error, Error, Result};
use chrono::{DateTime, Utc};
use palisade_core::{
    non_negative, BackupExecution, BackupType, CronSchedule, DrScope, Environment, RecoveryTest,
    RegionId, ReplicationMode, ScenarioType, TestMeasurements, TriggerType,
};
use palisade_storage::{MetadataStore, ObjectStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Parameters for scheduling a recovery test
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub scenario: ScenarioType,
    pub environment: Environment,
    /// Job whose backups are restored; required by every scenario except `failover`
    pub backup_job_id: Option<Uuid>,
    /// Recurring tests schedule their next occurrence when finalized
    pub cadence: Option<CronSchedule>,
    /// Defaults to now (ad-hoc)
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// What a scenario observed
#[derive(Debug, Default)]
struct Observation {
    /// Latest change known to be recovered, relative to the recovery point
    rpo: Duration,
    integrity: bool,
    issues: Vec<String>,
    /// Executions restored successfully
    restored: Vec<Uuid>,
}

impl Observation {
    fn failed(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
            ..Default::default()
        }
    }
}

/// Failover stack bound to one non-production environment. Its orchestrator
/// runs over its own metadata store, replication manager, region control
/// and router; drills never reach the production ones.
#[derive(Clone)]
pub struct DrillRig {
    environment: Environment,
    orchestrator: FailoverOrchestrator,
}

impl DrillRig {
    pub fn new(environment: Environment, orchestrator: FailoverOrchestrator) -> Self {
        Self {
            environment,
            orchestrator,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn orchestrator(&self) -> &FailoverOrchestrator {
        &self.orchestrator
    }

    fn replication(&self) -> &ReplicationManager {
        self.orchestrator.replication()
    }
}

#[derive(Clone)]
pub struct RecoveryTestRunner {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    environment: Arc<dyn RecoveryEnvironment>,
    notifier: Arc<dyn Notifier>,
    registry: ConfigRegistry,
    scope: DrScope,
    drill: Option<DrillRig>,
    retry: RetryPolicy,
}

impl RecoveryTestRunner {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        environment: Arc<dyn RecoveryEnvironment>,
        notifier: Arc<dyn Notifier>,
        registry: ConfigRegistry,
        scope: DrScope,
    ) -> Self {
        Self {
            store,
            objects,
            environment,
            notifier,
            registry,
            scope,
            drill: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Rig used by `failover` and `full_disaster` drills.
    ///
    /// # Errors
    ///
    /// `Configuration` if the rig's orchestrator records its events in the
    /// runner's own metadata store
    pub fn with_drill_rig(mut self, rig: DrillRig) -> Result<Self> {
        if rig.orchestrator.shares_store(&self.store) {
            return Err(Error::Configuration(format!(
                "drill rig for {} must not share the production metadata store",
                rig.environment
            )));
        }
        self.drill = Some(rig);
        Ok(self)
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate prerequisites and store a scheduled test. Expected RTO/RPO
    /// come from the configuration in force for the runner's scope.
    #[instrument(
        skip(self, request),
        fields(scenario = request.scenario.as_str(), environment = %request.environment)
    )]
    pub async fn schedule_test(&self, request: TestRequest) -> Result<Uuid> {
        let needs_backup = !matches!(request.scenario, ScenarioType::Failover);
        let needs_drill = matches!(
            request.scenario,
            ScenarioType::Failover | ScenarioType::FullDisaster
        );

        match (needs_backup, request.backup_job_id) {
            (true, None) => {
                return Err(Error::Configuration(format!(
                    "{} test requires a backup job",
                    request.scenario.as_str()
                )))
            }
            (_, Some(job_id)) => {
                self.store.get_job(job_id).await.map_err(|e| match e {
                    palisade_storage::Error::NotFound(_) => {
                        Error::Configuration(format!("backup job {} does not exist", job_id))
                    }
                    e => map_storage_error(e, "Failed to load backup job"),
                })?;
            }
            (false, None) => {}
        }
        if needs_drill {
            match &self.drill {
                None => {
                    return Err(Error::Configuration(format!(
                        "{} test requires a drill topology",
                        request.scenario.as_str()
                    )))
                }
                Some(rig) if rig.environment != request.environment => {
                    return Err(Error::Configuration(format!(
                        "drills run only in environment {}, not {}",
                        rig.environment, request.environment
                    )))
                }
                Some(_) => {}
            }
        }

        let config = self.registry.effective(&self.scope).await?;
        let test = RecoveryTest::scheduled(
            self.scope.clone(),
            request.scenario,
            request.environment,
            request.backup_job_id,
            request.cadence,
            request.scheduled_for.unwrap_or_else(Utc::now),
            config.rto(),
            config.rpo(),
        );
        self.store
            .create_test(&test)
            .await
            .map_err(|e| map_storage_error(e, "Failed to store recovery test"))?;

        info!(test_id = %test.id, scheduled_for = %test.scheduled_for, "Recovery test scheduled");
        Ok(test.id)
    }

    /// Execute a scheduled test and record its outcome
    #[instrument(skip(self), fields(test_id = %test_id))]
    pub async fn run_test(&self, test_id: Uuid) -> Result<RecoveryTest> {
        let mut test = self
            .store
            .get_test(test_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load recovery test"))?;
        if test.is_finalized() {
            return Err(Error::InvalidState(format!(
                "recovery test {} already finalized as {}",
                test_id,
                test.status.as_str()
            )));
        }

        let (_lease, _config) = self.registry.lease(&self.scope).await?;
        let started = Instant::now();
        let now = Utc::now();

        let observed = match &test.scenario {
            ScenarioType::BackupRestore => self.backup_restore(&test, now).await,
            ScenarioType::PointInTime { target } => {
                self.point_in_time(&test, target.resolve(now)).await
            }
            ScenarioType::Failover => self.failover_drill(&test).await,
            ScenarioType::FullDisaster => self.full_disaster(&test, now).await,
        };

        let (observation, fatal) = match observed {
            Ok(observation) => (observation, None),
            Err(e @ Error::StorageUnavailable(_)) => {
                (Observation::failed(e.to_string()), Some(e))
            }
            Err(e) => (Observation::failed(e.to_string()), None),
        };

        let measurements = TestMeasurements {
            actual_rto: started.elapsed(),
            actual_rpo: observation.rpo,
            data_integrity_verified: observation.integrity,
            issues_found: observation.issues,
        };
        let passed = test.finalize(measurements, Utc::now())?;
        self.store
            .record_test_result(&test)
            .await
            .map_err(|e| map_storage_error(e, "Failed to record recovery test result"))?;

        RECOVERY_TESTS_TOTAL
            .with_label_values(&[test.scenario.as_str(), test.status.as_str()])
            .inc();
        info!(
            passed,
            actual_rto_ms = test.actual_rto.unwrap_or_default().as_millis() as u64,
            actual_rpo_secs = test.actual_rpo.unwrap_or_default().as_secs(),
            issues = test.issues_found.len(),
            "Recovery test finished"
        );

        if passed {
            for execution_id in &observation.restored {
                if let Err(e) = self.store.mark_recovery_tested(*execution_id).await {
                    warn!(
                        execution_id = %execution_id,
                        error = %e,
                        "Failed to flag execution as recovery tested"
                    );
                }
            }
        } else {
            notify_best_effort(
                &self.notifier,
                AlertSeverity::Warning,
                &format!(
                    "Recovery test {} ({}) failed; remediation required",
                    test.id,
                    test.scenario.as_str()
                ),
                json!({
                    "test_id": test.id,
                    "scenario": test.scenario.as_str(),
                    "environment": test.environment.as_str(),
                    "issues": test.issues_found,
                    "remediation_required": test.remediation_required,
                }),
            )
            .await;
        }

        if let Some(next) = test.next_occurrence(Utc::now()) {
            match self.store.create_test(&next).await {
                Ok(()) => info!(
                    next_test_id = %next.id,
                    scheduled_for = %next.scheduled_for,
                    "Next recovery test scheduled"
                ),
                Err(e) => warn!(error = %e, "Failed to schedule next recovery test"),
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(test),
        }
    }

    /// Run every due test. A failing test does not stop the others.
    #[instrument(skip(self))]
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<RecoveryTest>> {
        let due = self
            .store
            .due_tests(now)
            .await
            .map_err(|e| map_storage_error(e, "Failed to list due recovery tests"))?;

        let mut finished = Vec::with_capacity(due.len());
        for test in due {
            match self.run_test(test.id).await {
                Ok(test) => finished.push(test),
                Err(e) => warn!(test_id = %test.id, error = %e, "Recovery test run failed"),
            }
        }
        Ok(finished)
    }

    pub async fn get_test(&self, test_id: Uuid) -> Result<RecoveryTest> {
        self.store
            .get_test(test_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load recovery test"))
    }

    async fn backup_restore(&self, test: &RecoveryTest, now: DateTime<Utc>) -> Result<Observation> {
        let chain = self.base_chain(test, None).await?;
        if chain.is_empty() {
            return Ok(Observation::failed("no successful full backup to restore"));
        }

        let expected_rows: u64 = chain.iter().map(|e| e.row_count).sum();
        let restored = self.restore(test, chain, None).await?;
        let mut observation = restored.observation;
        if let Some(rows) = restored.rows {
            if rows != expected_rows {
                observation.integrity = false;
                observation.issues.push(format!(
                    "row count mismatch: restored {}, expected {}",
                    rows, expected_rows
                ));
            }
        }
        if let Some(latest) = restored.latest_change {
            observation.rpo = non_negative(now - latest);
        }
        Ok(observation)
    }

    async fn point_in_time(
        &self,
        test: &RecoveryTest,
        target: DateTime<Utc>,
    ) -> Result<Observation> {
        let mut chain = self.base_chain(test, Some(target)).await?;
        if chain.is_empty() {
            return Ok(Observation::failed(format!(
                "no successful full backup taken before {}",
                target
            )));
        }

        let base_end = chain.last().and_then(|e| e.covers_until);
        chain.extend(self.log_archives(base_end, target).await?);

        let restored = self.restore(test, chain, Some(target)).await?;
        let mut observation = restored.observation;
        if let Some(latest) = restored.latest_change {
            if latest > target {
                observation.integrity = false;
                observation
                    .issues
                    .push(format!("restore replayed past target: {} > {}", latest, target));
            }
            observation.rpo = non_negative(target - latest);
        }
        Ok(observation)
    }

    async fn failover_drill(&self, test: &RecoveryTest) -> Result<Observation> {
        let Some(rig) = &self.drill else {
            return Ok(Observation::failed("no drill topology configured"));
        };
        if rig.environment != test.environment {
            return Ok(Observation::failed(format!(
                "drill rig is bound to {}, not {}",
                rig.environment, test.environment
            )));
        }
        let topology = match self.environment.drill_topology(&test.environment).await {
            Ok(topology) => topology,
            Err(e) => {
                return Ok(Observation::failed(format!("drill topology unavailable: {}", e)))
            }
        };

        let replicas = std::iter::once(&topology.replica).chain(topology.fallback.as_ref());
        for replica in replicas {
            if let Err(e) = self.link_drill_pair(rig, &topology.primary, replica).await {
                return Ok(Observation::failed(format!(
                    "drill link {} -> {} not established: {}",
                    topology.primary, replica, e
                )));
            }
        }

        let request = FailoverRequest {
            source: topology.primary,
            target: Some(topology.replica),
            trigger: TriggerType::Planned,
            initiated_by: "recovery-test".to_string(),
            reason: Some(format!("recovery test {}", test.id)),
            override_safety_checks: false,
            health_snapshot_id: None,
        };
        let event = match rig.orchestrator.trigger(request).await {
            Ok(event) => event,
            Err(e) => {
                return Ok(Observation::failed(format!("failover drill not started: {}", e)))
            }
        };

        if !event.completed {
            let detail = event
                .failure
                .or(event.abort_reason)
                .unwrap_or_else(|| "no detail".to_string());
            return Ok(Observation::failed(format!(
                "failover drill {} ended {}: {}",
                event.id, event.state, detail
            )));
        }

        match event.target_lag {
            Some(lag) => Ok(Observation {
                rpo: lag,
                integrity: true,
                ..Default::default()
            }),
            None => Ok(Observation::failed("failover drill did not measure replica lag")),
        }
    }

    /// Replicate `primary` to `replica` inside the drill environment, reusing
    /// the active link a previous drill left behind
    async fn link_drill_pair(
        &self,
        rig: &DrillRig,
        primary: &RegionId,
        replica: &RegionId,
    ) -> Result<Uuid> {
        rig.replication()
            .establish_link(primary, replica, ReplicationMode::Async)
            .await
    }

    async fn full_disaster(&self, test: &RecoveryTest, now: DateTime<Utc>) -> Result<Observation> {
        let restore = self.backup_restore(test, now).await?;
        let drill = self.failover_drill(test).await?;

        let mut issues = restore.issues;
        issues.extend(drill.issues);
        Ok(Observation {
            rpo: restore.rpo.max(drill.rpo),
            integrity: restore.integrity && drill.integrity,
            issues,
            restored: restore.restored,
        })
    }

    /// Latest successful full backup of the test's job taken no later than
    /// `cutoff`, followed by the incrementals built on top of it
    async fn base_chain(
        &self,
        test: &RecoveryTest,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<BackupExecution>> {
        let Some(job_id) = test.backup_job_id else {
            return Ok(Vec::new());
        };
        let executions = self.executions(job_id).await?;
        let within = |e: &&BackupExecution| {
            e.is_successful()
                && match (cutoff, e.covers_until) {
                    (Some(cutoff), Some(until)) => until <= cutoff,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
        };

        let Some(full) = executions
            .iter()
            .filter(within)
            .filter(|e| e.backup_type == BackupType::Full)
            .max_by_key(|e| e.started_at)
        else {
            return Ok(Vec::new());
        };

        let mut chain = vec![full.clone()];
        chain.extend(
            executions
                .iter()
                .filter(within)
                .filter(|e| {
                    e.backup_type == BackupType::Incremental && e.started_at > full.started_at
                })
                .cloned(),
        );
        Ok(chain)
    }

    /// Log archives from every job that extend past `after` and start
    /// before `target`, oldest first
    async fn log_archives(
        &self,
        after: Option<DateTime<Utc>>,
        target: DateTime<Utc>,
    ) -> Result<Vec<BackupExecution>> {
        let jobs = self
            .store
            .list_jobs()
            .await
            .map_err(|e| map_storage_error(e, "Failed to list backup jobs"))?;

        let mut archives = Vec::new();
        for job in jobs.iter().filter(|j| j.backup_type == BackupType::LogArchive) {
            archives.extend(self.executions(job.id).await?.into_iter().filter(|e| {
                e.is_successful()
                    && e.backup_type == BackupType::LogArchive
                    && e.covers_until.zip(after).map(|(u, a)| u > a).unwrap_or(true)
                    && e.covers_from.map(|from| from < target).unwrap_or(true)
            }));
        }
        archives.sort_by_key(|e| e.started_at);
        Ok(archives)
    }

    async fn executions(&self, job_id: Uuid) -> Result<Vec<BackupExecution>> {
        retry_transient(&self.retry, "store.list_executions", || {
            self.store.list_executions(job_id)
        })
        .await
        .map_err(|e| map_storage_error(e, "Failed to list backup executions"))
    }

    /// Verify each artifact against its recorded checksum, then restore the
    /// chain into the test environment
    async fn restore(
        &self,
        test: &RecoveryTest,
        chain: Vec<BackupExecution>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Restored> {
        let mut issues = Vec::new();
        let mut artifacts = Vec::with_capacity(chain.len());
        let mut recorded = Vec::with_capacity(chain.len());

        for execution in &chain {
            let (Some(key), Some(checksum)) = (&execution.artifact_key, &execution.checksum) else {
                issues.push(format!("execution {} has no artifact", execution.id));
                continue;
            };
            let read = retry_transient(&self.retry, "object_store.get_range", || {
                self.objects.get_range(key, 0..execution.size_bytes)
            })
            .await;
            let payload = match read {
                Ok(payload) => payload,
                Err(palisade_storage::Error::NotFound(_)) => {
                    issues.push(format!("artifact {} is missing", key));
                    continue;
                }
                Err(e) => return Err(map_storage_error(e, "Failed to read backup artifact")),
            };

            if payload.len() as u64 != execution.size_bytes {
                issues.push(format!(
                    "artifact {} is {} bytes, expected {}",
                    key,
                    payload.len(),
                    execution.size_bytes
                ));
            }
            let actual = palisade_storage::checksum(&payload);
            if &actual != checksum {
                issues.push(format!("artifact {} checksum mismatch", key));
            }
            recorded.push(checksum.clone());
            artifacts.push(RestoreArtifact {
                execution_id: execution.id,
                backup_type: execution.backup_type,
                payload,
            });
        }

        if !issues.is_empty() {
            return Ok(Restored {
                observation: Observation {
                    issues,
                    ..Default::default()
                },
                rows: None,
                latest_change: None,
            });
        }

        let restored_ids: Vec<Uuid> = artifacts.iter().map(|a| a.execution_id).collect();
        let restored = match self
            .environment
            .restore(&test.environment, artifacts, until)
            .await
        {
            Ok(restored) => restored,
            Err(e) => {
                return Ok(Restored {
                    observation: Observation::failed(format!("restore failed: {}", e)),
                    rows: None,
                    latest_change: None,
                })
            }
        };

        let mut observation = Observation {
            integrity: true,
            restored: restored_ids,
            ..Default::default()
        };
        if restored.applied_checksums != recorded {
            observation.integrity = false;
            observation
                .issues
                .push("restored artifacts do not match recorded checksums".to_string());
        }
        let latest_change = restored
            .latest_change_at
            .or_else(|| chain.iter().filter_map(|e| e.covers_until).max());

        Ok(Restored {
            observation,
            rows: Some(restored.row_count),
            latest_change,
        })
    }
}

/// Restore result plus the facts scenarios judge it by
struct Restored {
    observation: Observation,
    rows: Option<u64>,
    latest_change: Option<DateTime<Utc>>,
}
