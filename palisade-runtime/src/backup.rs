//! Backup scheduler and executor
//!
//! Each execution is claimed through [`MetadataStore::begin_execution`], which
//! doubles as the per-job lock: a job never has more than one running
//! execution, and a second request for the same job gets the in-flight id
//! back. Failed executions are recorded and not retried; the schedule's next
//! tick is the retry.
//!
//! A claim whose outcome never reaches the store stops holding the job once
//! it is older than the staleness bound; the next claim fails it and takes
//! its place.

use crate::collaborators::{
    notify_best_effort, AlertSeverity, BackupSource, ExportRequest, Notifier,
};
use crate::concurrency::ConcurrencyLimiter;
use crate::metrics::{
    BACKUP_BYTES_WRITTEN_TOTAL, BACKUP_DURATION_SECONDS, BACKUP_EXECUTIONS_TOTAL,
};
use crate::{map_storage_error, Error, Result};
use chrono::{DateTime, Utc};
use palisade_core::{
    ArtifactSummary, BackupExecution, BackupJob, BackupJobSpec, BackupType, VerificationState,
};
use palisade_storage::{Error as StorageError, MetadataStore, ObjectStore};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Consecutive failures at which a job raises a critical alert
pub const DEFAULT_FAILURE_ALERT_THRESHOLD: u32 = 3;

/// Age at which a running execution no longer holds its job
pub const DEFAULT_STALE_EXECUTION_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct BackupService {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    source: Arc<dyn BackupSource>,
    notifier: Arc<dyn Notifier>,
    serial_lane: Arc<ConcurrencyLimiter>,
    failure_alert_threshold: u32,
    stale_execution_after: Duration,
}

/// What an execution will export, decided before it is claimed
#[derive(Debug, Clone, PartialEq, Eq)]
struct BackupPlan {
    backup_type: BackupType,
    request: ExportRequest,
    base_execution_id: Option<Uuid>,
    covers_from: Option<DateTime<Utc>>,
}

enum Claim {
    Started(BackupExecution, ExportRequest),
    InFlight(Uuid),
}

impl BackupService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        source: Arc<dyn BackupSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            objects,
            source,
            notifier,
            serial_lane: Arc::new(ConcurrencyLimiter::serial()),
            failure_alert_threshold: DEFAULT_FAILURE_ALERT_THRESHOLD,
            stale_execution_after: DEFAULT_STALE_EXECUTION_AFTER,
        }
    }

    pub fn with_failure_alert_threshold(mut self, threshold: u32) -> Self {
        self.failure_alert_threshold = threshold;
        self
    }

    /// How long a running execution may go without a recorded outcome
    /// before a new claim replaces it
    pub fn with_stale_execution_after(mut self, after: Duration) -> Self {
        self.stale_execution_after = after;
        self
    }

    /// Register a job and compute its first `next_execution`
    #[instrument(skip(self, spec), fields(job_name = %spec.name, backup_type = %spec.backup_type))]
    pub async fn schedule_job(&self, spec: BackupJobSpec) -> Result<Uuid> {
        let job = BackupJob::from_spec(spec, Utc::now())?;
        self.store
            .create_job(&job)
            .await
            .map_err(|e| map_storage_error(e, "Failed to create backup job"))?;

        info!(
            job_id = %job.id,
            next_execution = ?job.next_execution,
            "Backup job scheduled"
        );
        Ok(job.id)
    }

    /// Start an execution of `job_id` in the background and return its id.
    /// If the job already has a running execution, its id is returned instead.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn execute_now(
        &self,
        job_id: Uuid,
        type_override: Option<BackupType>,
    ) -> Result<Uuid> {
        let job = self.get_job(job_id).await?;
        let requested = type_override.unwrap_or(job.backup_type);

        match self.claim(&job, requested).await? {
            Claim::InFlight(id) => {
                info!(execution_id = %id, "Execution already running, returning in-flight id");
                Ok(id)
            }
            Claim::Started(execution, request) => {
                let id = execution.id;
                let service = self.clone();
                tokio::spawn(async move {
                    service.run(job, execution, request).await;
                });
                Ok(id)
            }
        }
    }

    pub async fn execution_status(&self, execution_id: Uuid) -> Result<BackupExecution> {
        self.store
            .get_execution(execution_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load backup execution"))
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<BackupJob> {
        self.store
            .get_job(job_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to load backup job"))
    }

    /// Start every job due at `now`, advance its schedule and wait for the
    /// started executions to finish. Returns the ids of executions started.
    ///
    /// Safe to re-issue for the same instant: a job's `next_execution` moves
    /// past `now` before its execution is claimed.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let jobs = self
            .store
            .list_jobs()
            .await
            .map_err(|e| map_storage_error(e, "Failed to list backup jobs"))?;

        let mut running = JoinSet::new();
        let mut started = Vec::new();
        for mut job in jobs.into_iter().filter(|job| job.is_due(now)) {
            job.next_execution = job.schedule.next_after(now);
            self.store
                .update_job(&job)
                .await
                .map_err(|e| map_storage_error(e, "Failed to advance job schedule"))?;

            let backup_type = job.backup_type;
            match self.claim(&job, backup_type).await {
                Ok(Claim::Started(execution, request)) => {
                    started.push(execution.id);
                    let service = self.clone();
                    running.spawn(async move { service.run(job, execution, request).await });
                }
                Ok(Claim::InFlight(id)) => {
                    info!(
                        job_id = %job.id,
                        execution_id = %id,
                        "Skipping due job, previous run still in flight"
                    );
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to start scheduled backup");
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Backup execution task panicked");
            }
        }
        Ok(started)
    }

    async fn claim(&self, job: &BackupJob, requested: BackupType) -> Result<Claim> {
        let plan = self.plan(job, requested).await?;
        let mut execution = BackupExecution::start(job.id, plan.backup_type, Utc::now());
        execution.base_execution_id = plan.base_execution_id;
        execution.covers_from = plan.covers_from;

        let stale_after = chrono::Duration::from_std(self.stale_execution_after)
            .map_err(|e| Error::Configuration(format!("invalid staleness bound: {}", e)))?;
        let stale_before = execution.started_at - stale_after;

        let (id, created) = self
            .store
            .begin_execution(&execution, stale_before)
            .await
            .map_err(|e| map_storage_error(e, "Failed to claim backup execution"))?;

        if created {
            Ok(Claim::Started(execution, plan.request))
        } else {
            Ok(Claim::InFlight(id))
        }
    }

    /// Resolve incremental bases and log-archive continuation points
    async fn plan(&self, job: &BackupJob, requested: BackupType) -> Result<BackupPlan> {
        let full = BackupPlan {
            backup_type: BackupType::Full,
            request: ExportRequest::Full,
            base_execution_id: None,
            covers_from: None,
        };

        match requested {
            BackupType::Full => Ok(full),
            BackupType::Incremental => {
                let history = self.history(job.id).await?;
                let base = history.iter().rev().find(|e| {
                    e.is_successful()
                        && matches!(e.backup_type, BackupType::Full | BackupType::Incremental)
                });
                match base.and_then(|b| b.covers_until.map(|until| (b.id, until))) {
                    Some((base_id, since)) => Ok(BackupPlan {
                        backup_type: BackupType::Incremental,
                        request: ExportRequest::Incremental { since },
                        base_execution_id: Some(base_id),
                        covers_from: Some(since),
                    }),
                    None => {
                        info!(job_id = %job.id, "No base backup for incremental, taking a full backup");
                        Ok(full)
                    }
                }
            }
            BackupType::LogArchive => {
                let history = self.history(job.id).await?;
                let since = history
                    .iter()
                    .rev()
                    .find(|e| e.is_successful() && e.backup_type == BackupType::LogArchive)
                    .and_then(|e| e.covers_until);
                Ok(BackupPlan {
                    backup_type: BackupType::LogArchive,
                    request: ExportRequest::LogArchive { since },
                    base_execution_id: None,
                    covers_from: since,
                })
            }
        }
    }

    async fn history(&self, job_id: Uuid) -> Result<Vec<BackupExecution>> {
        self.store
            .list_executions(job_id)
            .await
            .map_err(|e| map_storage_error(e, "Failed to list backup executions"))
    }

    /// Run a claimed execution to its final state. Never returns an error:
    /// every failure is recorded on the execution.
    #[instrument(
        skip(self, job, execution, request),
        fields(job_id = %job.id, execution_id = %execution.id, backup_type = %execution.backup_type)
    )]
    async fn run(
        &self,
        job: BackupJob,
        mut execution: BackupExecution,
        request: ExportRequest,
    ) -> BackupExecution {
        let started = Instant::now();

        let outcome = if job.concurrent {
            self.produce_artifact(&job, &execution, request).await
        } else {
            match self.serial_lane.acquire().await {
                Ok(_permit) => self.produce_artifact(&job, &execution, request).await,
                Err(e) => Err(e),
            }
        };

        let claimed = execution.clone();
        let now = Utc::now();
        let recorded = match outcome {
            Ok(artifact) => execution.complete(artifact, now),
            Err(e) => {
                warn!(error = %e, "Backup execution failed");
                execution.fail(e.to_string(), now)
            }
        };
        if let Err(e) = recorded {
            error!(error = %e, "Execution was already finalized");
            return execution;
        }

        let execution = self.persist_outcome(claimed, execution).await;

        let backup_type = execution.backup_type.as_str();
        BACKUP_EXECUTIONS_TOTAL
            .with_label_values(&[backup_type, execution.status.as_str()])
            .inc();
        BACKUP_DURATION_SECONDS
            .with_label_values(&[backup_type])
            .observe(started.elapsed().as_secs_f64());
        if execution.is_successful() {
            BACKUP_BYTES_WRITTEN_TOTAL
                .with_label_values(&[backup_type])
                .inc_by(execution.size_bytes);
        }

        if let Err(e) = self.record_statistics(job.id, &execution).await {
            error!(error = %e, "Failed to update job statistics");
        }

        info!(
            status = execution.status.as_str(),
            size_bytes = execution.size_bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            "Backup execution finalized"
        );
        execution
    }

    /// Store the final state of an execution. When the outcome itself cannot
    /// be written, a plain failure is stored instead so the job lock is
    /// released. Returns what was stored.
    async fn persist_outcome(
        &self,
        claimed: BackupExecution,
        execution: BackupExecution,
    ) -> BackupExecution {
        let cause = match self.finalize(&execution).await {
            Ok(()) => return execution,
            Err(e) => e,
        };
        error!(error = %cause, "Failed to persist backup outcome, recording a failure instead");

        let mut fallback = claimed;
        let reason = format!("outcome could not be recorded: {}", cause);
        if let Err(e) = fallback.fail(reason, Utc::now()) {
            error!(error = %e, "Execution was already finalized");
            return execution;
        }
        match self.finalize(&fallback).await {
            Ok(()) => fallback,
            Err(e) => {
                error!(
                    error = %e,
                    stale_after_secs = self.stale_execution_after.as_secs(),
                    "Backup execution left running until its claim goes stale"
                );
                execution
            }
        }
    }

    /// Bounded attempts at `finalize_execution`. Rejections by the store are
    /// not retried.
    async fn finalize(&self, execution: &BackupExecution) -> palisade_storage::Result<()> {
        let mut attempt = 1;
        loop {
            match self.store.finalize_execution(execution).await {
                Ok(()) => return Ok(()),
                Err(e @ (StorageError::InvalidState(_) | StorageError::NotFound(_))) => {
                    return Err(e);
                }
                Err(e) if attempt >= FINALIZE_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "Failed to finalize backup execution, retrying");
                    tokio::time::sleep(FINALIZE_BACKOFF * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn produce_artifact(
        &self,
        job: &BackupJob,
        execution: &BackupExecution,
        request: ExportRequest,
    ) -> Result<ArtifactSummary> {
        let exported = self.source.export(&job.scope, request).await?;
        let expected = palisade_storage::checksum(&exported.payload);
        let size_bytes = exported.payload.len() as u64;

        let key = artifact_key(job, execution);
        let checksum = self
            .objects
            .put(&key, exported.payload)
            .await
            .map_err(|e| map_storage_error(e, "Failed to write backup artifact"))?;

        let stored = self
            .objects
            .get(&key)
            .await
            .map_err(|e| map_storage_error(e, "Failed to re-read backup artifact"))?;
        let verified = palisade_storage::checksum(&stored);

        if checksum != expected || verified != expected {
            if let Err(e) = self.objects.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to delete unverified artifact");
            }
            return Err(Error::Internal(format!(
                "checksum mismatch for {}: expected {}, stored {}",
                key, expected, verified
            )));
        }

        Ok(ArtifactSummary {
            key,
            size_bytes,
            checksum,
            row_count: exported.row_count,
            covers_from: execution.covers_from,
            covers_until: exported.latest_change_at,
            verification: VerificationState::Verified,
        })
    }

    async fn record_statistics(&self, job_id: Uuid, execution: &BackupExecution) -> Result<()> {
        let mut job = self.get_job(job_id).await?;
        let at = execution.completed_at.unwrap_or_else(Utc::now);
        if execution.is_successful() {
            job.record_success(execution.size_bytes, at);
        } else {
            job.record_failure(at);
        }
        self.store
            .update_job(&job)
            .await
            .map_err(|e| map_storage_error(e, "Failed to update job statistics"))?;

        let failures = job.statistics.consecutive_failures;
        if failures == self.failure_alert_threshold {
            notify_best_effort(
                &self.notifier,
                AlertSeverity::Critical,
                &format!("Backup job '{}' failed {} times in a row", job.name, failures),
                json!({
                    "job_id": job.id,
                    "execution_id": execution.id,
                    "consecutive_failures": failures,
                    "error": execution.error_message,
                }),
            )
            .await;
        }
        Ok(())
    }
}

/// `<storage_target>/<job_id>/<started_at>-<execution_id>.bak`
pub fn artifact_key(job: &BackupJob, execution: &BackupExecution) -> String {
    format!(
        "{}/{}/{}-{}.bak",
        job.storage_target,
        job.id,
        execution.started_at.format("%Y%m%dT%H%M%SZ"),
        execution.id
    )
}
