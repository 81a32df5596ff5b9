//! Backup jobs and executions

use crate::schedule::CronSchedule;
use crate::tenant::TenantId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of backup a job produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    /// Copies all targeted data
    Full,
    /// Copies data changed since the last successful full or incremental
    Incremental,
    /// Copies the durable write log
    LogArchive,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::LogArchive => "log_archive",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data targeted by a job. Empty `schemas`/`tables` means everything visible
/// to the scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupScope {
    pub tenant: Option<TenantId>,
    pub schemas: Vec<String>,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Executions older than this are swept
    pub retention_days: u32,
    /// Extra days a `recovery_tested` execution is kept past `retention_days`
    pub recovery_tested_grace_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            recovery_tested_grace_days: 30,
        }
    }
}

/// Definition submitted to schedule a backup job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupJobSpec {
    pub name: String,
    pub backup_type: BackupType,
    pub schedule: CronSchedule,
    pub scope: BackupScope,
    /// Key prefix in the object store
    pub storage_target: String,
    pub retention: RetentionPolicy,
    /// Whether the job may run alongside other jobs. Non-concurrent jobs
    /// share a serial lane.
    pub concurrent: bool,
}

impl BackupJobSpec {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Configuration("job name cannot be empty".into()));
        }
        let target = self.storage_target.trim();
        if target.is_empty() || target.starts_with('/') || target.contains("..") {
            return Err(Error::Configuration(format!(
                "storage_target '{}' must be a relative key prefix",
                self.storage_target
            )));
        }
        if self.retention.retention_days == 0 {
            return Err(Error::Configuration(
                "retention_days must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Running totals kept on a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_size_bytes: Option<u64>,
}

/// A named, scheduled backup definition.
///
/// Only `next_execution` and `statistics` change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: Uuid,
    pub name: String,
    pub backup_type: BackupType,
    pub schedule: CronSchedule,
    pub scope: BackupScope,
    pub storage_target: String,
    pub retention: RetentionPolicy,
    pub concurrent: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub statistics: JobStatistics,
    pub created_at: DateTime<Utc>,
}

impl BackupJob {
    pub fn from_spec(spec: BackupJobSpec, now: DateTime<Utc>) -> Result<Self> {
        spec.validate()?;
        let next_execution = spec.schedule.next_after(now);
        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            backup_type: spec.backup_type,
            schedule: spec.schedule,
            scope: spec.scope,
            storage_target: spec.storage_target.trim().trim_end_matches('/').to_string(),
            retention: spec.retention,
            concurrent: spec.concurrent,
            next_execution,
            statistics: JobStatistics::default(),
            created_at: now,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_execution.map(|next| next <= now).unwrap_or(false)
    }

    pub fn record_success(&mut self, size_bytes: u64, at: DateTime<Utc>) {
        let stats = &mut self.statistics;
        stats.total_runs += 1;
        stats.successful_runs += 1;
        stats.consecutive_failures = 0;
        stats.last_success_at = Some(at);
        stats.last_size_bytes = Some(size_bytes);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>) {
        let stats = &mut self.statistics;
        stats.total_runs += 1;
        stats.failed_runs += 1;
        stats.consecutive_failures += 1;
        stats.last_failure_at = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Verified,
    Failed,
}

/// Facts about a written artifact, recorded when an execution completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
    pub key: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub row_count: u64,
    pub covers_from: Option<DateTime<Utc>>,
    pub covers_until: DateTime<Utc>,
    pub verification: VerificationState,
}

/// One run of a backup job. Finalized exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub backup_type: BackupType,
    pub status: ExecutionStatus,
    pub artifact_key: Option<String>,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub row_count: u64,
    /// Execution this incremental builds on
    pub base_execution_id: Option<Uuid>,
    /// Start of the change window captured (incrementals and log archives)
    pub covers_from: Option<DateTime<Utc>>,
    /// Latest change captured by the artifact
    pub covers_until: Option<DateTime<Utc>>,
    pub verification: VerificationState,
    pub recovery_tested: bool,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BackupExecution {
    pub fn start(job_id: Uuid, backup_type: BackupType, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            backup_type,
            status: ExecutionStatus::Running,
            artifact_key: None,
            size_bytes: 0,
            checksum: None,
            row_count: 0,
            base_execution_id: None,
            covers_from: None,
            covers_until: None,
            verification: VerificationState::Pending,
            recovery_tested: false,
            error_message: None,
            started_at: now,
            completed_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn complete(&mut self, artifact: ArtifactSummary, now: DateTime<Utc>) -> Result<()> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Completed;
        self.artifact_key = Some(artifact.key);
        self.size_bytes = artifact.size_bytes;
        self.checksum = Some(artifact.checksum);
        self.row_count = artifact.row_count;
        self.covers_from = artifact.covers_from;
        self.covers_until = Some(artifact.covers_until);
        self.verification = artifact.verification;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(now);
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_finalized() {
            return Err(Error::InvalidState(format!(
                "execution {} already finalized as {}",
                self.id,
                self.status.as_str()
            )));
        }
        Ok(())
    }
}
