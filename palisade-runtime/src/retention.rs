//! Backup retention sweep

use crate::metrics::RETENTION_DELETED_TOTAL;
use crate::{map_storage_error, Result};
use chrono::{DateTime, Duration, Utc};
use palisade_core::{BackupExecution, BackupType, RetentionPolicy};
use palisade_storage::{MetadataStore, ObjectStore};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Executions of one job that retention allows to be deleted.
///
/// - running executions are never selected
/// - the most recent successful full backup is always kept
/// - a `recovery_tested` execution is kept for the grace period past retention
pub fn select_expired(
    executions: &[BackupExecution],
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Vec<Uuid> {
    let latest_full = executions
        .iter()
        .filter(|e| e.is_successful() && e.backup_type == BackupType::Full)
        .max_by_key(|e| e.started_at)
        .map(|e| e.id);

    let retention = Duration::days(i64::from(policy.retention_days));
    let grace = retention + Duration::days(i64::from(policy.recovery_tested_grace_days));

    executions
        .iter()
        .filter(|e| e.is_finalized() && Some(e.id) != latest_full)
        .filter(|e| {
            let age = now - e.completed_at.unwrap_or(e.started_at);
            if age <= retention {
                return false;
            }
            !(e.recovery_tested && age <= grace)
        })
        .map(|e| e.id)
        .collect()
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub deleted: usize,
    /// Expired executions kept because their artifact could not be deleted
    pub failed: usize,
}

#[derive(Clone)]
pub struct RetentionSweeper {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MetadataStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { store, objects }
    }

    /// Delete expired executions and their artifacts across all jobs.
    /// The artifact goes first; the record is kept when that fails so the
    /// next sweep retries.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let jobs = self
            .store
            .list_jobs()
            .await
            .map_err(|e| map_storage_error(e, "Failed to list backup jobs"))?;

        let mut report = SweepReport::default();
        for job in jobs {
            let executions = self
                .store
                .list_executions(job.id)
                .await
                .map_err(|e| map_storage_error(e, "Failed to list backup executions"))?;
            report.examined += executions.len();

            let expired = select_expired(&executions, &job.retention, now);
            for execution in executions.iter().filter(|e| expired.contains(&e.id)) {
                if let Some(key) = &execution.artifact_key {
                    if let Err(e) = self.objects.delete(key).await {
                        warn!(execution_id = %execution.id, key = %key, error = %e, "Failed to delete expired artifact");
                        report.failed += 1;
                        continue;
                    }
                }
                self.store
                    .delete_execution(execution.id)
                    .await
                    .map_err(|e| map_storage_error(e, "Failed to delete backup execution"))?;
                RETENTION_DELETED_TOTAL
                    .with_label_values(&[execution.backup_type.as_str()])
                    .inc();
                report.deleted += 1;
            }
        }

        info!(
            examined = report.examined,
            deleted = report.deleted,
            failed = report.failed,
            "Retention sweep finished"
        );
        Ok(report)
    }
}
